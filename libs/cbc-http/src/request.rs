use crate::client::{BufferedService, map_buffer_error, try_acquire_buffer_slot};
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Request, Uri};
use http_body_util::Full;
use serde::Serialize;
use tower::Service;

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// A request being assembled; nothing is sent until [`RequestBuilder::send`]
///
/// Invalid headers are remembered and reported by `send` (or by the next
/// fallible step), so calls can be chained without intermediate `?`.
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    transport: TransportSecurity,
    method: http::Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    /// Default `Content-Type` for the body, unless a header overrides it
    body_type: Option<&'static str>,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        transport: TransportSecurity,
        method: http::Method,
        url: String,
    ) -> Self {
        Self {
            service,
            max_body_size,
            transport,
            method,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
            body_type: None,
            error: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_none() {
            match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                (Ok(name), Ok(value)) => self.headers.push((name, value)),
                (Err(e), _) => self.error = Some(e.into()),
                (_, Err(e)) => self.error = Some(e.into()),
            }
        }
        self
    }

    /// Append URL-encoded query parameters to the URL
    ///
    /// # Errors
    /// Returns `FormEncode` if `params` does not serialize to key/value pairs,
    /// or an earlier deferred error
    pub fn query<T: Serialize + ?Sized>(mut self, params: &T) -> Result<Self, HttpError> {
        self.take_error()?;
        let encoded = serde_urlencoded::to_string(params)?;
        if !encoded.is_empty() {
            let separator = if self.url.contains('?') { '&' } else { '?' };
            self.url.push(separator);
            self.url.push_str(&encoded);
        }
        Ok(self)
    }

    /// # Errors
    /// Returns `Json` if `body` fails to serialize, or an earlier deferred error
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        self.take_error()?;
        self.body = Bytes::from(serde_json::to_vec(body)?);
        self.body_type = Some(JSON);
        Ok(self)
    }

    /// # Errors
    /// Returns `FormEncode` if encoding fails, or an earlier deferred error
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, HttpError> {
        self.take_error()?;
        self.body = Bytes::from(serde_urlencoded::to_string(fields)?);
        self.body_type = Some(FORM);
        Ok(self)
    }

    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.body_type = None;
        self
    }

    fn take_error(&mut self) -> Result<(), HttpError> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn validate_url(&self) -> Result<Uri, HttpError> {
        let invalid = |kind, reason: String| HttpError::InvalidUri {
            url: self.url.clone(),
            kind,
            reason,
        };

        let uri: Uri = self
            .url
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(InvalidUriKind::ParseError, e.to_string()))?;
        if uri.authority().is_none() {
            return Err(invalid(
                InvalidUriKind::MissingAuthority,
                "missing host".to_owned(),
            ));
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") if self.transport == TransportSecurity::AllowInsecureHttp => Ok(uri),
            Some("http") => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required".to_owned(),
            }),
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// are supported".to_owned(),
            }),
            None => Err(invalid(
                InvalidUriKind::MissingScheme,
                "missing scheme".to_owned(),
            )),
        }
    }

    /// Send the request through the middleware stack
    ///
    /// Any status code is a successful send; see [`HttpResponse`] for
    /// turning error statuses into errors.
    ///
    /// # Errors
    /// Deferred builder errors, URL validation failures, `Overloaded` if the
    /// request queue is full, and whatever the stack raises (timeouts,
    /// transport failures)
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        self.take_error()?;
        let uri = self.validate_url()?;

        let mut builder = Request::builder().method(self.method).uri(uri);
        let caller_typed = self.headers.iter().any(|(name, _)| name == CONTENT_TYPE);
        if let Some(body_type) = self.body_type
            && !caller_typed
        {
            builder = builder.header(CONTENT_TYPE, body_type);
        }
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let request = builder.body(Full::new(self.body))?;

        try_acquire_buffer_slot(&mut self.service).await?;
        let inner = self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
        })
    }
}
