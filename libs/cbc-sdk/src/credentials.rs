//! API credentials and where they come from.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. the `profiles.<name>` section of a YAML credentials file
//! 3. `CBC_*` environment variables (`CBC_URL`, `CBC_TOKEN`, `CBC_ORG_KEY`, ...)
//!
//! ```yaml
//! profiles:
//!   default:
//!     url: https://defense.conferdeploy.net
//!     token: ABCDEFGHIJKLMN/ZYXWVUT
//!     org_key: ABCD1234
//!     ssl_verify: true
//! ```

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::CbcError;

pub const DEFAULT_PROFILE: &str = "default";
pub const ENV_PREFIX: &str = "CBC_";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for one Carbon Black Cloud tenant.
#[derive(Debug)]
pub struct Credentials {
    /// Server root, e.g. `https://defense.conferdeploy.net`
    pub url: String,
    /// `<secret>/<connector-id>`, sent verbatim as `X-Auth-Token`
    pub token: SecretString,
    pub org_key: String,
    pub ssl_verify: bool,
    pub ssl_force_tls_1_2: bool,
    /// Prefixed to the User-Agent
    pub integration_name: Option<String>,
    /// Per-request HTTP timeout
    pub default_timeout: Duration,
}

#[derive(Serialize)]
struct Defaults {
    ssl_verify: bool,
    ssl_force_tls_1_2: bool,
    default_timeout: u64,
}

#[derive(Deserialize)]
struct RawCredentials {
    url: Option<String>,
    token: Option<String>,
    org_key: Option<String>,
    ssl_verify: bool,
    ssl_force_tls_1_2: bool,
    integration_name: Option<String>,
    default_timeout: u64,
}

impl Credentials {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: SecretString::from(token.into()),
            org_key: org_key.into(),
            ssl_verify: true,
            ssl_force_tls_1_2: false,
            integration_name: None,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Loads `profile` from `path` (if given) overlaid with the environment.
    ///
    /// # Errors
    /// Returns [`CbcError::Credentials`] if the file does not exist or a
    /// required field is missing, [`CbcError::Config`] if a source fails to
    /// parse.
    pub fn load(path: Option<&Path>, profile: Option<&str>) -> Result<Self, CbcError> {
        let profile = profile.unwrap_or(DEFAULT_PROFILE);
        let mut figment = Figment::from(Serialized::defaults(Defaults {
            ssl_verify: true,
            ssl_force_tls_1_2: false,
            default_timeout: DEFAULT_TIMEOUT_SECS,
        }));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(CbcError::Credentials(format!(
                    "credentials file does not exist: {}",
                    path.display()
                )));
            }
            let section = Figment::from(Yaml::file(path)).focus(&format!("profiles.{profile}"));
            figment = figment.merge(section);
        }

        let figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        tracing::debug!(profile, file = ?path, "loading credentials");
        Self::from_figment(&figment)
    }

    /// # Errors
    /// See [`Credentials::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self, CbcError> {
        let raw: RawCredentials = figment.extract()?;
        let required = |value: Option<String>, name: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CbcError::Credentials(format!("missing required field '{name}'")))
        };

        let token = required(raw.token, "token")?;
        if !token.contains('/') {
            return Err(CbcError::Credentials(
                "token must have the form <secret>/<connector-id>".to_owned(),
            ));
        }

        let url = required(raw.url, "url")?;
        url::Url::parse(&url)?;

        Ok(Self {
            url,
            token: SecretString::from(token),
            org_key: required(raw.org_key, "org_key")?,
            ssl_verify: raw.ssl_verify,
            ssl_force_tls_1_2: raw.ssl_force_tls_1_2,
            integration_name: raw.integration_name,
            default_timeout: Duration::from_secs(raw.default_timeout),
        })
    }

    /// Connector id half of the token, safe to log.
    #[must_use]
    pub fn connector_id(&self) -> Option<&str> {
        self.token
            .expose_secret()
            .split_once('/')
            .map(|(_, connector)| connector)
    }
}
