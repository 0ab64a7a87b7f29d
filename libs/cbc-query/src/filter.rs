//! Filter expressions and the builder that accumulates them.
//!
//! Leaves render as `key:value` tokens. Combinators wrap both operands in
//! parentheses, so `where("a", "1").and_("b", "2")` collapses to `(a:1 AND b:2)`.

use std::fmt;

use crate::error::QueryError;

/// Boolean operator joining two sub-expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    And,
    Or,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::And => write!(f, "AND"),
            FilterOp::Or => write!(f, "OR"),
        }
    }
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `key:value` leaf
    Term { key: String, value: String },
    /// Raw query string, rendered verbatim
    Raw(String),
    /// Two sub-expressions joined by an operator
    Binary {
        op: FilterOp,
        left: Box<Filter>,
        right: Box<Filter>,
    },
}

impl Filter {
    pub fn term(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Term {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn raw(query: impl Into<String>) -> Self {
        Filter::Raw(query.into())
    }

    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        Filter::Binary {
            op: FilterOp::And,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        Filter::Binary {
            op: FilterOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// AND-joins every `(key, value)` pair, left to right.
    ///
    /// Returns `None` for an empty iterator.
    pub fn all<I, K, V>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        pairs
            .into_iter()
            .map(|(key, value)| Filter::term(key, value))
            .reduce(Filter::and)
    }

    /// Flattens the tree into `(key, value)` pairs for endpoints that take
    /// one query parameter per predicate.
    ///
    /// Operators are dropped. Raw clauses are split on whitespace and every
    /// `key:value` token is kept with surrounding parentheses stripped. A key
    /// seen twice keeps its first position and its last value.
    #[must_use]
    pub fn terms(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms(&self, out: &mut Vec<(String, String)>) {
        match self {
            Filter::Term { key, value } => push_term(out, key, value),
            Filter::Raw(query) => {
                for token in query.split_whitespace() {
                    let Some((key, value)) = token.split_once(':') else {
                        continue;
                    };
                    let key = key.trim_matches(|c| c == '(' || c == ')');
                    let value = value.trim_matches(|c| c == '(' || c == ')');
                    if !key.is_empty() {
                        push_term(out, key, value);
                    }
                }
            }
            Filter::Binary { left, right, .. } => {
                left.collect_terms(out);
                right.collect_terms(out);
            }
        }
    }

    /// Returns true if any operator in the tree is OR.
    #[must_use]
    pub fn has_or(&self) -> bool {
        match self {
            Filter::Binary { op, left, right } => {
                *op == FilterOp::Or || left.has_or() || right.has_or()
            }
            Filter::Term { .. } | Filter::Raw(_) => false,
        }
    }
}

fn push_term(out: &mut Vec<(String, String)>, key: &str, value: &str) {
    if let Some(slot) = out.iter_mut().find(|(k, _)| k == key) {
        value.clone_into(&mut slot.1);
    } else {
        out.push((key.to_owned(), value.to_owned()));
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Term { key, value } => write!(f, "{key}:{value}"),
            Filter::Raw(query) => f.write_str(query),
            Filter::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

/// Accumulates `where` / `and_` / `or_` clauses into one expression.
///
/// The builder is a plain value: cloning it copies the expression, so a
/// derived query never aliases its parent's filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    filter: Option<Filter>,
}

impl QueryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial clause.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] if a clause is already present.
    pub fn where_(mut self, clause: Filter) -> Result<Self, QueryError> {
        if let Some(existing) = &self.filter {
            return Err(QueryError::usage(format!(
                "filter already set to '{existing}'; use and_() or or_() to extend it"
            )));
        }
        self.filter = Some(clause);
        Ok(self)
    }

    /// Appends a clause joined with AND.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] if the builder is empty.
    pub fn and_(self, clause: Filter) -> Result<Self, QueryError> {
        self.combine(FilterOp::And, clause)
    }

    /// Appends a clause joined with OR.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] if the builder is empty.
    pub fn or_(self, clause: Filter) -> Result<Self, QueryError> {
        self.combine(FilterOp::Or, clause)
    }

    fn combine(mut self, op: FilterOp, clause: Filter) -> Result<Self, QueryError> {
        let Some(existing) = self.filter.take() else {
            return Err(QueryError::usage(format!(
                "{op} clause requires an initial where() clause"
            )));
        };
        self.filter = Some(match op {
            FilterOp::And => existing.and(clause),
            FilterOp::Or => existing.or(clause),
        });
        Ok(self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter.is_none()
    }

    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Renders the accumulated expression, or `None` if nothing was added.
    #[must_use]
    pub fn collapse(&self) -> Option<String> {
        self.filter.as_ref().map(ToString::to_string)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_empty_builder_collapses_to_none() {
        assert_eq!(QueryBuilder::new().collapse(), None);
    }

    #[test]
    fn test_single_term() {
        let b = QueryBuilder::new()
            .where_(Filter::term("hostName", "ws-01"))
            .unwrap();
        assert_eq!(b.collapse().as_deref(), Some("hostName:ws-01"));
    }

    #[test]
    fn test_and_chain_contains_every_clause_once() {
        let b = QueryBuilder::new()
            .where_(Filter::term("a", "1"))
            .unwrap()
            .and_(Filter::term("b", "2"))
            .unwrap()
            .and_(Filter::term("c", "3"))
            .unwrap();
        let collapsed = b.collapse().unwrap();
        assert_eq!(collapsed, "((a:1 AND b:2) AND c:3)");
        for token in ["a:1", "b:2", "c:3"] {
            assert_eq!(collapsed.matches(token).count(), 1, "{token}");
        }
        assert_eq!(collapsed.matches(" AND ").count(), 2);
    }

    #[test]
    fn test_or_groups() {
        let b = QueryBuilder::new()
            .where_(Filter::term("process_name", "cmd.exe"))
            .unwrap()
            .or_(Filter::term("process_name", "powershell.exe"))
            .unwrap();
        assert_eq!(
            b.collapse().as_deref(),
            Some("(process_name:cmd.exe OR process_name:powershell.exe)")
        );
        assert!(b.filter().unwrap().has_or());
    }

    #[test]
    fn test_where_twice_is_usage_error() {
        let err = QueryBuilder::new()
            .where_(Filter::term("a", "1"))
            .unwrap()
            .where_(Filter::term("b", "2"))
            .unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_and_or_on_empty_builder_fail() {
        assert!(
            QueryBuilder::new()
                .and_(Filter::term("a", "1"))
                .unwrap_err()
                .is_usage()
        );
        assert!(
            QueryBuilder::new()
                .or_(Filter::term("a", "1"))
                .unwrap_err()
                .is_usage()
        );
    }

    #[test]
    fn test_all_groups_pairs() {
        let f = Filter::all([("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(f.to_string(), "(a:1 AND b:2)");
        assert!(Filter::all(Vec::<(String, String)>::new()).is_none());
    }

    #[test]
    fn test_terms_flattens_tree_and_raw() {
        let f = Filter::term("a", "1")
            .and(Filter::raw("(b:2 AND c:3)"))
            .and(Filter::term("a", "9"));
        assert_eq!(
            f.terms(),
            vec![
                ("a".to_owned(), "9".to_owned()),
                ("b".to_owned(), "2".to_owned()),
                ("c".to_owned(), "3".to_owned()),
            ]
        );
    }

    #[test]
    fn test_cloned_builder_does_not_alias() {
        let parent = QueryBuilder::new().where_(Filter::term("a", "1")).unwrap();
        let child = parent.clone().and_(Filter::term("b", "2")).unwrap();
        assert_eq!(parent.collapse().as_deref(), Some("a:1"));
        assert_eq!(child.collapse().as_deref(), Some("(a:1 AND b:2)"));
    }
}
