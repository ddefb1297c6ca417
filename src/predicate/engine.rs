//! Predicate evaluation.
//!
//! # Responsibilities
//! - Resolve each predicate against the body (preferred) or a header
//! - Compare strictly against the expected value
//! - Combine predicates with AND semantics
//!
//! # Design Decisions
//! - Empty predicate set = always matches (wildcard)
//! - A predicate without any locator can never match (fails closed)
//! - No type coercion: `"1"` and `1` are different values
//! - Header names are compared case-insensitively, per HTTP

use std::collections::BTreeMap;

use serde_json::Value;

use crate::predicate::locator::Locator;

/// Where a predicate reads its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateSource {
    /// Path into the normalized body.
    Body(Locator),
    /// Header name, stored lowercase.
    Header(String),
    /// Neither locator was configured.
    Unsatisfiable,
}

/// A single match rule.
#[derive(Debug, Clone, PartialEq)]
pub struct BindPredicate {
    source: PredicateSource,
    expected: Value,
}

impl BindPredicate {
    /// Predicate on a body path.
    pub fn body(locator: Locator, expected: impl Into<Value>) -> Self {
        Self {
            source: PredicateSource::Body(locator),
            expected: expected.into(),
        }
    }

    /// Predicate on a header value.
    pub fn header(name: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            source: PredicateSource::Header(name.into().to_ascii_lowercase()),
            expected: expected.into(),
        }
    }

    /// Build from the optional locator pair of a bind rule.
    ///
    /// The body locator wins when both are set; blank locators count as absent.
    pub fn from_locators(
        body: Option<Locator>,
        header: Option<&str>,
        expected: Value,
    ) -> Self {
        let header = header.map(str::trim).filter(|h| !h.is_empty());
        let source = match (body, header) {
            (Some(locator), _) => PredicateSource::Body(locator),
            (None, Some(name)) => PredicateSource::Header(name.to_ascii_lowercase()),
            (None, None) => PredicateSource::Unsatisfiable,
        };
        Self { source, expected }
    }

    pub fn source(&self) -> &PredicateSource {
        &self.source
    }

    pub fn expected(&self) -> &Value {
        &self.expected
    }

    /// Evaluate this predicate alone.
    pub fn test(&self, headers: &BTreeMap<String, String>, body: &Value) -> bool {
        match &self.source {
            PredicateSource::Body(locator) => locator
                .resolve(body)
                .map(|found| *found == self.expected)
                .unwrap_or(false),
            PredicateSource::Header(name) => headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| self.expected.as_str() == Some(value.as_str()))
                .unwrap_or(false),
            PredicateSource::Unsatisfiable => false,
        }
    }
}

/// AND over every predicate; true for an empty set.
pub fn matches(predicates: &[BindPredicate], headers: &BTreeMap<String, String>, body: &Value) -> bool {
    predicates.iter().all(|predicate| {
        let passed = predicate.test(headers, body);
        tracing::trace!(
            source = ?predicate.source,
            expected = %predicate.expected,
            passed,
            "Checked predicate"
        );
        passed
    })
}
