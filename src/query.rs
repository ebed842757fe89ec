//! Lookup requests and their transportable encoding.
use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{lifecycle, targeting::TargetingSubject, Error, Result};

/// A single flag lookup request.
///
/// Construct with [`FlagQuery::builder`].
///
/// ```
/// # use feature_lookup::FlagQuery;
/// let query = FlagQuery::builder("new-checkout")
///     .subject_id("alice")
///     .groups(["beta"])
///     .default_value(true)
///     .build()
///     .unwrap();
///
/// assert_eq!(query.name(), "new-checkout");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagQuery {
    lookup_key: Option<String>,
    name: String,
    subject_id: Option<String>,
    groups: BTreeSet<String>,
    default_value: bool,
    suppress_failure: bool,
}

impl FlagQuery {
    pub fn builder(name: impl Into<String>) -> FlagQueryBuilder {
        FlagQueryBuilder {
            lookup_key: None,
            name: name.into(),
            subject_id: None,
            groups: BTreeSet::new(),
            default_value: false,
            suppress_failure: false,
        }
    }

    /// Snapshot key this query is evaluated against. `None` means the default snapshot.
    pub fn lookup_key(&self) -> Option<&str> {
        self.lookup_key.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn default_value(&self) -> bool {
        self.default_value
    }

    pub fn suppress_failure(&self) -> bool {
        self.suppress_failure
    }

    /// Encode everything needed to evaluate this query into a transportable string.
    ///
    /// `suppress_failure` is a caller-side policy and is not encoded.
    pub fn encode(&self) -> String {
        let wire = QueryWire {
            lookup_key: self.lookup_key.clone(),
            name: self.name.clone(),
            subject_id: self.subject_id.clone(),
            groups: self.groups.clone(),
            default_value: self.default_value,
        };
        // Serializing a struct of strings and booleans cannot fail.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        STANDARD.encode(json)
    }
}

pub struct FlagQueryBuilder {
    lookup_key: Option<String>,
    name: String,
    subject_id: Option<String>,
    groups: BTreeSet<String>,
    default_value: bool,
    suppress_failure: bool,
}

impl FlagQueryBuilder {
    /// Evaluate against the snapshot registered under `lookup_key`.
    ///
    /// When not set, the key published by the enclosing request scope is used, if any.
    pub fn lookup_key(mut self, lookup_key: impl Into<String>) -> Self {
        self.lookup_key = Some(lookup_key.into());
        self
    }

    pub fn subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn groups<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Value returned when a failure is suppressed.
    pub fn default_value(mut self, default_value: bool) -> Self {
        self.default_value = default_value;
        self
    }

    /// Resolve failures to the default value instead of surfacing them.
    pub fn suppress_failure(mut self, suppress_failure: bool) -> Self {
        self.suppress_failure = suppress_failure;
        self
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the flag name is blank.
    pub fn build(self) -> Result<FlagQuery> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument("flag name is required"));
        }

        let lookup_key = self.lookup_key.or_else(lifecycle::current_lookup_key);

        Ok(FlagQuery {
            lookup_key,
            name: self.name,
            subject_id: self.subject_id,
            groups: self.groups,
            default_value: self.default_value,
            suppress_failure: self.suppress_failure,
        })
    }
}

/// The evaluation-side view of a [`FlagQuery`], as reconstructed from its encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationContext {
    lookup_key: Option<String>,
    name: String,
    subject_id: Option<String>,
    groups: BTreeSet<String>,
    default_value: bool,
}

impl EvaluationContext {
    /// Decode a string produced by [`FlagQuery::encode`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `encoded` is blank or decodes to a blank flag name.
    /// - [`Error::MalformedQuery`] if `encoded` cannot be decoded.
    pub fn decode(encoded: &str) -> Result<EvaluationContext> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(Error::InvalidArgument("encoded query is blank"));
        }

        let json = STANDARD
            .decode(encoded)
            .map_err(|err| Error::MalformedQuery(err.to_string()))?;
        let wire: QueryWire =
            serde_json::from_slice(&json).map_err(|err| Error::MalformedQuery(err.to_string()))?;

        if wire.name.trim().is_empty() {
            return Err(Error::InvalidArgument("flag name is required"));
        }

        Ok(EvaluationContext {
            lookup_key: wire.lookup_key.filter(|key| !key.is_empty()),
            name: wire.name,
            subject_id: wire.subject_id,
            groups: wire.groups,
            default_value: wire.default_value,
        })
    }

    pub fn lookup_key(&self) -> Option<&str> {
        self.lookup_key.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn default_value(&self) -> bool {
        self.default_value
    }

    pub(crate) fn subject(&self) -> TargetingSubject<'_> {
        TargetingSubject::new(self.subject_id(), &self.groups)
    }
}

impl From<&FlagQuery> for EvaluationContext {
    fn from(query: &FlagQuery) -> Self {
        EvaluationContext {
            lookup_key: query.lookup_key.clone(),
            name: query.name.clone(),
            subject_id: query.subject_id.clone(),
            groups: query.groups.clone(),
            default_value: query.default_value,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lookup_key: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject_id: Option<String>,
    #[serde(default)]
    groups: BTreeSet<String>,
    #[serde(default)]
    default_value: bool,
}
