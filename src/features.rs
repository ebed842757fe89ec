//! Feature flag definitions as served by the flag store.
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::FlagEvaluationError, Result};

/// An immutable table of feature definitions.
///
/// Tables are never modified in place. A refresh produces a new table (with a new
/// [`id`](FlagTable::id)) which replaces the old one completely, so anyone holding an
/// `Arc<FlagTable>` observes a consistent view for as long as they keep it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagTable {
    #[serde(skip_deserializing, default = "next_table_id")]
    id: u64,
    #[serde(skip_deserializing, default = "Utc::now")]
    fetched_at: DateTime<Utc>,
    #[serde(default)]
    features: HashMap<String, TryParse<Arc<Feature>>>,
}

static TABLE_IDS: AtomicU64 = AtomicU64::new(1);

fn next_table_id() -> u64 {
    TABLE_IDS.fetch_add(1, Ordering::Relaxed)
}

impl FlagTable {
    /// Build a table from already-parsed features.
    pub fn new(features: impl IntoIterator<Item = Feature>) -> FlagTable {
        FlagTable {
            id: next_table_id(),
            fetched_at: Utc::now(),
            features: features
                .into_iter()
                .map(|feature| (feature.key.clone(), TryParse::Parsed(Arc::new(feature))))
                .collect(),
        }
    }

    /// Parse a table from its JSON document.
    pub fn from_json(json: &str) -> Result<FlagTable> {
        Ok(serde_json::from_str(json)?)
    }

    /// Process-unique identifier of this table. Two tables never share an id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Timestamp when the table was received.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Look up a feature definition.
    ///
    /// Returns `Ok(None)` for unknown flags and an error if the flag is present but its definition
    /// failed to parse.
    pub fn feature(&self, flag_key: &str) -> Result<Option<&Arc<Feature>>> {
        match self.features.get(flag_key) {
            None => Ok(None),
            Some(TryParse::Parsed(feature)) => Ok(Some(feature)),
            Some(TryParse::ParseFailed(_)) => {
                log::warn!(target: "feature_lookup", flag_key; "flag definition failed to parse");
                Err(FlagEvaluationError::ConfigurationParseError.into())
            }
        }
    }

    /// Global enablement of a flag. Unknown flags are disabled.
    pub fn is_enabled(&self, flag_key: &str) -> Result<bool> {
        Ok(self
            .feature(flag_key)?
            .is_some_and(|feature| feature.enabled))
    }

    /// Get a set of all known flags, including ones that failed to parse.
    pub fn flag_keys(&self) -> HashSet<String> {
        self.features.keys().cloned().collect()
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// A single feature flag: global switch plus optional targeting filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub key: String,
    pub enabled: bool,
    /// Filters that narrow down who sees an enabled feature. Empty means everyone.
    #[serde(default)]
    pub enabled_for: Vec<FeatureFilter>,
}

/// A named filter with its parameters.
///
/// Only targeting filters (`Targeting` or `Microsoft.Targeting`) are understood. Filters with
/// any other name never match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFilter {
    pub name: String,
    #[serde(default)]
    pub parameters: FilterParameters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterParameters {
    #[serde(default, alias = "Audience")]
    pub audience: Option<Audience>,
}

/// Users and groups a targeting filter is aimed at.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    #[serde(default, alias = "Users")]
    pub users: HashSet<String>,
    #[serde(default, alias = "Groups")]
    pub groups: HashSet<String>,
}

impl FeatureFilter {
    /// Targeting filter aimed at the given users and groups.
    pub fn targeting<U, G>(users: U, groups: G) -> FeatureFilter
    where
        U: IntoIterator,
        U::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        FeatureFilter {
            name: FeatureFilter::TARGETING.to_owned(),
            parameters: FilterParameters {
                audience: Some(Audience {
                    users: users.into_iter().map(Into::into).collect(),
                    groups: groups.into_iter().map(Into::into).collect(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Read};

    use super::{FlagTable, TryParse};

    #[test]
    fn parse_features_fixture() {
        let mut json = String::new();
        File::open("tests/data/features.json")
            .expect("Failed to open tests/data/features.json")
            .read_to_string(&mut json)
            .unwrap();

        let table = FlagTable::from_json(&json).unwrap();

        assert!(table.is_enabled("new-checkout").unwrap());
        assert!(!table.is_enabled("legacy-banner").unwrap());
        assert!(!table.is_enabled("missing").unwrap());
    }

    #[test]
    fn parse_partially_if_unexpected() {
        let table = FlagTable::from_json(
            r#"
              {
                "features": {
                  "success": {
                    "key": "success",
                    "enabled": true,
                    "enabledFor": []
                  },
                  "fail_parsing": {
                    "key": "fail_parsing",
                    "enabled": "sometimes"
                  }
                }
              }
            "#,
        )
        .unwrap();

        assert!(matches!(
            table.features.get("success").unwrap(),
            TryParse::Parsed(_)
        ));
        assert!(matches!(
            table.features.get("fail_parsing").unwrap(),
            TryParse::ParseFailed(_)
        ));
        assert!(table.is_enabled("fail_parsing").is_err());
    }

    #[test]
    fn parse_azure_style_audience() {
        let table = FlagTable::from_json(
            r#"
              {
                "features": {
                  "beta": {
                    "key": "beta",
                    "enabled": true,
                    "enabledFor": [
                      {
                        "name": "Microsoft.Targeting",
                        "parameters": { "Audience": { "Users": ["alice"], "Groups": ["beta"] } }
                      }
                    ]
                  }
                }
              }
            "#,
        )
        .unwrap();

        let feature = table.feature("beta").unwrap().unwrap();
        let audience = feature.enabled_for[0].parameters.audience.as_ref().unwrap();
        assert!(audience.users.contains("alice"));
        assert!(audience.groups.contains("beta"));
    }

    #[test]
    fn tables_get_distinct_ids() {
        let a = FlagTable::new([]);
        let b = FlagTable::new([]);

        assert_ne!(a.id(), b.id());
    }
}
