//! Flags read once from a static JSON file.
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use futures::{future::BoxFuture, FutureExt};
use serde::Deserialize;

use crate::{FeatureLookup, FlagQuery, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocalFeature {
    enabled: bool,
    users: HashSet<String>,
    groups: HashSet<String>,
}

/// [`FeatureLookup`] over a fixed map of flags.
///
/// The file is a JSON object keyed by flag name:
///
/// ```json
/// { "beta-dashboard": { "enabled": true, "users": ["alice"], "groups": ["beta"] } }
/// ```
///
/// There are no snapshots and no refreshes. Lookups never fail.
#[derive(Debug)]
pub struct LocalFeatureLookup {
    features: HashMap<String, LocalFeature>,
}

impl LocalFeatureLookup {
    pub fn from_path(path: impl AsRef<Path>) -> Result<LocalFeatureLookup> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let lookup = LocalFeatureLookup::from_json(&json)?;
        log::debug!(target: "feature_lookup", path:display = path.as_ref().display(), count = lookup.features.len(); "loaded local features");
        Ok(lookup)
    }

    pub fn from_json(json: &str) -> Result<LocalFeatureLookup> {
        Ok(LocalFeatureLookup {
            features: serde_json::from_str(json)?,
        })
    }

    fn evaluate(&self, query: &FlagQuery) -> bool {
        let Some(feature) = self.features.get(query.name()) else {
            return query.default_value();
        };

        if let Some(subject_id) = query.subject_id().filter(|id| !id.is_empty()) {
            if !feature.users.is_empty() {
                return feature.enabled && feature.users.contains(subject_id);
            }
        }

        if !query.groups().is_empty() && !feature.groups.is_empty() {
            return feature.enabled
                && query
                    .groups()
                    .iter()
                    .any(|group| feature.groups.contains(group));
        }

        feature.enabled
    }
}

impl FeatureLookup for LocalFeatureLookup {
    fn lookup(&self, query: &FlagQuery) -> bool {
        self.evaluate(query)
    }

    fn lookup_async<'a>(&'a self, query: &'a FlagQuery) -> BoxFuture<'a, Result<bool>> {
        futures::future::ready(Ok(self.evaluate(query))).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::LocalFeatureLookup;
    use crate::{FeatureLookup, FlagQuery};

    fn lookup() -> LocalFeatureLookup {
        LocalFeatureLookup::from_path("tests/data/local-features.json").unwrap()
    }

    fn query(name: &str, subject_id: Option<&str>, groups: &[&str]) -> FlagQuery {
        let mut builder = FlagQuery::builder(name).groups(groups.iter().copied());
        if let Some(subject_id) = subject_id {
            builder = builder.subject_id(subject_id);
        }
        builder.build().unwrap()
    }

    #[test]
    fn unknown_flag_returns_default() {
        let lookup = lookup();

        let with_default = FlagQuery::builder("missing").default_value(true).build().unwrap();

        assert!(lookup.lookup(&with_default));
        assert!(!lookup.lookup(&query("missing", None, &[])));
    }

    #[test]
    fn global_switch_without_targeting() {
        let lookup = lookup();

        assert!(lookup.lookup(&query("new-checkout", Some("anyone"), &["x"])));
        assert!(!lookup.lookup(&query("legacy-banner", None, &[])));
    }

    #[test]
    fn users_decide_when_subject_present() {
        let lookup = lookup();

        assert!(lookup.lookup(&query("beta-dashboard", Some("alice"), &[])));
        // Users take precedence over groups once a subject id is given.
        assert!(!lookup.lookup(&query("beta-dashboard", Some("bob"), &["beta"])));
        // Globally disabled stays disabled even for listed users.
        assert!(!lookup.lookup(&query("legacy-banner", Some("alice"), &[])));
    }

    #[test]
    fn groups_decide_without_users() {
        let lookup = lookup();

        assert!(lookup.lookup(&query("dark-mode", Some("bob"), &["staff", "x"])));
        assert!(!lookup.lookup(&query("dark-mode", None, &["x"])));
        assert!(lookup.lookup(&query("beta-dashboard", None, &["beta"])));
        // No query groups falls back to the global switch.
        assert!(lookup.lookup(&query("dark-mode", None, &[])));
    }

    #[tokio::test]
    async fn async_lookup_matches_blocking() {
        let lookup = lookup();
        let query = query("beta-dashboard", Some("alice"), &[]);

        assert_eq!(lookup.lookup_async(&query).await.unwrap(), lookup.lookup(&query));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(LocalFeatureLookup::from_path("tests/data/does-not-exist.json").is_err());
    }
}
