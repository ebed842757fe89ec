use std::collections::BTreeSet;

use crate::features::{Audience, Feature, FeatureFilter};

/// Identity a targeting filter is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct TargetingSubject<'a> {
    pub subject_id: Option<&'a str>,
    pub groups: &'a BTreeSet<String>,
}

impl<'a> TargetingSubject<'a> {
    pub fn new(subject_id: Option<&'a str>, groups: &'a BTreeSet<String>) -> Self {
        TargetingSubject { subject_id, groups }
    }

    /// Targeting is only possible when the subject carries an id or at least one group.
    fn is_targetable(&self) -> bool {
        self.subject_id.is_some_and(|id| !id.is_empty()) || !self.groups.is_empty()
    }
}

impl Feature {
    /// Evaluate the feature's filters for `subject`, ignoring global enablement.
    ///
    /// A feature without filters is enabled for everyone. Otherwise at least one filter has to
    /// match.
    pub fn is_enabled_for(&self, subject: &TargetingSubject) -> bool {
        self.enabled_for.is_empty()
            || self
                .enabled_for
                .iter()
                .any(|filter| filter.matches(subject))
    }
}

impl FeatureFilter {
    pub const TARGETING: &'static str = "Targeting";
    const TARGETING_QUALIFIED: &'static str = "Microsoft.Targeting";

    /// Returns `true` if the filter matches `subject`. Unknown filters never match.
    pub fn matches(&self, subject: &TargetingSubject) -> bool {
        match self.name.as_str() {
            FeatureFilter::TARGETING | FeatureFilter::TARGETING_QUALIFIED => self
                .parameters
                .audience
                .as_ref()
                .is_some_and(|audience| audience.matches(subject)),
            _ => false,
        }
    }
}

impl Audience {
    /// A direct user match or a shared group is enough.
    pub fn matches(&self, subject: &TargetingSubject) -> bool {
        if !subject.is_targetable() {
            return false;
        }

        let user_match = subject
            .subject_id
            .is_some_and(|id| self.users.contains(id));
        let group_match = subject
            .groups
            .iter()
            .any(|group| self.groups.contains(group));

        user_match || group_match
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::TargetingSubject;
    use crate::features::{Feature, FeatureFilter, FilterParameters};

    fn groups(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn feature(filters: Vec<FeatureFilter>) -> Feature {
        Feature {
            key: "flag".into(),
            enabled: true,
            enabled_for: filters,
        }
    }

    #[test]
    fn no_filters_matches_everyone() {
        let feature = feature(vec![]);
        let empty = groups(&[]);

        assert!(feature.is_enabled_for(&TargetingSubject::new(None, &empty)));
        assert!(feature.is_enabled_for(&TargetingSubject::new(Some("bob"), &groups(&["x"]))));
    }

    #[test]
    fn group_intersection() {
        let feature = feature(vec![FeatureFilter::targeting(Vec::<String>::new(), ["beta"])]);

        assert!(feature.is_enabled_for(&TargetingSubject::new(None, &groups(&["beta", "other"]))));
        assert!(!feature.is_enabled_for(&TargetingSubject::new(None, &groups(&["other"]))));
    }

    #[test]
    fn user_exact_match() {
        let feature = feature(vec![FeatureFilter::targeting(["alice"], Vec::<String>::new())]);
        let empty = groups(&[]);

        assert!(feature.is_enabled_for(&TargetingSubject::new(Some("alice"), &empty)));
        assert!(!feature.is_enabled_for(&TargetingSubject::new(Some("Alice"), &empty)));
        assert!(!feature.is_enabled_for(&TargetingSubject::new(Some("alice2"), &empty)));
    }

    #[test]
    fn either_user_or_group_is_enough() {
        let feature = feature(vec![FeatureFilter::targeting(["alice"], ["beta"])]);

        assert!(feature.is_enabled_for(&TargetingSubject::new(Some("alice"), &groups(&["x"]))));
        assert!(feature.is_enabled_for(&TargetingSubject::new(Some("bob"), &groups(&["beta"]))));
        assert!(!feature.is_enabled_for(&TargetingSubject::new(Some("bob"), &groups(&["x"]))));
    }

    #[test]
    fn any_filter_is_enough() {
        let feature = feature(vec![
            FeatureFilter::targeting(["alice"], Vec::<String>::new()),
            FeatureFilter::targeting(Vec::<String>::new(), ["beta"]),
        ]);

        assert!(feature.is_enabled_for(&TargetingSubject::new(Some("carol"), &groups(&["beta"]))));
    }

    #[test]
    fn untargetable_subject_does_not_match() {
        let feature = feature(vec![FeatureFilter::targeting(["alice"], ["beta"])]);
        let empty = groups(&[]);

        assert!(!feature.is_enabled_for(&TargetingSubject::new(None, &empty)));
        assert!(!feature.is_enabled_for(&TargetingSubject::new(Some(""), &empty)));
    }

    #[test]
    fn unknown_filter_never_matches() {
        let feature = feature(vec![FeatureFilter {
            name: "Microsoft.TimeWindow".into(),
            parameters: FilterParameters::default(),
        }]);

        assert!(!feature.is_enabled_for(&TargetingSubject::new(Some("alice"), &groups(&["beta"]))));
    }

    #[test]
    fn targeting_without_audience_never_matches() {
        let feature = feature(vec![FeatureFilter {
            name: FeatureFilter::TARGETING.into(),
            parameters: FilterParameters::default(),
        }]);

        assert!(!feature.is_enabled_for(&TargetingSubject::new(Some("alice"), &groups(&["beta"]))));
    }
}
