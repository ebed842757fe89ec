use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{DisabledLookup, Error, FeatureLookup, LocalFeatureLookup, LookupService, Result};

/// Configuration for [`ReclaimingCache`](crate::ReclaimingCache).
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Whether evaluation results are cached at all.
    pub enabled: bool,
    /// Number of entries the cache is initially sized for. Must be in `8..=128`.
    pub min: usize,
    /// Hard upper bound on the number of entries. Must be in `16..=4096`.
    pub max: usize,
    /// Fill ratio at which the cache grows its allocation. Must be in `0.50..=1.00`.
    pub load_factor: f32,
}

impl CacheConfig {
    pub const DEFAULT_MIN: usize = 64;
    pub const DEFAULT_MAX: usize = 2048;
    pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

    pub fn new() -> CacheConfig {
        CacheConfig::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> CacheConfig {
        self.enabled = enabled;
        self
    }

    pub fn with_min(mut self, min: usize) -> CacheConfig {
        self.min = min;
        self
    }

    pub fn with_max(mut self, max: usize) -> CacheConfig {
        self.max = max;
        self
    }

    pub fn with_load_factor(mut self, load_factor: f32) -> CacheConfig {
        self.load_factor = load_factor;
        self
    }

    /// Check that all bounds are within their allowed ranges.
    pub fn validate(&self) -> Result<()> {
        if !(8..=128).contains(&self.min) {
            return Err(invalid("cache.min", "must be between 8 and 128"));
        }
        if !(16..=4096).contains(&self.max) {
            return Err(invalid("cache.max", "must be between 16 and 4096"));
        }
        if !(0.5..=1.0).contains(&self.load_factor) {
            return Err(invalid("cache.loadFactor", "must be between 0.50 and 1.00"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> CacheConfig {
        CacheConfig {
            enabled: true,
            min: CacheConfig::DEFAULT_MIN,
            max: CacheConfig::DEFAULT_MAX,
            load_factor: CacheConfig::DEFAULT_LOAD_FACTOR,
        }
    }
}

/// Where flag definitions come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// A remote flag store polled over HTTP.
    RemoteStore,
    /// A static JSON file loaded once at startup.
    LocalFile,
    #[default]
    Unspecified,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<StoreKind> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "remote-store" => Ok(StoreKind::RemoteStore),
            "local-file" => Ok(StoreKind::LocalFile),
            "unspecified" | "" => Ok(StoreKind::Unspecified),
            _ => Err(invalid(
                "featureManagement.type",
                "expected one of remote-store, local-file, unspecified",
            )),
        }
    }
}

/// Feature management switches and flag store coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureManagementConfig {
    pub enabled: bool,
    /// Evaluate lookups against per-request snapshots. When `false`, the shared default snapshot
    /// is always used.
    pub snapshot_enabled: bool,
    pub kind: StoreKind,
    /// Path to the features file for [`StoreKind::LocalFile`].
    pub features_path: Option<PathBuf>,
    /// Base URL of the remote flag store for [`StoreKind::RemoteStore`].
    pub base_url: String,
    pub api_key: Option<String>,
    /// Interval between remote store refreshes.
    pub poll_interval: Duration,
}

impl FeatureManagementConfig {
    /// Default base URL for the remote flag store.
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:8080";
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
}

impl Default for FeatureManagementConfig {
    fn default() -> FeatureManagementConfig {
        FeatureManagementConfig {
            enabled: false,
            snapshot_enabled: false,
            kind: StoreKind::Unspecified,
            features_path: None,
            base_url: FeatureManagementConfig::DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            poll_interval: FeatureManagementConfig::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Complete configuration for building a [`FeatureLookup`](crate::FeatureLookup).
///
/// ```
/// # use feature_lookup::{LookupConfig, StoreKind};
/// let config = LookupConfig::from_properties([
///     ("featureManagement.enabled", "true"),
///     ("featureManagement.snapshotEnabled", "true"),
///     ("featureManagement.type", "remote-store"),
///     ("cache.max", "512"),
/// ])
/// .unwrap();
///
/// assert_eq!(config.feature_management.kind, StoreKind::RemoteStore);
/// assert_eq!(config.cache.max, 512);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupConfig {
    pub cache: CacheConfig,
    pub feature_management: FeatureManagementConfig,
}

impl LookupConfig {
    pub fn new() -> LookupConfig {
        LookupConfig::default()
    }

    pub fn cache(&mut self, cache: CacheConfig) -> &mut Self {
        self.cache = cache;
        self
    }

    pub fn snapshot_enabled(&mut self, snapshot_enabled: bool) -> &mut Self {
        self.feature_management.snapshot_enabled = snapshot_enabled;
        self
    }

    /// Parse configuration from `(option, value)` pairs. Unknown options are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] naming the first option that fails to parse or is
    /// out of range.
    pub fn from_properties<I, K, V>(properties: I) -> Result<LookupConfig>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = LookupConfig::default();

        for (key, value) in properties {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            let cache = &mut config.cache;
            let management = &mut config.feature_management;
            match key {
                "cache.enabled" => cache.enabled = parse(key, value)?,
                "cache.min" => cache.min = parse(key, value)?,
                "cache.max" => cache.max = parse(key, value)?,
                "cache.loadFactor" => cache.load_factor = parse(key, value)?,
                "featureManagement.enabled" => management.enabled = parse(key, value)?,
                "featureManagement.snapshotEnabled" => {
                    management.snapshot_enabled = parse(key, value)?
                }
                "featureManagement.type" => management.kind = value.parse()?,
                "featureManagement.features" => {
                    management.features_path = Some(PathBuf::from(value))
                }
                "featureManagement.baseUrl" => management.base_url = value.to_owned(),
                "featureManagement.apiKey" => management.api_key = Some(value.to_owned()),
                "featureManagement.pollInterval" => {
                    management.poll_interval = Duration::from_secs(parse(key, value)?)
                }
                _ => {
                    log::debug!(target: "feature_lookup", option = key; "ignoring unknown configuration option");
                }
            }
        }

        config.cache.validate()?;
        Ok(config)
    }

    /// Build the lookup selected by `feature_management.kind`.
    ///
    /// Disabled feature management or an unspecified store yield a [`DisabledLookup`]. Use
    /// [`LookupService::start_remote`] directly when request scopes are needed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if a local file store has no features path.
    /// - IO and JSON errors while loading local features.
    /// - [`Error::Io`] if a worker thread failed to start.
    pub fn to_lookup(&self) -> Result<Box<dyn FeatureLookup>> {
        let management = &self.feature_management;
        if !management.enabled {
            return Ok(Box::new(DisabledLookup));
        }

        match management.kind {
            StoreKind::Unspecified => Ok(Box::new(DisabledLookup)),
            StoreKind::LocalFile => {
                let path = management.features_path.as_ref().ok_or_else(|| {
                    invalid("featureManagement.features", "required for local-file store")
                })?;
                Ok(Box::new(LocalFeatureLookup::from_path(path)?))
            }
            StoreKind::RemoteStore => Ok(Box::new(LookupService::start_remote(self)?)),
        }
    }

    /// Read configuration from `FEATURE_LOOKUP_*` environment variables.
    ///
    /// Each option maps to an upper-snake-case variable: `cache.loadFactor` is read from
    /// `FEATURE_LOOKUP_CACHE_LOAD_FACTOR`, `featureManagement.snapshotEnabled` from
    /// `FEATURE_LOOKUP_FEATURE_MANAGEMENT_SNAPSHOT_ENABLED`, and so on.
    pub fn from_env() -> Result<LookupConfig> {
        LookupConfig::from_properties(OPTIONS.iter().filter_map(|option| {
            std::env::var(env_var_name(option))
                .ok()
                .map(|value| (*option, value))
        }))
    }
}

const OPTIONS: &[&str] = &[
    "cache.enabled",
    "cache.min",
    "cache.max",
    "cache.loadFactor",
    "featureManagement.enabled",
    "featureManagement.snapshotEnabled",
    "featureManagement.type",
    "featureManagement.features",
    "featureManagement.baseUrl",
    "featureManagement.apiKey",
    "featureManagement.pollInterval",
];

fn env_var_name(option: &str) -> String {
    let mut name = String::from("FEATURE_LOOKUP_");
    for c in option.chars() {
        match c {
            '.' => name.push('_'),
            c if c.is_ascii_uppercase() => {
                name.push('_');
                name.push(c);
            }
            c => name.push(c.to_ascii_uppercase()),
        }
    }
    name
}

fn parse<T: FromStr>(option: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(option, &format!("cannot parse {value:?}")))
}

fn invalid(option: &str, reason: &str) -> Error {
    Error::InvalidConfiguration(format!("{option}: {reason}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{env_var_name, CacheConfig, LookupConfig, StoreKind};
    use crate::{Error, FeatureLookup, FlagQuery};

    #[test]
    fn defaults() {
        let config = LookupConfig::from_properties(Vec::<(String, String)>::new()).unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.min, 64);
        assert_eq!(config.cache.max, 2048);
        assert_eq!(config.cache.load_factor, 0.75);
        assert!(!config.feature_management.enabled);
        assert!(!config.feature_management.snapshot_enabled);
        assert_eq!(config.feature_management.kind, StoreKind::Unspecified);
    }

    #[test]
    fn parses_all_recognized_options() {
        let config = LookupConfig::from_properties([
            ("cache.enabled", "false"),
            ("cache.min", "8"),
            ("cache.max", "16"),
            ("cache.loadFactor", "0.5"),
            ("featureManagement.enabled", "true"),
            ("featureManagement.snapshotEnabled", "true"),
            ("featureManagement.type", "local-file"),
            ("featureManagement.features", "features.json"),
            ("featureManagement.pollInterval", "5"),
            ("something.else", "ignored"),
        ])
        .unwrap();

        assert_eq!(
            config.cache,
            CacheConfig::new()
                .with_enabled(false)
                .with_min(8)
                .with_max(16)
                .with_load_factor(0.5)
        );
        assert!(config.feature_management.enabled);
        assert!(config.feature_management.snapshot_enabled);
        assert_eq!(config.feature_management.kind, StoreKind::LocalFile);
        assert_eq!(
            config.feature_management.features_path.as_deref(),
            Some(std::path::Path::new("features.json"))
        );
        assert_eq!(
            config.feature_management.poll_interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn rejects_out_of_range_bounds() {
        for (option, value) in [
            ("cache.min", "4"),
            ("cache.min", "129"),
            ("cache.max", "8"),
            ("cache.max", "5000"),
            ("cache.loadFactor", "0.49"),
            ("cache.loadFactor", "1.01"),
        ] {
            let err = LookupConfig::from_properties([(option, value)]).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidConfiguration(msg) if msg.starts_with(option)),
                "{option}={value} produced {err:?}"
            );
        }
    }

    #[test]
    fn rejects_unparseable_values() {
        assert!(LookupConfig::from_properties([("cache.enabled", "yes")]).is_err());
        assert!(LookupConfig::from_properties([("featureManagement.type", "darkly")]).is_err());
    }

    #[test]
    fn store_kind_accepts_enum_style_names() {
        assert_eq!("REMOTE_STORE".parse::<StoreKind>().unwrap(), StoreKind::RemoteStore);
        assert_eq!("Local-File".parse::<StoreKind>().unwrap(), StoreKind::LocalFile);
    }

    #[test]
    fn env_var_names() {
        assert_eq!(env_var_name("cache.min"), "FEATURE_LOOKUP_CACHE_MIN");
        assert_eq!(
            env_var_name("cache.loadFactor"),
            "FEATURE_LOOKUP_CACHE_LOAD_FACTOR"
        );
        assert_eq!(
            env_var_name("featureManagement.snapshotEnabled"),
            "FEATURE_LOOKUP_FEATURE_MANAGEMENT_SNAPSHOT_ENABLED"
        );
    }

    #[test]
    fn disabled_management_builds_disabled_lookup() {
        let config = LookupConfig::from_properties([
            ("featureManagement.enabled", "false"),
            ("featureManagement.type", "local-file"),
            ("featureManagement.features", "tests/data/local-features.json"),
        ])
        .unwrap();
        let query = FlagQuery::builder("new-checkout").default_value(true).build().unwrap();

        assert!(!config.to_lookup().unwrap().lookup(&query));
    }

    #[test]
    fn local_file_lookup_from_config() {
        let config = LookupConfig::from_properties([
            ("featureManagement.enabled", "true"),
            ("featureManagement.type", "local-file"),
            ("featureManagement.features", "tests/data/local-features.json"),
        ])
        .unwrap();
        let query = FlagQuery::builder("new-checkout").build().unwrap();

        assert!(config.to_lookup().unwrap().lookup(&query));
    }

    #[test]
    fn local_file_requires_path() {
        let config = LookupConfig::from_properties([
            ("featureManagement.enabled", "true"),
            ("featureManagement.type", "local-file"),
        ])
        .unwrap();

        assert!(matches!(
            config.to_lookup(),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
