use std::sync::Arc;

use feature_lookup::{
    ConfigurationStore, FeatureLookup, FlagQuery, FlagTable, LookupConfig, LookupService,
};

#[tokio::main]
pub async fn main() -> feature_lookup::Result<()> {
    env_logger::init();

    let mut config = LookupConfig::from_env()?;
    config.snapshot_enabled(true);

    // Seed the store from the bundled fixture. A deployment would use `LookupService::start_remote`.
    let store = Arc::new(ConfigurationStore::new());
    let json = std::fs::read_to_string("tests/data/features.json")?;
    store.set_configuration(Arc::new(FlagTable::from_json(&json)?));

    let service = LookupService::start(&config, store.clone())?;

    let (before, after) = service
        .coordinator()
        .run(async {
            let query = FlagQuery::builder("new-checkout")
                .subject_id("test-subject")
                .build()?;
            let before = service.lookup_async(&query).await?;

            // Refreshing the store mid-request does not change what this request sees.
            store.set_configuration(Arc::new(FlagTable::new([])));
            let after = service.lookup_async(&query).await?;

            Ok::<_, feature_lookup::Error>((before, after))
        })
        .await?;

    println!("Within the request: before refresh {before}, after refresh {after}");

    let query = FlagQuery::builder("new-checkout").default_value(true).build()?;
    println!("After the request: {}", service.lookup(&query));

    service.shutdown()
}
