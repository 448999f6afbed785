use std::time::Duration;

use sensor_api::SettingsStore;
use sensor_engine::Settings;
use sensor_engine::SettingsError;
use sensor_engine::settings::{MAX_AGE_KEY, STORE_INTERVAL_KEY, lookup};
use storage_memory::MemoryStorage;

#[tokio::test]
async fn load_seeds_defaults_and_applies_stored_values() {
    let store = MemoryStorage::default();
    store.upsert_setting(STORE_INTERVAL_KEY, "5").await.unwrap();

    let settings = Settings::default();
    settings.load(&store).await.unwrap();

    assert_eq!(settings.store_interval(), Duration::from_secs(5));
    assert_eq!(settings.max_age(), Duration::from_secs(2_678_400));
    assert_eq!(store.setting(MAX_AGE_KEY).await.unwrap().unwrap().value, "2678400");
}

#[tokio::test]
async fn load_skips_unparseable_rows() {
    let store = MemoryStorage::default();
    store.upsert_setting(MAX_AGE_KEY, "forever").await.unwrap();

    let settings = Settings::default();
    settings.load(&store).await.unwrap();
    assert_eq!(settings.max_age(), Duration::from_secs(2_678_400));
}

#[tokio::test]
async fn update_persists_then_applies() {
    let store = MemoryStorage::default();
    let settings = Settings::default();

    let item = settings.update(&store, STORE_INTERVAL_KEY, " 0.25 ").await.unwrap();
    assert_eq!(item.value, "0.25");
    assert_eq!(settings.store_interval(), Duration::from_millis(250));
    assert_eq!(store.setting(STORE_INTERVAL_KEY).await.unwrap().unwrap().value, "0.25");
}

#[tokio::test]
async fn update_rejects_bad_input_without_touching_state() {
    let store = MemoryStorage::default();
    let settings = Settings::default();

    let err = settings.update(&store, MAX_AGE_KEY, "-10").await.unwrap_err();
    assert!(matches!(err, SettingsError::InvalidValue { .. }));
    let err = settings.update(&store, "colour", "1").await.unwrap_err();
    assert!(matches!(err, SettingsError::UnknownKey(_)));

    assert_eq!(settings.max_age(), Duration::from_secs(2_678_400));
    assert!(store.settings().await.unwrap().is_empty());
}

#[tokio::test]
async fn lookup_falls_back_to_default() {
    let store = MemoryStorage::default();
    let item = lookup(&store, STORE_INTERVAL_KEY).await.unwrap();
    assert_eq!(item.value, "60");
    assert_eq!(item.updated_at_ms, 0);

    store.upsert_setting(STORE_INTERVAL_KEY, "10").await.unwrap();
    assert_eq!(lookup(&store, STORE_INTERVAL_KEY).await.unwrap().value, "10");

    assert!(matches!(
        lookup(&store, "missing").await,
        Err(SettingsError::UnknownKey(_))
    ));
}
