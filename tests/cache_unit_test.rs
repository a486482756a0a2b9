//! Unit tests for cache module.
//!
//! Run with: cargo test --test cache_unit_test

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use chart_history::chart::{ChartConfig, SeriesSpec, SpanSpec};
use chart_history::engine::ObservationPoint;
use chart_history::services::cache::{
    self, CacheEntry, MokaStore, PersistentCache, StoredBlob,
};

#[test]
fn cache_key_builds_correctly() {
    assert_eq!(cache::cache_key("sensor.temp", "abc123", true), "sensor.temp_abc123");
    assert_eq!(
        cache::cache_key("sensor.temp", "abc123", false),
        "sensor.temp_abc123-raw"
    );

    // Storage form is part of the key
    assert_ne!(
        cache::cache_key("sensor.temp", "abc123", true),
        cache::cache_key("sensor.temp", "abc123", false)
    );
}

#[test]
fn fingerprint_is_stable_and_sensitive() {
    let series = SeriesSpec {
        entity: "sensor.temp".to_string(),
        ..SeriesSpec::default()
    };
    let span = SpanSpec::default();
    let base = cache::fingerprint(86_400_000, &series, &span);

    assert_eq!(base.len(), 32);
    assert!(base.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(base, cache::fingerprint(86_400_000, &series, &span));

    assert_ne!(base, cache::fingerprint(3_600_000, &series, &span));

    let with_attribute = SeriesSpec {
        attribute: Some("humidity".to_string()),
        ..series.clone()
    };
    assert_ne!(base, cache::fingerprint(86_400_000, &with_attribute, &span));

    let shifted = SpanSpec {
        offset: Some("-1d".to_string()),
        ..SpanSpec::default()
    };
    assert_ne!(base, cache::fingerprint(86_400_000, &series, &shifted));
}

#[test]
fn effective_options_change_the_fingerprint() {
    let key = |document| {
        let chart = ChartConfig::from_json(document).unwrap();
        cache::fingerprint(chart.graph_span_ms, &chart.series[0].source, &chart.span)
    };

    let plain = key(json!({ "series": [{ "entity": "sensor.temp" }] }));
    // Spelling out a default is the same configuration
    assert_eq!(
        plain,
        key(json!({ "series": [{ "entity": "sensor.temp", "group_by": { "func": "raw" } }] }))
    );
    assert_ne!(
        plain,
        key(json!({ "series": [{ "entity": "sensor.temp", "group_by": { "func": "avg" } }] }))
    );
    assert_ne!(
        plain,
        key(json!({ "series": [{ "entity": "sensor.temp", "transform": "x * 2" }] }))
    );
}

#[tokio::test]
async fn sweep_removes_stale_entries() {
    let store = MokaStore::new(1024 * 1024);
    let now = Utc::now();
    let points = vec![ObservationPoint::new(0, Some(1.0))];

    let fresh = CacheEntry::new(now.timestamp_millis() - 3_600_000, points.clone());
    store
        .set("fresh", StoredBlob::encode(fresh, true).unwrap())
        .await
        .unwrap();

    let foreign = CacheEntry {
        fingerprint_version: "0.0.0".to_string(),
        ..CacheEntry::new(now.timestamp_millis() - 3_600_000, points.clone())
    };
    store
        .set("foreign", StoredBlob::encode(foreign, false).unwrap())
        .await
        .unwrap();

    // Fetched two hours ago, covering one hour
    let fetched = now - Duration::hours(2);
    let expired = CacheEntry {
        fingerprint_version: cache::FINGERPRINT_VERSION.to_string(),
        span_covered_from_ms: (fetched - Duration::hours(1)).timestamp_millis(),
        last_fetched_at: fetched,
        data: points,
    };
    store
        .set("expired", StoredBlob::encode(expired, false).unwrap())
        .await
        .unwrap();

    store
        .set("garbage", StoredBlob::Compressed(Arc::new(b"not gzip".to_vec())))
        .await
        .unwrap();

    let removed = cache::sweep(&store, now).await.unwrap();

    assert_eq!(removed, 3);
    assert!(store.get("fresh").await.unwrap().is_some());
    for key in ["foreign", "expired", "garbage"] {
        assert!(store.get(key).await.unwrap().is_none(), "{key} should be swept");
    }
}

#[test]
fn expiry_follows_covered_span() {
    let now = Utc::now();
    let entry = CacheEntry {
        fingerprint_version: cache::FINGERPRINT_VERSION.to_string(),
        span_covered_from_ms: (now - Duration::hours(24)).timestamp_millis(),
        last_fetched_at: now - Duration::hours(1),
        data: Vec::new(),
    };
    assert!(!entry.is_expired(now));
    assert!(entry.is_expired(now + Duration::hours(24)));
}
