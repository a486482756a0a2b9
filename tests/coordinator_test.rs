//! Integration tests for the update coordinator.
//!
//! Run with: cargo test --test coordinator_test

mod support;

use chrono::{Duration as TimeDelta, TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use chart_history::sync::UpdateCoordinator;

use support::{CountingStore, FakeSource, RecordingSink, chart, entity, p, settle};

fn two_series() -> Value {
    json!({
        "cache": false,
        "series": [{ "entity": "sensor.a" }, { "entity": "sensor.b" }]
    })
}

fn coordinator(document: Value, source: &Arc<FakeSource>) -> (Arc<UpdateCoordinator>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = UpdateCoordinator::new(
        chart(document),
        source.clone(),
        CountingStore::new(),
        sink.clone(),
    );
    (coordinator, sink)
}

fn seed_states(coordinator: &UpdateCoordinator) {
    for engine in coordinator.engines() {
        engine.set_entity_state(entity(&engine.series().entity, "1"));
    }
}

#[tokio::test(start_paused = true)]
async fn first_load_waits_for_every_entity() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(two_series(), &source);

    coordinator.on_state_change(entity("sensor.a", "1"));
    settle().await;
    assert_eq!(sink.count(), 0);
    assert!(!coordinator.is_data_loaded());

    coordinator.on_state_change(entity("sensor.b", "2"));
    settle().await;
    assert_eq!(sink.count(), 1);
    assert!(coordinator.is_data_loaded());

    let snapshot = sink.last().unwrap();
    assert_eq!(snapshot.series.len(), 2);
    assert_eq!(snapshot.series[0].entity, "sensor.a");
    assert_eq!(snapshot.series[1].entity, "sensor.b");
}

#[tokio::test(start_paused = true)]
async fn state_changes_after_load_are_debounced() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(two_series(), &source);
    coordinator.on_state_change(entity("sensor.a", "1"));
    coordinator.on_state_change(entity("sensor.b", "1"));
    settle().await;
    assert_eq!(sink.count(), 1);

    // Same state again is not a change
    coordinator.on_state_change(entity("sensor.a", "1"));
    assert!(!coordinator.has_pending_update());

    coordinator.on_state_change(entity("sensor.a", "2"));
    tokio::time::advance(Duration::from_millis(200)).await;
    coordinator.on_state_change(entity("sensor.a", "3"));
    tokio::time::advance(Duration::from_millis(200)).await;
    coordinator.on_state_change(entity("sensor.b", "4"));
    settle().await;
    assert!(coordinator.has_pending_update());
    assert_eq!(sink.count(), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(sink.count(), 2);
    assert!(!coordinator.has_pending_update());
}

#[tokio::test(start_paused = true)]
async fn hidden_series_changes_are_ignored() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(
        json!({
            "cache": false,
            "series": [
                { "entity": "sensor.a" },
                { "entity": "sensor.b", "show": { "in_chart": false, "in_header": false } }
            ]
        }),
        &source,
    );
    coordinator.on_state_change(entity("sensor.b", "1"));
    coordinator.on_state_change(entity("sensor.a", "1"));
    settle().await;
    assert_eq!(sink.count(), 1);

    coordinator.on_state_change(entity("sensor.b", "2"));
    assert!(!coordinator.has_pending_update());

    coordinator.on_state_change(entity("sensor.a", "2"));
    assert!(coordinator.has_pending_update());
}

#[tokio::test(start_paused = true)]
async fn update_interval_replaces_state_driven_updates() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(
        json!({
            "cache": false,
            "update_interval": "10s",
            "series": [{ "entity": "sensor.a" }]
        }),
        &source,
    );
    seed_states(&coordinator);

    coordinator.start().await;
    assert_eq!(sink.count(), 1);

    coordinator.on_state_change(entity("sensor.a", "7"));
    assert!(!coordinator.has_pending_update());

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(sink.count(), 2);

    coordinator.shutdown();
    tokio::time::advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(sink.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_update_is_skipped() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(two_series(), &source);
    seed_states(&coordinator);

    let (first, second) = tokio::join!(coordinator.update(), coordinator.update());

    assert!(first);
    assert!(!second);
    assert_eq!(sink.count(), 1);
    assert!(!coordinator.is_updating());
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_in_flight_results() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(two_series(), &source);
    seed_states(&coordinator);

    let (updated, ()) = tokio::join!(coordinator.update(), async { coordinator.shutdown() });

    assert!(!updated);
    assert_eq!(sink.count(), 0);
    assert!(!coordinator.is_data_loaded());

    coordinator.request_update();
    assert!(!coordinator.has_pending_update());
    assert!(!coordinator.update().await);
}

#[tokio::test(start_paused = true)]
async fn request_update_coalesces_bursts() {
    let source = FakeSource::new();
    let (coordinator, sink) = coordinator(two_series(), &source);
    seed_states(&coordinator);

    for _ in 0..5 {
        coordinator.request_update();
        tokio::time::advance(Duration::from_millis(100)).await;
    }
    settle().await;
    assert_eq!(sink.count(), 0);

    tokio::time::advance(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn snapshot_is_shaped_for_the_chart() {
    let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
    let ms = |delta: TimeDelta| (now + delta).timestamp_millis();

    let source = FakeSource::new();
    source.push_history("sensor.a", ms(-TimeDelta::hours(2)), "1");
    source.push_history("sensor.a", ms(-TimeDelta::hours(1)), "2");
    source.push_history("sensor.b", ms(-TimeDelta::hours(2)), "5");
    source.push_history("sensor.b", ms(-TimeDelta::minutes(30)), "6");
    let (coordinator, sink) = coordinator(
        json!({
            "graph_span": "3h",
            "cache": false,
            "series": [
                { "entity": "sensor.a", "invert": true },
                { "entity": "sensor.b", "extend_to": false, "show": { "in_header": "before_now" } }
            ]
        }),
        &source,
    );
    seed_states(&coordinator);

    assert!(coordinator.update_at(&now).await);

    let snapshot = sink.last().unwrap();
    assert_eq!(snapshot.generated_at, now);
    assert_eq!(snapshot.window.end, now);
    assert_eq!(
        snapshot.window.start,
        now - TimeDelta::hours(3) + TimeDelta::milliseconds(1)
    );

    let a = &snapshot.series[0];
    assert_eq!(
        a.data,
        vec![
            p(ms(-TimeDelta::hours(2)), Some(-1.0)),
            p(ms(-TimeDelta::hours(1)), Some(-2.0)),
            p(ms(TimeDelta::zero()), Some(-2.0)),
        ]
    );
    assert_eq!(a.last_state, Some(2.0));
    assert_eq!(a.header_value, Some(2.0));
    assert_eq!(a.min, Some(1.0));
    assert_eq!(a.max, Some(2.0));

    let b = &snapshot.series[1];
    assert_eq!(b.data.len(), 2);
    assert_eq!(b.header_value, Some(6.0));
    let extrema = b.extrema.unwrap();
    assert_eq!(extrema.min.value, Some(5.0));
    assert_eq!(extrema.max.value, Some(6.0));
}
