//! End-to-end daemon tests on the simulated platform.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeDelta, Utc};
use tokio::sync::oneshot;
use tower::ServiceExt;

use dockyard_core::{DockyardConfig, PlatformMode, QueueBackendKind};
use dockyard_lifecycle::MemoryNotificationSink;
use dockyard_platform::SimulatedPlatform;
use dockyard_queue::NotificationKind;
use dockyard_state::{CatalogEntry, PodStatus, ResourceSpec, StateStore, Subscription};
use dockyardd::Daemon;

fn fast_config() -> DockyardConfig {
    let mut config = DockyardConfig::default();
    config.state.in_memory = true;
    config.platform.mode = PlatformMode::Simulated;
    config.queue.backend = QueueBackendKind::Memory;
    config.queue.poll_interval = "20ms".into();
    config.reconciler.interval = "50ms".into();
    config.health.sweep_interval = "50ms".into();
    config.reconciler.metrics_interval = "1s".into();
    config
}

fn seed(state: &StateStore, user: &str) -> Subscription {
    state
        .put_catalog_entry(&CatalogEntry {
            id: "svc-ghost".into(),
            slug: "ghost".into(),
            display_name: "Ghost".into(),
            image: "ghost:5-alpine".into(),
            container_port: 2368,
            replicas: 1,
            resources: ResourceSpec {
                cpu_request: "100m".into(),
                cpu_limit: "500m".into(),
                memory_request: "256Mi".into(),
                memory_limit: "512Mi".into(),
            },
            env: BTreeMap::new(),
            quota: Some(5),
            in_use: 0,
        })
        .unwrap();
    let now = Utc::now();
    let sub = Subscription::new(user, "svc-ghost", user, now + TimeDelta::days(30), now);
    state.put_subscription(&sub).unwrap();
    sub
}

#[test]
fn sample_config_is_valid() {
    let config = DockyardConfig::from_toml_str(include_str!("../dockyard.toml")).unwrap();
    assert_eq!(config.lifecycle.grace_period_days, 60);
    assert_eq!(config.queue.lanes["pod"].concurrency, Some(3));
}

#[tokio::test]
async fn provisioning_request_ends_in_ready_notification() {
    let sim = Arc::new(SimulatedPlatform::new());
    let sink = Arc::new(MemoryNotificationSink::new());
    let daemon = Daemon::build_with(fast_config(), sim.clone(), sink.clone())
        .await
        .unwrap();
    let state = daemon.state.clone();
    let router = daemon.router();
    let sub = seed(&state, "alice");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(daemon.run(listener, async {
        let _ = stop_rx.await;
    }));

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/subscriptions/{}/provision", sub.id))
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let ready = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let running_instance = state
                .find_live_instance_for_subscription(&sub.id)
                .unwrap()
                .is_some_and(|i| i.status == PodStatus::Running);
            let notified = sink
                .delivered()
                .iter()
                .any(|n| n.kind == NotificationKind::PodReady);
            if running_instance && notified {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "instance never became ready");
    assert_eq!(sim.deployment_count(), 1);

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn durable_state_lands_in_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.state.in_memory = false;
    config.state.data_dir = dir.path().join("data");
    config.queue.backend = QueueBackendKind::Durable;

    let daemon = Daemon::build_with(
        config,
        Arc::new(SimulatedPlatform::new()),
        Arc::new(MemoryNotificationSink::new()),
    )
    .await
    .unwrap();
    assert!(dir.path().join("data").join("dockyard.redb").exists());
    assert!(daemon.platform.is_ready());
}
