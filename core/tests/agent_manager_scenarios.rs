//! End-to-end Agent Manager scenarios driven through the public API only:
//! memory-pressure thresholds, config-triggered recomputes, and the
//! retry/timeout rules a dispatched task is subject to. Priority preemption
//! and zero-availability slot sizing already have focused unit tests next to
//! `AgentManager` itself; these cover the cross-component behavior that only
//! shows up once the dispatch loop, monitor, and inference client are wired
//! together.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use curator_core::AgentManager;
use curator_core::Config;
use curator_core::ConfigOverrides;
use curator_core::monitor::HostMetricsSource;
use curator_core::monitor::RawHostMetrics;
use curator_inference::InferenceClient;
use curator_protocol::AnalysisType;
use curator_protocol::CuratorEvent;
use curator_protocol::Priority;
use curator_protocol::ResponseFormat;
use curator_protocol::Task;
use curator_protocol::TaskKind;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

const LEVEL_HEALTHY: u8 = 0;
const LEVEL_HARD: u8 = 1;
const LEVEL_CRITICAL: u8 = 2;

/// A host metrics source that reports plentiful memory until told to report
/// pressure, so a test can dispatch tasks first and then force a threshold
/// crossing deterministically rather than racing a real OS sample.
struct ToggleSource {
    level: AtomicU8,
}

impl ToggleSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            level: AtomicU8::new(LEVEL_HEALTHY),
        })
    }

    fn set_level(&self, level: u8) {
        self.level.store(level, Ordering::SeqCst);
    }
}

impl HostMetricsSource for ToggleSource {
    fn sample(&self) -> std::io::Result<RawHostMetrics> {
        // total_mem_mb is fixed at 64,000; these used figures put pressure
        // (used/total) at ~0.56 healthy, ~0.97 hard (above 0.95, below the
        // 0.98 critical threshold), ~0.98 critical.
        let (free_mem_mb, used_mem_mb) = match self.level.load(Ordering::SeqCst) {
            LEVEL_HARD => (2_000, 62_000),
            LEVEL_CRITICAL => (1_000, 63_000),
            _ => (28_000, 36_000),
        };
        Ok(RawHostMetrics {
            total_mem_mb: 64_000,
            free_mem_mb,
            used_mem_mb,
            load1: 0.1,
            load5: 0.1,
            load15: 0.1,
            cpu_usage_percent: 5.0,
            cpu_count: 8,
        })
    }
}

fn analysis_task(priority: Priority, model: &str, file_path: &str, timeout_ms: u64) -> Task {
    Task::new(
        TaskKind::FileAnalysis {
            file_path: file_path.to_string(),
            analysis_type: AnalysisType::Summary,
            model: model.to_string(),
            expected_response_format: ResponseFormat::Text,
        },
        priority,
        timeout_ms,
        0,
    )
}

async fn wait_for<F>(events: &async_channel::Receiver<CuratorEvent>, deadline: Duration, mut matches: F)
where
    F: FnMut(&CuratorEvent) -> bool,
{
    let end = tokio::time::Instant::now() + deadline;
    loop {
        let remaining = end.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if matches(&event) => return,
            Ok(Ok(_)) => continue,
            _ => return,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn hard_threshold_evicts_half_of_running_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "ok", "done": true}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "hello").unwrap();

    let source = ToggleSource::new();
    let manager = Arc::new(AgentManager::new(
        Config::default(),
        source.clone(),
        Arc::new(InferenceClient::new(server.uri())),
    ));
    let events = manager.subscribe_events();
    Arc::clone(&manager).start().await;

    let file_str = file.to_string_lossy().to_string();
    for _ in 0..4 {
        manager.submit(analysis_task(Priority::Normal, "m", &file_str, 10_000));
    }

    let mut dispatched = 0;
    wait_for(&events, Duration::from_secs(2), |event| {
        if matches!(event, CuratorEvent::TaskDispatched { .. }) {
            dispatched += 1;
        }
        dispatched >= 4
    })
    .await;
    assert_eq!(dispatched, 4, "all four tasks should have found a free slot");

    source.set_level(LEVEL_HARD);
    manager.recompute_slot_capacity().await;

    let mut cancelled_for_pressure = 0;
    let mut saw_eviction_event = false;
    wait_for(&events, Duration::from_secs(2), |event| {
        match event {
            CuratorEvent::TaskCancelled { reason, .. } if reason == "memory pressure" => {
                cancelled_for_pressure += 1;
            }
            CuratorEvent::EmergencyEviction { evicted_count } => {
                saw_eviction_event = true;
                assert_eq!(*evicted_count, 2);
            }
            _ => {}
        }
        cancelled_for_pressure >= 2 && saw_eviction_event
    })
    .await;

    manager.stop().await;
    assert_eq!(cancelled_for_pressure, 2, "ceil(4/2) running tasks should be evicted");
    assert!(saw_eviction_event);
}

#[tokio::test(flavor = "multi_thread")]
async fn critical_threshold_stops_everything_and_clears_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "ok", "done": true}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "hello").unwrap();
    let file_str = file.to_string_lossy().to_string();

    let source = ToggleSource::new();
    let config = Config {
        max_concurrent_slots: 1,
        ..Config::default()
    };
    let manager = Arc::new(AgentManager::new(
        config,
        source.clone(),
        Arc::new(InferenceClient::new(server.uri())),
    ));
    let events = manager.subscribe_events();
    Arc::clone(&manager).start().await;

    // One dispatches immediately; the second stays queued behind the single slot.
    manager.submit(analysis_task(Priority::Normal, "m", &file_str, 10_000));
    manager.submit(analysis_task(Priority::Normal, "m", &file_str, 10_000));

    wait_for(&events, Duration::from_secs(2), |event| {
        matches!(event, CuratorEvent::TaskDispatched { .. })
    })
    .await;

    source.set_level(LEVEL_CRITICAL);
    manager.recompute_slot_capacity().await;

    let mut saw_stop = false;
    wait_for(&events, Duration::from_secs(2), |event| {
        if matches!(event, CuratorEvent::EmergencyStop) {
            saw_stop = true;
        }
        saw_stop
    })
    .await;
    assert!(saw_stop, "crossing the critical threshold must emit EmergencyStop");

    let status = manager.status().await;
    assert_eq!(status.queued, 0, "the queue must be cleared once emergency mode engages");
    assert_eq!(status.running_count, 0, "every running task must be cancelled");

    manager.stop().await;
}

#[tokio::test]
async fn update_config_recomputes_slots_only_when_memory_sizing_changed() {
    let source = ToggleSource::new();
    let manager = Arc::new(AgentManager::new(
        Config::default(),
        source,
        Arc::new(InferenceClient::new("http://127.0.0.1:1")),
    ));
    Arc::clone(&manager).start().await;
    let events = manager.subscribe_events();

    manager
        .update_config(ConfigOverrides {
            task_timeout_ms: Some(1_234),
            ..ConfigOverrides::default()
        })
        .await;
    // Non-memory-sizing fields must not trigger a recompute beyond the one
    // `start()` already emitted.
    let no_extra_recompute = tokio::time::timeout(Duration::from_millis(100), async {
        loop {
            if let Ok(CuratorEvent::SlotsRecomputed { .. }) = events.recv().await {
                return true;
            }
        }
    })
    .await
    .is_err();
    assert!(no_extra_recompute);

    manager
        .update_config(ConfigOverrides {
            safety_factor: Some(3.0),
            ..ConfigOverrides::default()
        })
        .await;
    let mut saw_recompute = false;
    wait_for(&events, Duration::from_secs(1), |event| {
        if matches!(event, CuratorEvent::SlotsRecomputed { .. }) {
            saw_recompute = true;
        }
        saw_recompute
    })
    .await;
    assert!(saw_recompute, "changing safety_factor is memory-sizing-relevant");

    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_server_errors_are_retried_to_a_successful_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "done",
            "done": true
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "hello").unwrap();
    let file_str = file.to_string_lossy().to_string();

    let source = ToggleSource::new();
    let manager = Arc::new(AgentManager::new(
        Config::default(),
        source,
        Arc::new(InferenceClient::new(server.uri())),
    ));
    let events = manager.subscribe_events();
    Arc::clone(&manager).start().await;

    let task_id = manager.submit(analysis_task(Priority::Normal, "m", &file_str, 10_000));

    let mut completed = false;
    wait_for(&events, Duration::from_secs(5), |event| {
        if let CuratorEvent::TaskCompleted { task_id: id, .. } = event {
            completed = *id == task_id;
        }
        completed
    })
    .await;
    manager.stop().await;

    assert!(completed, "the inference client's own retry must mask the transient 503 from the task");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_task_that_exceeds_its_deadline_is_failed_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "too slow", "done": true}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "hello").unwrap();
    let file_str = file.to_string_lossy().to_string();

    let source = ToggleSource::new();
    let manager = Arc::new(AgentManager::new(
        Config::default(),
        source,
        Arc::new(InferenceClient::new(server.uri())),
    ));
    let events = manager.subscribe_events();
    Arc::clone(&manager).start().await;

    let task_id = manager.submit(analysis_task(Priority::Normal, "m", &file_str, 100));

    let mut failed_reason = None;
    let mut retried = false;
    wait_for(&events, Duration::from_secs(2), |event| {
        match event {
            CuratorEvent::TaskFailed { task_id: id, reason } if *id == task_id => {
                failed_reason = Some(reason.clone());
            }
            CuratorEvent::TaskRetry { task_id: id, .. } if *id == task_id => {
                retried = true;
            }
            _ => {}
        }
        failed_reason.is_some()
    })
    .await;
    manager.stop().await;

    assert_eq!(failed_reason.as_deref(), Some("timeout"));
    assert!(!retried, "a timed-out task must never be retried");
}
