//! Agent Manager, the top-level scheduler: a dispatch loop spawned from
//! `start()` owns the slot table and is the only writer of scheduling
//! state, workers (one `tokio::spawn` per dispatched task) report completion
//! back over an `async_channel` instead of touching shared state directly,
//! and lifecycle events are delivered over a second typed channel rather
//! than a string-keyed emitter.

// Poisoned mutex should fail the program
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::Instant;

use async_channel::Receiver;
use async_channel::Sender;
use curator_inference::InferenceClient;
use curator_protocol::CuratorEvent;
use curator_protocol::Priority;
use curator_protocol::Slot;
use curator_protocol::SystemHealth;
use curator_protocol::Task;
use curator_protocol::TaskKind;
use curator_protocol::TaskResult;
use curator_protocol::TaskState;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::config::ConfigOverrides;
use crate::handlers;
use crate::monitor::HostMetricsSource;
use crate::monitor::SystemMonitor;
use crate::queue::PriorityQueue;

/// Mean model-memory estimate used when no model has reported one yet
/// (fallback 4 GiB).
const FALLBACK_MODEL_MEMORY_MB: f64 = 4096.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentManagerStatus {
    pub running: bool,
    pub total_slots: usize,
    pub available_slots: usize,
    pub queued: usize,
    pub running_count: usize,
    pub health: SystemHealth,
    pub memory_utilization: f64,
    pub emergency_mode: bool,
}

/// Message a dispatched worker sends back to the dispatch loop when its task
/// reaches a terminal state. The loop is the only place that frees the slot
/// and asks the queue to record/retry.
struct TaskOutcome {
    task_id: Uuid,
    slot_id: Uuid,
    result: TaskResult,
    /// Whether the failure (if any) is eligible for retry (not timeout,
    /// not abort, not cancelled).
    retryable: bool,
}

struct SchedulerState {
    slots: HashMap<Uuid, Slot>,
    task_to_slot: HashMap<Uuid, Uuid>,
    abort_handles: HashMap<Uuid, AbortHandle>,
    total_slots: usize,
    emergency_mode: bool,
    last_slot_recompute: Instant,
    last_health_check: Instant,
}

impl SchedulerState {
    fn active_slots(&self) -> usize {
        self.slots.len()
    }
}

pub struct AgentManager {
    queue: Arc<PriorityQueue>,
    monitor: Arc<SystemMonitor>,
    inference: Arc<InferenceClient>,
    config: Arc<StdRwLock<Config>>,
    model_memory_estimates: Arc<StdRwLock<HashMap<String, u64>>>,
    scheduler: Arc<tokio::sync::Mutex<SchedulerState>>,
    dispatch_notify: Arc<tokio::sync::Notify>,
    event_tx: Sender<CuratorEvent>,
    event_rx: Receiver<CuratorEvent>,
    outcome_tx: Sender<TaskOutcome>,
    outcome_rx: Receiver<TaskOutcome>,
    loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    running: std::sync::atomic::AtomicBool,
}

impl AgentManager {
    pub fn new(
        config: Config,
        host_metrics: Arc<dyn HostMetricsSource>,
        inference: Arc<InferenceClient>,
    ) -> Self {
        let config = Arc::new(StdRwLock::new(config));
        let monitor_config = {
            let guard = config.read().expect("config lock poisoned");
            Arc::new(guard.clone())
        };
        let monitor = Arc::new(SystemMonitor::new(host_metrics, monitor_config));
        let history_capacity = config
            .read()
            .expect("config lock poisoned")
            .task_result_history_capacity;
        let (event_tx, event_rx) = async_channel::unbounded();
        let (outcome_tx, outcome_rx) = async_channel::unbounded();

        Self {
            queue: Arc::new(PriorityQueue::new(history_capacity)),
            monitor,
            inference,
            config,
            model_memory_estimates: Arc::new(StdRwLock::new(HashMap::new())),
            scheduler: Arc::new(tokio::sync::Mutex::new(SchedulerState {
                slots: HashMap::new(),
                task_to_slot: HashMap::new(),
                abort_handles: HashMap::new(),
                total_slots: 0,
                emergency_mode: false,
                last_slot_recompute: Instant::now(),
                last_health_check: Instant::now(),
            })),
            dispatch_notify: Arc::new(tokio::sync::Notify::new()),
            event_tx,
            event_rx,
            outcome_tx,
            outcome_rx,
            loop_handle: std::sync::Mutex::new(None),
            running: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    /// Subscribe to lifecycle events. `start()` does not hand out a fresh
    /// receiver — every subscriber sees the same stream from whenever they
    /// subscribed onward, an `async_channel` multi-consumer topology rather
    /// than a single-consumer event queue (this core may have more than one
    /// observer: a CLI and a future desktop UI both watching the same
    /// manager).
    pub fn subscribe_events(&self) -> Receiver<CuratorEvent> {
        self.event_rx.clone()
    }

    fn emit(&self, event: CuratorEvent) {
        let _ = self.event_tx.try_send(event);
    }

    pub fn config_snapshot(&self) -> Config {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn record_model_memory_estimate(&self, model: &str, mb: u64) {
        self.model_memory_estimates
            .write()
            .expect("model memory lock poisoned")
            .insert(model.to_string(), mb);
    }

    fn mean_model_memory_mb(&self) -> f64 {
        let estimates = self
            .model_memory_estimates
            .read()
            .expect("model memory lock poisoned");
        if estimates.is_empty() {
            return FALLBACK_MODEL_MEMORY_MB;
        }
        estimates.values().sum::<u64>() as f64 / estimates.len() as f64
    }

    /// `totalSlots = clamp(floor(A / (M̄·S)), 0, maxConcurrentSlots)`.
    fn compute_total_slots(&self, health: &SystemHealth) -> usize {
        let config = self.config.read().expect("config lock poisoned");
        let available = health.available_for_agents_mb() as f64;
        let mean = self.mean_model_memory_mb();
        let per_slot = mean * config.safety_factor;
        if per_slot <= 0.0 {
            return 0;
        }
        let raw = (available / per_slot).floor().max(0.0) as usize;
        raw.min(config.max_concurrent_slots)
    }

    /// `start()`: begin monitoring, compute initial slot capacity, start
    /// periodic recompute/health-check timers, begin the dispatch loop.
    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }
        Arc::clone(&self.monitor).start();
        let health = self.monitor.latest();
        let total = self.compute_total_slots(&health);
        {
            let mut scheduler = self.scheduler.lock().await;
            scheduler.total_slots = total;
        }
        self.emit(CuratorEvent::SlotsRecomputed { total_slots: total });
        self.emit(CuratorEvent::ManagerStarted);

        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move { manager.dispatch_loop().await });
        *self.loop_handle.lock().expect("loop handle mutex poisoned") = Some(handle);
    }

    /// `stop()`: cancel all running tasks with reason "shutdown", stop the
    /// monitor, clear timers.
    pub async fn stop(&self) {
        if !self.running.swap(false, std::sync::atomic::Ordering::AcqRel) {
            return;
        }
        let running_ids: Vec<Uuid> = self.queue.get_running().into_iter().map(|t| t.id).collect();
        for id in running_ids {
            self.cancel(id, "shutdown").await;
        }
        self.monitor.stop();
        if let Some(handle) = self.loop_handle.lock().expect("loop handle mutex poisoned").take() {
            handle.abort();
        }
        self.emit(CuratorEvent::ManagerStopped);
    }

    /// `submit(taskSpec) -> taskId`: estimate memory if unspecified, append
    /// to the priority queue, nudge the dispatcher.
    pub fn submit(&self, mut task: Task) -> Uuid {
        if task.estimated_memory_mb.is_none() {
            if let TaskKind::FileAnalysis { model, .. } | TaskKind::BatchProcessing { model, .. } =
                &task.kind
            {
                let estimate = self
                    .model_memory_estimates
                    .read()
                    .expect("model memory lock poisoned")
                    .get(model)
                    .copied();
                task.estimated_memory_mb = estimate;
            }
        }
        let id = self.queue.enqueue(task);
        self.emit(CuratorEvent::TaskCreated { task_id: id });
        self.dispatch_notify.notify_one();
        id
    }

    /// `cancel(taskId, reason) -> bool`: cancels queued or running tasks.
    /// For a running task, frees its slot and aborts the worker.
    pub async fn cancel(&self, task_id: Uuid, reason: &str) -> bool {
        let Some(task) = self.queue.get(task_id) else {
            return false;
        };
        match task.state {
            TaskState::Queued => {
                let cancelled = self.queue.cancel(task_id);
                if cancelled {
                    self.emit(CuratorEvent::TaskCancelled {
                        task_id,
                        reason: reason.to_string(),
                    });
                }
                cancelled
            }
            TaskState::Running => {
                let mut scheduler = self.scheduler.lock().await;
                if let Some(handle) = scheduler.abort_handles.remove(&task_id) {
                    handle.abort();
                }
                if let Some(slot_id) = scheduler.task_to_slot.remove(&task_id) {
                    scheduler.slots.remove(&slot_id);
                    self.emit(CuratorEvent::SlotFreed { slot_id });
                }
                drop(scheduler);
                self.queue.update_state(task_id, TaskState::Cancelled, None);
                self.emit(CuratorEvent::TaskCancelled {
                    task_id,
                    reason: reason.to_string(),
                });
                self.dispatch_notify.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Recompute `totalSlots` from the latest health snapshot.
    pub async fn recompute_slot_capacity(&self) {
        let health = self.monitor.sample_now();
        let total = self.compute_total_slots(&health);
        {
            let mut scheduler = self.scheduler.lock().await;
            scheduler.total_slots = total;
            scheduler.last_slot_recompute = Instant::now();
        }
        self.emit(CuratorEvent::SlotsRecomputed { total_slots: total });
        self.apply_memory_thresholds(&health).await;
        self.dispatch_notify.notify_one();
    }

    pub async fn status(&self) -> AgentManagerStatus {
        let health = self.monitor.latest();
        let scheduler = self.scheduler.lock().await;
        AgentManagerStatus {
            running: self.running.load(std::sync::atomic::Ordering::Acquire),
            total_slots: scheduler.total_slots,
            available_slots: scheduler.total_slots.saturating_sub(scheduler.active_slots()),
            queued: self.queue.get_queued().len(),
            running_count: self.queue.get_running().len(),
            health,
            memory_utilization: health.memory_pressure(),
            emergency_mode: scheduler.emergency_mode,
        }
    }

    /// `updateConfig(partial)`: merges into config; triggers a recompute if
    /// memory parameters changed.
    pub async fn update_config(&self, partial: ConfigOverrides) {
        let memory_relevant = {
            let mut config = self.config.write().expect("config lock poisoned");
            config.apply_partial(partial)
        };
        if memory_relevant {
            self.recompute_slot_capacity().await;
        }
    }

    /// Memory-pressure thresholds, applied on every health update and
    /// recompute.
    async fn apply_memory_thresholds(&self, health: &SystemHealth) {
        let (soft, hard, critical, emergency_stop_enabled) = {
            let config = self.config.read().expect("config lock poisoned");
            (
                config.soft_threshold,
                config.hard_threshold,
                config.critical_threshold,
                config.emergency_stop_enabled,
            )
        };
        let pressure = health.memory_pressure();

        if pressure >= critical && emergency_stop_enabled {
            self.enter_emergency_mode().await;
            return;
        }

        {
            let mut scheduler = self.scheduler.lock().await;
            if scheduler.emergency_mode && pressure < soft {
                scheduler.emergency_mode = false;
            }
        }

        if pressure >= hard {
            self.evict_lowest_priority_half().await;
        } else if pressure >= soft {
            self.emit(CuratorEvent::MemoryWarning { pressure });
        }
    }

    async fn enter_emergency_mode(&self) {
        {
            let mut scheduler = self.scheduler.lock().await;
            if scheduler.emergency_mode {
                return;
            }
            scheduler.emergency_mode = true;
        }
        let running_ids: Vec<Uuid> = self.queue.get_running().into_iter().map(|t| t.id).collect();
        for id in running_ids {
            self.cancel(id, "emergency stop").await;
        }
        let queued_ids: Vec<Uuid> = self.queue.get_queued().into_iter().map(|t| t.id).collect();
        for id in queued_ids {
            self.queue.cancel(id);
        }
        self.emit(CuratorEvent::EmergencyStop);
    }

    /// Cancel `ceil(runningCount / 2)` lowest-priority running tasks when
    /// the hard memory threshold is crossed.
    async fn evict_lowest_priority_half(&self) {
        let mut running = self.queue.get_running();
        if running.is_empty() {
            return;
        }
        running.sort_by(|a, b| b.priority.cmp(&a.priority)); // worst (highest number) first
        let evict_count = running.len().div_ceil(2);
        let to_evict: Vec<Uuid> = running.into_iter().take(evict_count).map(|t| t.id).collect();
        for id in &to_evict {
            self.cancel(*id, "memory pressure").await;
        }
        self.emit(CuratorEvent::EmergencyEviction {
            evicted_count: to_evict.len(),
        });
    }

    /// The dispatch loop: re-entered after every slot release, recompute,
    /// config change, and health update. Pops admissible tasks and spawns a
    /// worker per dispatch; the loop itself never blocks on inference or
    /// filesystem I/O.
    async fn dispatch_loop(self: Arc<Self>) {
        let mut recompute_interval = {
            let ms = self.config.read().expect("config lock poisoned").slot_recompute_interval_ms;
            tokio::time::interval(std::time::Duration::from_millis(ms))
        };
        let mut health_check_interval = {
            let ms = self.config.read().expect("config lock poisoned").health_check_interval_ms;
            tokio::time::interval(std::time::Duration::from_millis(ms))
        };
        let mut health_rx = self.monitor.subscribe();

        self.try_dispatch().await;

        loop {
            tokio::select! {
                _ = self.dispatch_notify.notified() => {
                    self.try_dispatch().await;
                }
                Ok(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                    self.try_dispatch().await;
                }
                _ = recompute_interval.tick() => {
                    self.recompute_slot_capacity().await;
                }
                _ = health_check_interval.tick() => {
                    self.scheduler.lock().await.last_health_check = Instant::now();
                    let health = self.monitor.sample_now();
                    self.emit(CuratorEvent::SystemHealthUpdate { health });
                }
                result = health_rx.changed() => {
                    if result.is_err() {
                        break;
                    }
                    let health = *health_rx.borrow_and_update();
                    self.apply_memory_thresholds(&health).await;
                    self.try_dispatch().await;
                }
            }
        }
    }

    /// Admission and dispatch: while not in emergency mode and a slot is
    /// free, pop the highest-priority `Queued` task and dispatch it.
    async fn try_dispatch(&self) {
        loop {
            let (total_slots, active_slots, emergency_mode, paused) = {
                let scheduler = self.scheduler.lock().await;
                let config = self.config.read().expect("config lock poisoned");
                let health = self.monitor.latest();
                (
                    scheduler.total_slots,
                    scheduler.active_slots(),
                    scheduler.emergency_mode,
                    health.memory_pressure() >= config.soft_threshold,
                )
            };
            if emergency_mode || paused || active_slots >= total_slots {
                return;
            }

            let Some(task) = self.queue.dequeue() else {
                return;
            };
            self.dispatch(task).await;
        }
    }

    async fn dispatch(&self, task: Task) {
        let config = self.config_snapshot();
        let estimated_mb = task.estimated_memory_mb.unwrap_or(0);
        let model_name = match &task.kind {
            TaskKind::FileAnalysis { model, .. } | TaskKind::BatchProcessing { model, .. } => {
                Some(model.clone())
            }
            TaskKind::HealthCheck => None,
        };
        let slot = Slot {
            slot_id: Uuid::new_v4(),
            task_id: task.id,
            model_name,
            allocated_memory_mb: estimated_mb,
            start_time: chrono::Utc::now(),
        };
        self.queue.update_state(task.id, TaskState::Running, None);

        let inference = Arc::clone(&self.inference);
        let outcome_tx = self.outcome_tx.clone();
        let slot_id = slot.slot_id;
        let task_id = task.id;
        let task_for_worker = task.clone();
        let max_content_bytes = config.max_content_bytes;

        let join = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(
                task_for_worker.timeout(),
                handlers::run_task(&inference, &task_for_worker, max_content_bytes),
            )
            .await;
            let is_timeout = outcome.is_err();

            let (success, result, error, retryable) = match outcome {
                Ok(Ok(value)) => (true, Some(value), None, false),
                Ok(Err(err)) => (false, None, Some(err.to_string()), err.is_retryable()),
                Err(_elapsed) => (false, None, Some("task exceeded its deadline".to_string()), false),
            };

            let task_result = TaskResult {
                task_id,
                success,
                result,
                error,
                execution_time_ms: started.elapsed().as_millis() as u64,
                memory_used_mb: 0,
            };

            let _ = outcome_tx
                .send(TaskOutcome {
                    task_id,
                    slot_id,
                    result: task_result,
                    retryable: retryable && !is_timeout,
                })
                .await;
        });

        let mut scheduler = self.scheduler.lock().await;
        scheduler.slots.insert(slot_id, slot);
        scheduler.task_to_slot.insert(task_id, slot_id);
        scheduler.abort_handles.insert(task_id, join.abort_handle());
        drop(scheduler);

        self.emit(CuratorEvent::TaskDispatched { task_id, slot_id });
    }

    async fn handle_outcome(&self, outcome: TaskOutcome) {
        let TaskOutcome { task_id, slot_id, result, retryable } = outcome;

        let mut scheduler = self.scheduler.lock().await;
        let had_slot = scheduler.slots.remove(&slot_id).is_some();
        scheduler.task_to_slot.remove(&task_id);
        scheduler.abort_handles.remove(&task_id);
        drop(scheduler);

        if !had_slot {
            // Already cancelled/freed concurrently; don't double-report.
            return;
        }
        self.emit(CuratorEvent::SlotFreed { slot_id });

        let task = self.queue.get(task_id);
        let is_timeout = !result.success && result.error.as_deref() == Some("task exceeded its deadline");

        if !result.success {
            if is_timeout {
                self.queue.update_state(task_id, TaskState::Timeout, None);
                self.queue.record_result(result);
                self.emit(CuratorEvent::TaskFailed {
                    task_id,
                    reason: "timeout".to_string(),
                });
                return;
            }

            if let Some(task) = &task {
                if retryable && task.retry_count < task.max_retries {
                    let retry_count = task.retry_count + 1;
                    // The queue is the sole writer of task state; bump the
                    // retry counter by re-fetching and mutating through the
                    // same path `update_state` uses internally would, but
                    // retry bookkeeping lives on the queue's copy via requeue.
                    self.bump_retry_count(task_id, retry_count);
                    self.queue.requeue(task_id);
                    self.emit(CuratorEvent::TaskRetry { task_id, retry_count });
                    self.dispatch_notify.notify_one();
                    return;
                }
            }

            self.queue.update_state(task_id, TaskState::Failed, None);
            self.queue.record_result(result.clone());
            self.emit(CuratorEvent::TaskFailed {
                task_id,
                reason: result.error.clone().unwrap_or_default(),
            });
            return;
        }

        self.queue.update_state(task_id, TaskState::Completed, None);
        let execution_time_ms = result.execution_time_ms;
        self.queue.record_result(result);
        self.emit(CuratorEvent::TaskCompleted { task_id, execution_time_ms });
    }

    fn bump_retry_count(&self, task_id: Uuid, retry_count: u32) {
        // `PriorityQueue` only exposes state/requeue transitions in its
        // public surface to confine mutation to the queue; retry
        // bookkeeping is threaded through a dedicated setter rather than a
        // generic field-mutator to keep that confinement meaningful.
        self.queue.set_retry_count(task_id, retry_count);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::monitor::RawHostMetrics;
    use curator_protocol::AnalysisType;
    use curator_protocol::ResponseFormat;

    struct FixedHealth(RawHostMetrics);

    impl HostMetricsSource for FixedHealth {
        fn sample(&self) -> std::io::Result<RawHostMetrics> {
            Ok(self.0)
        }
    }

    fn plentiful_health_source() -> Arc<dyn HostMetricsSource> {
        Arc::new(FixedHealth(RawHostMetrics {
            total_mem_mb: 32_000,
            free_mem_mb: 16_000,
            used_mem_mb: 16_000,
            load1: 0.1,
            load5: 0.1,
            load15: 0.1,
            cpu_usage_percent: 5.0,
            cpu_count: 8,
        }))
    }

    fn health_check_task(priority: Priority) -> Task {
        Task::new(TaskKind::HealthCheck, priority, 5_000, 3)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn priority_preempts_fifo_order_across_classes() {
        let config = Config {
            max_concurrent_slots: 1,
            ..Config::default()
        };
        let manager = Arc::new(AgentManager::new(
            config,
            plentiful_health_source(),
            Arc::new(InferenceClient::new("http://127.0.0.1:1")),
        ));
        Arc::clone(&manager).start().await;

        let events = manager.subscribe_events();
        let low1 = manager.submit(health_check_task(Priority::Low));
        let _low2 = manager.submit(health_check_task(Priority::Low));
        let _low3 = manager.submit(health_check_task(Priority::Low));

        // Give the first dispatch a moment, then submit a High task which
        // must preempt the remaining Lows once a slot frees.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let high = manager.submit(health_check_task(Priority::High));

        let mut dispatched_order = Vec::new();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while dispatched_order.len() < 4 && tokio::time::Instant::now() < deadline {
            if let Ok(Ok(event)) =
                tokio::time::timeout(std::time::Duration::from_millis(200), events.recv()).await
            {
                if let CuratorEvent::TaskDispatched { task_id, .. } = event {
                    dispatched_order.push(task_id);
                }
            }
        }

        manager.stop().await;

        assert_eq!(dispatched_order[0], low1);
        assert!(dispatched_order.contains(&high));
        let high_index = dispatched_order.iter().position(|id| *id == high).unwrap();
        assert!(high_index <= 1, "high priority task should preempt remaining lows");
    }

    #[tokio::test]
    async fn zero_availability_yields_zero_slots() {
        let source: Arc<dyn HostMetricsSource> = Arc::new(FixedHealth(RawHostMetrics {
            total_mem_mb: 16_000,
            free_mem_mb: 0,
            used_mem_mb: 16_000,
            load1: 0.1,
            load5: 0.1,
            load15: 0.1,
            cpu_usage_percent: 1.0,
            cpu_count: 4,
        }));
        let manager = Arc::new(AgentManager::new(
            Config::default(),
            source,
            Arc::new(InferenceClient::new("http://127.0.0.1:1")),
        ));
        Arc::clone(&manager).start().await;
        let status = manager.status().await;
        assert_eq!(status.total_slots, 0);
        manager.stop().await;
    }

    #[test]
    fn file_analysis_task_kind_round_trips() {
        let task = Task::new(
            TaskKind::FileAnalysis {
                file_path: "/tmp/a.txt".into(),
                analysis_type: AnalysisType::Classification,
                model: "llama3.2:3b".into(),
                expected_response_format: ResponseFormat::Json,
            },
            Priority::Normal,
            30_000,
            3,
        );
        assert_eq!(task.state, TaskState::Queued);
    }
}
