use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::health::SystemHealth;

/// Lifecycle events emitted by the Agent Manager. A typed enum over a
/// tagged union, not a string-keyed event-emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CuratorEvent {
    ManagerStarted,
    ManagerStopped,
    TaskCreated { task_id: Uuid },
    TaskDispatched { task_id: Uuid, slot_id: Uuid },
    TaskCompleted { task_id: Uuid, execution_time_ms: u64 },
    TaskFailed { task_id: Uuid, reason: String },
    TaskRetry { task_id: Uuid, retry_count: u32 },
    TaskCancelled { task_id: Uuid, reason: String },
    SlotFreed { slot_id: Uuid },
    SlotsRecomputed { total_slots: usize },
    MemoryWarning { pressure: f64 },
    EmergencyEviction { evicted_count: usize },
    EmergencyStop,
    SystemHealthUpdate { health: SystemHealth },
}
