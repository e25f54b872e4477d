use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Memory figures, in megabytes unless noted otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_mb: u64,
    pub free_mb: u64,
    pub used_mb: u64,
    /// `used / total`, in `[0, 1]`.
    pub pressure: f64,
    /// `max(0, free - os_reserved)`, the budget the Agent Manager is allowed
    /// to carve slots out of.
    pub available_for_agents_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub usage_percent: f64,
    pub cpu_count: usize,
}

/// A single immutable sample of host health. Produced ~1 Hz by the System
/// Monitor; consumed, never mutated, by every downstream reader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub timestamp: DateTime<Utc>,
    pub memory: MemorySnapshot,
    pub cpu: CpuSnapshot,
    pub is_under_stress: bool,
}

impl SystemHealth {
    pub fn memory_pressure(&self) -> f64 {
        self.memory.pressure
    }

    pub fn available_for_agents_mb(&self) -> u64 {
        self.memory.available_for_agents_mb
    }
}
