//! System Monitor: samples host memory/CPU and publishes immutable
//! `SystemHealth` snapshots at a nominal interval, faster while under
//! stress. Host sampling sits behind the `HostMetricsSource` trait so tests
//! can inject synthetic pressure without touching the real OS.

// Poisoned mutex should fail the program
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use curator_protocol::CpuSnapshot;
use curator_protocol::MemorySnapshot;
use curator_protocol::SystemHealth;
use sysinfo::System;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Nominal sampling interval while the host is not under stress.
pub const NOMINAL_INTERVAL: Duration = Duration::from_secs(1);
/// Faster sampling interval while `is_under_stress` holds.
pub const STRESSED_INTERVAL: Duration = Duration::from_millis(500);

/// Raw numbers read from the OS, before the monitor derives `pressure`,
/// `available_for_agents`, and `is_under_stress` from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHostMetrics {
    pub total_mem_mb: u64,
    pub free_mem_mb: u64,
    pub used_mem_mb: u64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub cpu_usage_percent: f64,
    pub cpu_count: usize,
}

pub trait HostMetricsSource: Send + Sync {
    fn sample(&self) -> std::io::Result<RawHostMetrics>;
}

/// Production source, backed by `sysinfo`.
pub struct SysinfoHostMetricsSource {
    system: AsyncMutex<System>,
}

impl SysinfoHostMetricsSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system: AsyncMutex::new(system),
        }
    }
}

impl Default for SysinfoHostMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetricsSource for SysinfoHostMetricsSource {
    fn sample(&self) -> std::io::Result<RawHostMetrics> {
        let mut system = self
            .system
            .try_lock()
            .map_err(|_| std::io::Error::other("host metrics source busy"))?;
        system.refresh_memory();
        system.refresh_cpu_usage();

        let load = System::load_average();
        let cpu_count = system.cpus().len().max(1);
        let cpu_usage_percent = if system.cpus().is_empty() {
            0.0
        } else {
            system.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpu_count as f64
        };

        Ok(RawHostMetrics {
            total_mem_mb: system.total_memory() / (1024 * 1024),
            free_mem_mb: system.available_memory() / (1024 * 1024),
            used_mem_mb: system.used_memory() / (1024 * 1024),
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
            cpu_usage_percent,
            cpu_count,
        })
    }
}

fn derive_health(raw: RawHostMetrics, os_reserved_memory_mb: u64, soft_threshold: f64) -> SystemHealth {
    let available_for_agents_mb = raw.free_mem_mb.saturating_sub(os_reserved_memory_mb);
    let pressure = if raw.total_mem_mb == 0 {
        0.0
    } else {
        raw.used_mem_mb as f64 / raw.total_mem_mb as f64
    };
    let is_under_stress =
        pressure >= soft_threshold || raw.load1 / raw.cpu_count.max(1) as f64 > 1.0;

    SystemHealth {
        timestamp: chrono::Utc::now(),
        memory: MemorySnapshot {
            total_mb: raw.total_mem_mb,
            free_mb: raw.free_mem_mb,
            used_mb: raw.used_mem_mb,
            pressure,
            available_for_agents_mb,
        },
        cpu: CpuSnapshot {
            load1: raw.load1,
            load5: raw.load5,
            load15: raw.load15,
            usage_percent: raw.cpu_usage_percent,
            cpu_count: raw.cpu_count,
        },
        is_under_stress,
    }
}

/// Periodically samples `source` and publishes `SystemHealth` over a
/// `watch` channel. Guarantees at-most-one in-flight sample via an
/// `AtomicBool` guard: if a tick fires while a sample is still being taken
/// (the real OS call is slow, or a test source deliberately stalls), that
/// tick is coalesced away rather than queued.
pub struct SystemMonitor {
    source: Arc<dyn HostMetricsSource>,
    config: Arc<Config>,
    sampling: Arc<AtomicBool>,
    tx: watch::Sender<SystemHealth>,
    rx: watch::Receiver<SystemHealth>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SystemMonitor {
    pub fn new(source: Arc<dyn HostMetricsSource>, config: Arc<Config>) -> Self {
        let initial = source
            .sample()
            .map(|raw| derive_health(raw, config.os_reserved_memory_mb, config.soft_threshold))
            .unwrap_or_else(|_| derive_health(
                RawHostMetrics {
                    total_mem_mb: 0,
                    free_mem_mb: 0,
                    used_mem_mb: 0,
                    load1: 0.0,
                    load5: 0.0,
                    load15: 0.0,
                    cpu_usage_percent: 0.0,
                    cpu_count: 1,
                },
                config.os_reserved_memory_mb,
                config.soft_threshold,
            ));
        let (tx, rx) = watch::channel(initial);
        Self {
            source,
            config,
            sampling: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn latest(&self) -> SystemHealth {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemHealth> {
        self.rx.clone()
    }

    /// Take one sample immediately, publish it, and return it. Coalesces
    /// with any tick already in flight: if one is running, this returns the
    /// last published snapshot instead of double-sampling.
    pub fn sample_now(&self) -> SystemHealth {
        if self
            .sampling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.latest();
        }
        let health = match self.source.sample() {
            Ok(raw) => derive_health(raw, self.config.os_reserved_memory_mb, self.config.soft_threshold),
            Err(_) => {
                tracing::warn!("host metrics sampling failed; retaining last snapshot");
                self.latest()
            }
        };
        let _ = self.tx.send(health);
        self.sampling.store(false, Ordering::Release);
        health
    }

    /// Begin the periodic sampling loop: nominal interval normally, the
    /// faster interval while `is_under_stress` holds.
    pub fn start(self: Arc<Self>) {
        let mut guard = self.handle.lock().expect("monitor handle mutex poisoned");
        if guard.is_some() {
            return;
        }
        let monitor = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                let health = monitor.sample_now();
                let interval = if health.is_under_stress {
                    STRESSED_INTERVAL
                } else {
                    NOMINAL_INTERVAL
                };
                tokio::time::sleep(interval).await;
            }
        });
        *guard = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().expect("monitor handle mutex poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FixedSource {
        total_mb: u64,
        free_mb: u64,
        calls: AtomicU64,
    }

    impl HostMetricsSource for FixedSource {
        fn sample(&self) -> std::io::Result<RawHostMetrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawHostMetrics {
                total_mem_mb: self.total_mb,
                free_mem_mb: self.free_mb,
                used_mem_mb: self.total_mb - self.free_mb,
                load1: 0.1,
                load5: 0.1,
                load15: 0.1,
                cpu_usage_percent: 5.0,
                cpu_count: 4,
            })
        }
    }

    #[test]
    fn available_for_agents_subtracts_os_reserved_memory() {
        let source = Arc::new(FixedSource {
            total_mb: 16_000,
            free_mb: 4_000,
            calls: AtomicU64::new(0),
        });
        let config = Arc::new(Config {
            os_reserved_memory_mb: 2_000,
            ..Config::default()
        });
        let monitor = SystemMonitor::new(source, config);
        let health = monitor.sample_now();
        assert_eq!(health.memory.available_for_agents_mb, 2_000);
    }

    #[test]
    fn zero_free_memory_never_underflows_available_for_agents() {
        let source = Arc::new(FixedSource {
            total_mb: 16_000,
            free_mb: 500,
            calls: AtomicU64::new(0),
        });
        let config = Arc::new(Config {
            os_reserved_memory_mb: 2_000,
            ..Config::default()
        });
        let monitor = SystemMonitor::new(source, config);
        let health = monitor.sample_now();
        assert_eq!(health.memory.available_for_agents_mb, 0);
    }

    #[test]
    fn high_pressure_marks_under_stress() {
        let source = Arc::new(FixedSource {
            total_mb: 16_000,
            free_mb: 1_000,
            calls: AtomicU64::new(0),
        });
        let config = Arc::new(Config::default());
        let monitor = SystemMonitor::new(source, config);
        let health = monitor.sample_now();
        assert!(health.memory.pressure >= 0.85);
        assert!(health.is_under_stress);
    }
}
