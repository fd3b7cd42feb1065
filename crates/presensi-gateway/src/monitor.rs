//! System monitor: periodic sampling with threshold alerts
//!
//! Samples process memory/CPU and pool saturation on an interval.
//! Crossing a threshold raises an alert; a per-metric cooldown keeps a
//! sustained condition from flooding the log.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;
use tracing::{debug, warn};

use presensi_common::config::MonitorSettings;

use crate::admission::AdmissionController;
use crate::db::Database;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    SystemMemory,
    ProcessCpu,
    PoolSaturation,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::SystemMemory => "system_memory",
            MetricKind::ProcessCpu => "process_cpu",
            MetricKind::PoolSaturation => "pool_saturation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub metric: MetricKind,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub at_unix_ms: u64,
}

/// One sampling round, assembled by the run loop or by tests
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// System memory in use, percent of total
    pub memory_pct: f64,
    /// Process CPU usage, percent of one core
    pub cpu_pct: f64,
    /// Pool connections checked out, percent of max
    pub pool_pct: f64,
}

struct MonitorInner {
    cooldowns: HashMap<MetricKind, Instant>,
    alerts: VecDeque<Alert>,
}

/// Threshold evaluator plus alert history.
///
/// [`SystemMonitor::observe`] is synchronous so the threshold and cooldown
/// logic tests without a runtime; [`SystemMonitor::run`] drives it from
/// live samples.
pub struct SystemMonitor {
    settings: MonitorSettings,
    inner: Mutex<MonitorInner>,
}

impl SystemMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(MonitorInner {
                cooldowns: HashMap::new(),
                alerts: VecDeque::new(),
            }),
        }
    }

    /// Evaluate one sample against the thresholds, raising alerts as needed
    pub fn observe(&self, sample: Sample) {
        self.observe_at(sample, Instant::now());
    }

    fn observe_at(&self, sample: Sample, now: Instant) {
        let checks = [
            (
                MetricKind::SystemMemory,
                sample.memory_pct,
                self.settings.memory_threshold_pct,
                "System memory usage high",
            ),
            (
                MetricKind::ProcessCpu,
                sample.cpu_pct,
                self.settings.cpu_threshold_pct,
                "Process CPU usage high",
            ),
            (
                MetricKind::PoolSaturation,
                sample.pool_pct,
                self.settings.pool_threshold_pct,
                "Connection pool nearly saturated",
            ),
        ];

        for (metric, value, threshold, message) in checks {
            if value < threshold {
                continue;
            }
            let mut inner = self.inner.lock();
            let cooled_down = inner
                .cooldowns
                .get(&metric)
                .map(|last| now.duration_since(*last).as_secs() >= self.settings.alert_cooldown_secs)
                .unwrap_or(true);
            if !cooled_down {
                continue;
            }
            inner.cooldowns.insert(metric, now);

            warn!(
                metric = metric.as_str(),
                value = format!("{value:.1}"),
                threshold = format!("{threshold:.1}"),
                "{message}"
            );
            metrics::record_alert(metric.as_str());

            if inner.alerts.len() >= self.settings.alert_history {
                inner.alerts.pop_front();
            }
            inner.alerts.push_back(Alert {
                metric,
                message: message.to_string(),
                value,
                threshold,
                at_unix_ms: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            });
        }
    }

    /// Recent alerts, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().alerts.iter().cloned().collect()
    }

    /// Sample the process and the pool on an interval, forever
    pub async fn run(&self, db: Database, admission: AdmissionController) {
        let mut system = System::new();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(err) => {
                warn!(error = err, "Cannot resolve own pid, system monitor disabled");
                return;
            }
        };

        let interval = Duration::from_secs(self.settings.interval_secs);
        loop {
            tokio::time::sleep(interval).await;

            system.refresh_memory();
            system.refresh_process(pid);

            let memory_pct = if system.total_memory() > 0 {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            } else {
                0.0
            };
            let (cpu_pct, memory_bytes) = system
                .process(pid)
                .map(|p| (p.cpu_usage() as f64, p.memory()))
                .unwrap_or((0.0, 0));
            metrics::set_process_usage(memory_bytes, cpu_pct as f32);

            let pool = db.stats();
            let pool_pct = if pool.max_connections > 0 {
                pool.active_connections as f64 / pool.max_connections as f64 * 100.0
            } else {
                0.0
            };

            let admission_stats = admission.stats();
            debug!(
                memory_pct = format!("{memory_pct:.1}"),
                cpu_pct = format!("{cpu_pct:.1}"),
                pool_active = pool.active_connections,
                active_requests = admission_stats.active_requests,
                queued = admission_stats.queued.total,
                "Monitor sample"
            );

            self.observe(Sample {
                memory_pct,
                cpu_pct,
                pool_pct,
            });
        }
    }
}
