//! Counters, rolling latency sample, per-handler stats, and the three-tier
//! health verdict.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const LATENCY_RING_CAPACITY: usize = 1024;
const FAILURE_RATE_WINDOW: usize = 200;

#[derive(Debug, Default)]
struct HandlerStats {
    count: AtomicU64,
    duration_micros_total: AtomicU64,
    errors: AtomicU64,
}

pub struct MetricsCollector {
    started_at: Instant,
    requests_total: AtomicU64,
    requests_successful: AtomicU64,
    requests_failed: AtomicU64,
    validation_rejections: AtomicU64,
    throttle_rejections: AtomicU64,
    security_events: AtomicU64,
    per_handler: DashMap<(String, String), HandlerStats>,
    latencies: Mutex<VecDeque<u64>>,
    recent_outcomes: Mutex<VecDeque<bool>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub daemon_info: DaemonInfo,
    pub performance_metrics: PerformanceMetrics,
    pub resource_status: Vec<(String, usize)>,
    pub connection_summary: ConnectionSummary,
    pub security_summary: SecuritySummary,
    pub module_status: Vec<ModuleStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub validation_rejections: u64,
    pub throttle_rejections: u64,
    pub p50_micros: u64,
    pub p95_micros: u64,
    pub p99_micros: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub active_connections: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecuritySummary {
    pub security_events: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub module: String,
    pub function: String,
    pub count: u64,
    pub avg_latency_micros: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<(String, CheckResult)>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        MetricsCollector {
            started_at: Instant::now(),
            requests_total: AtomicU64::new(0),
            requests_successful: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            throttle_rejections: AtomicU64::new(0),
            security_events: AtomicU64::new(0),
            per_handler: DashMap::new(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_RING_CAPACITY)),
            recent_outcomes: Mutex::new(VecDeque::with_capacity(FAILURE_RATE_WINDOW)),
        }
    }

    /// Counted once per request that reaches the broker, regardless of how
    /// it is ultimately categorized. Kept separate from `record_outcome` so
    /// `requests_total == successful + failed + throttle_rejections +
    /// validation_rejections` holds even for requests rejected before
    /// dispatch.
    pub fn record_received(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that reached the dispatcher, classified as either
    /// a handler success or a handler/broker failure (including timeouts).
    pub fn record_outcome(&self, module: &str, function: &str, duration: Duration, success: bool) {
        if success {
            self.requests_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }

        let micros = duration.as_micros() as u64;
        {
            let mut ring = self.latencies.lock().unwrap();
            if ring.len() == LATENCY_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(micros);
        }
        {
            let mut outcomes = self.recent_outcomes.lock().unwrap();
            if outcomes.len() == FAILURE_RATE_WINDOW {
                outcomes.pop_front();
            }
            outcomes.push_back(success);
        }

        let entry = self
            .per_handler
            .entry((module.to_string(), function.to_string()))
            .or_default();
        entry.count.fetch_add(1, Ordering::Relaxed);
        entry.duration_micros_total.fetch_add(micros, Ordering::Relaxed);
        if !success {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_validation_rejection(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle_rejection(&self) {
        self.throttle_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_security_event(&self) {
        self.security_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_successful(&self) -> u64 {
        self.requests_successful.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn validation_rejections(&self) -> u64 {
        self.validation_rejections.load(Ordering::Relaxed)
    }

    pub fn throttle_rejections(&self) -> u64 {
        self.throttle_rejections.load(Ordering::Relaxed)
    }

    pub fn security_events(&self) -> u64 {
        self.security_events.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn percentile(&self, p: f64) -> u64 {
        let ring = self.latencies.lock().unwrap();
        if ring.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = ring.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Failure rate over the last `FAILURE_RATE_WINDOW` requests, used by
    /// the health verdict.
    pub fn recent_failure_rate(&self) -> f64 {
        let outcomes = self.recent_outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return 0.0;
        }
        let failures = outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / outcomes.len() as f64
    }

    pub fn snapshot(&self, active_connections: u64, resource_status: Vec<(String, usize)>) -> MetricsSnapshot {
        let mut modules: Vec<ModuleStatus> = self
            .per_handler
            .iter()
            .map(|entry| {
                let (module, function) = entry.key().clone();
                let count = entry.count.load(Ordering::Relaxed);
                let total = entry.duration_micros_total.load(Ordering::Relaxed);
                ModuleStatus {
                    module,
                    function,
                    count,
                    avg_latency_micros: if count > 0 { total / count } else { 0 },
                    error_count: entry.errors.load(Ordering::Relaxed),
                }
            })
            .collect();
        modules.sort_by(|a, b| (&a.module, &a.function).cmp(&(&b.module, &b.function)));

        MetricsSnapshot {
            daemon_info: DaemonInfo {
                uptime_seconds: self.uptime_seconds(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            performance_metrics: PerformanceMetrics {
                requests_total: self.requests_total(),
                requests_successful: self.requests_successful(),
                requests_failed: self.requests_failed(),
                validation_rejections: self.validation_rejections(),
                throttle_rejections: self.throttle_rejections(),
                p50_micros: self.percentile(0.50),
                p95_micros: self.percentile(0.95),
                p99_micros: self.percentile(0.99),
            },
            resource_status,
            connection_summary: ConnectionSummary { active_connections },
            security_summary: SecuritySummary { security_events: self.security_events() },
            module_status: modules,
        }
    }

    /// Top-N handlers by request count, for `system.performance`.
    pub fn top_handlers(&self, n: usize) -> Vec<ModuleStatus> {
        let mut modules: Vec<ModuleStatus> = self
            .per_handler
            .iter()
            .map(|entry| {
                let (module, function) = entry.key().clone();
                let count = entry.count.load(Ordering::Relaxed);
                let total = entry.duration_micros_total.load(Ordering::Relaxed);
                ModuleStatus {
                    module,
                    function,
                    count,
                    avg_latency_micros: if count > 0 { total / count } else { 0 },
                    error_count: entry.errors.load(Ordering::Relaxed),
                }
            })
            .collect();
        modules.sort_by(|a, b| b.count.cmp(&a.count));
        modules.truncate(n);
        modules
    }

    pub fn health(
        &self,
        cpu_percent: f32,
        memory_bytes: u64,
        max_memory_mb: u64,
        listening: bool,
    ) -> HealthReport {
        let mem_ratio = memory_bytes as f64 / (max_memory_mb as f64 * 1024.0 * 1024.0);
        let failure_rate = self.recent_failure_rate();

        let mut checks = Vec::new();
        let cpu_status = if cpu_percent >= 95.0 {
            HealthStatus::Unhealthy
        } else if cpu_percent >= 80.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        checks.push((
            "cpu".to_string(),
            CheckResult { status: cpu_status, message: format!("{:.1}% of limit", cpu_percent) },
        ));

        let mem_status = if mem_ratio >= 0.95 {
            HealthStatus::Unhealthy
        } else if mem_ratio >= 0.80 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        checks.push((
            "memory".to_string(),
            CheckResult { status: mem_status, message: format!("{:.1}% of limit", mem_ratio * 100.0) },
        ));

        let failure_status = if failure_rate >= 0.20 {
            HealthStatus::Unhealthy
        } else if failure_rate >= 0.05 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        checks.push((
            "failure_rate".to_string(),
            CheckResult {
                status: failure_status,
                message: format!("{:.1}% over last {} requests", failure_rate * 100.0, FAILURE_RATE_WINDOW),
            },
        ));

        let listen_status = if listening { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
        checks.push((
            "socket".to_string(),
            CheckResult {
                status: listen_status,
                message: if listening { "listening".to_string() } else { "not listening".to_string() },
            },
        ));

        let overall = checks
            .iter()
            .map(|(_, c)| c.status)
            .max_by_key(|s| match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded => 1,
                HealthStatus::Unhealthy => 2,
            })
            .unwrap_or(HealthStatus::Healthy);

        HealthReport { status: overall, checks }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
