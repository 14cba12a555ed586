//! Process memory/CPU pressure sampling for the throttle's graduated-delay
//! gate. Sampled on a 1s tick, not per request.
//!
//! No crate in the reference pack performs process self-inspection, so this
//! reads `/proc/self/*` directly on Linux rather than pulling in an
//! ungrounded dependency (see DESIGN.md).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct Pressure {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Holds the most recently sampled pressure; updated by a background tick
/// owned by lifecycle, read by the throttle on every admission.
pub struct PressureSampler {
    memory_bytes: AtomicU64,
    cpu_percent_milli: AtomicU64,
    #[cfg(target_os = "linux")]
    last_sample: std::sync::Mutex<Option<(std::time::Instant, u64)>>,
}

impl PressureSampler {
    pub fn new() -> Arc<Self> {
        Arc::new(PressureSampler {
            memory_bytes: AtomicU64::new(0),
            cpu_percent_milli: AtomicU64::new(0),
            #[cfg(target_os = "linux")]
            last_sample: std::sync::Mutex::new(None),
        })
    }

    pub fn current(&self) -> Pressure {
        Pressure {
            memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
            cpu_percent: self.cpu_percent_milli.load(Ordering::Relaxed) as f32 / 1000.0,
        }
    }

    /// Re-reads `/proc/self/status` and `/proc/self/stat` and updates the
    /// stored gauges. No-op (reports zero pressure) off Linux.
    pub fn sample(&self) {
        #[cfg(target_os = "linux")]
        {
            if let Some(bytes) = read_rss_bytes() {
                self.memory_bytes.store(bytes, Ordering::Relaxed);
            }
            if let Some(pct) = self.read_cpu_percent() {
                self.cpu_percent_milli
                    .store((pct * 1000.0) as u64, Ordering::Relaxed);
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn read_cpu_percent(&self) -> Option<f32> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // Fields are space-separated; utime/stime are fields 14/15 (1-indexed).
        // The comm field (2nd) may itself contain spaces, so split after ')'.
        let after_comm = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let total_ticks = utime + stime;

        let ticks_per_sec = 100u64; // sysconf(_SC_CLK_TCK) is 100 on virtually all Linux builds
        let now = std::time::Instant::now();
        let mut last = self.last_sample.lock().ok()?;
        let pct = match *last {
            Some((prev_instant, prev_ticks)) => {
                let elapsed = now.duration_since(prev_instant).as_secs_f64();
                if elapsed > 0.0 && total_ticks >= prev_ticks {
                    let delta_ticks = (total_ticks - prev_ticks) as f64;
                    ((delta_ticks / ticks_per_sec as f64) / elapsed * 100.0) as f32
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, total_ticks));
        Some(pct)
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// The graduated delay for a given pressure relative to configured limits.
/// `None` means reject with `overloaded`.
pub fn graduated_delay(
    pressure: Pressure,
    max_memory_mb: u64,
    max_cpu_percent: f32,
) -> Option<std::time::Duration> {
    let mem_ratio = pressure.memory_bytes as f64 / (max_memory_mb as f64 * 1024.0 * 1024.0);
    let cpu_ratio = (pressure.cpu_percent / max_cpu_percent) as f64;
    let worst = mem_ratio.max(cpu_ratio);

    if worst >= 1.0 {
        None
    } else if worst >= 0.95 {
        Some(std::time::Duration::from_millis(1000))
    } else if worst >= 0.80 {
        Some(std::time::Duration::from_millis(100))
    } else {
        Some(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_80_percent_has_no_delay() {
        let p = Pressure { memory_bytes: 100 * 1024 * 1024, cpu_percent: 10.0 };
        assert_eq!(graduated_delay(p, 1024, 200.0), Some(std::time::Duration::ZERO));
    }

    #[test]
    fn between_80_and_95_percent_gets_a_short_delay() {
        let p = Pressure { memory_bytes: (1024.0 * 0.85 * 1024.0 * 1024.0) as u64, cpu_percent: 10.0 };
        assert_eq!(graduated_delay(p, 1024, 200.0), Some(std::time::Duration::from_millis(100)));
    }

    #[test]
    fn at_or_over_100_percent_is_rejected() {
        let p = Pressure { memory_bytes: 2048 * 1024 * 1024, cpu_percent: 10.0 };
        assert_eq!(graduated_delay(p, 1024, 200.0), None);
    }
}
