//! Three independent admission gates: a concurrency semaphore, a sliding
//! rate window, and a pressure-gated graduated delay.

use crate::clock::Clock;
use crate::error::BridgeError;
use crate::pressure::{graduated_delay, PressureSampler};
use bridge_config::BridgeConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// Held for the lifetime of one admitted request; releases the
/// concurrency slot on drop regardless of how the request finishes.
pub struct AdmissionGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

pub struct Throttle {
    semaphore: Arc<Semaphore>,
    rate_window: Mutex<VecDeque<std::time::Instant>>,
    max_per_minute: u32,
    pressure: Arc<PressureSampler>,
    max_memory_mb: u64,
    max_cpu_percent: f32,
    clock: Arc<dyn Clock>,
    pub throttle_rejections: AtomicU64,
}

impl Throttle {
    pub fn new(config: &BridgeConfig, pressure: Arc<PressureSampler>, clock: Arc<dyn Clock>) -> Self {
        Throttle {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            rate_window: Mutex::new(VecDeque::new()),
            max_per_minute: config.max_requests_per_minute,
            pressure,
            max_memory_mb: config.max_memory_mb,
            max_cpu_percent: config.max_cpu_percent,
            clock,
            throttle_rejections: AtomicU64::new(0),
        }
    }

    /// Runs all three gates in order. On success, sleeps for any
    /// pressure-induced graduated delay before returning the guard.
    pub async fn admit(&self) -> Result<AdmissionGuard, BridgeError> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                self.throttle_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(BridgeError::CapacityFull("concurrency".to_string()));
            }
        };

        if let Err(wait_ms) = self.check_rate_window().await {
            self.throttle_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(BridgeError::RateLimited(wait_ms));
        }

        let pressure = self.pressure.current();
        match graduated_delay(pressure, self.max_memory_mb, self.max_cpu_percent) {
            Some(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(AdmissionGuard { _permit: permit })
            }
            None => {
                self.throttle_rejections.fetch_add(1, Ordering::Relaxed);
                Err(BridgeError::Overloaded(1000))
            }
        }
    }

    /// Sliding 60s window. Returns `Err(retry_after_ms)` when the limit is
    /// already met.
    async fn check_rate_window(&self) -> Result<(), u64> {
        let now = self.clock.now();
        let window = Duration::from_secs(60);
        let mut admissions = self.rate_window.lock().await;
        while let Some(front) = admissions.front() {
            if now.saturating_duration_since(*front) > window {
                admissions.pop_front();
            } else {
                break;
            }
        }
        if admissions.len() as u32 >= self.max_per_minute {
            let oldest = *admissions.front().unwrap();
            let retry_after = window.saturating_sub(now.saturating_duration_since(oldest));
            return Err(retry_after.as_millis() as u64);
        }
        admissions.push_back(now);
        Ok(())
    }

    pub fn throttle_rejections_total(&self) -> u64 {
        self.throttle_rejections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn throttle(config: &BridgeConfig) -> (Throttle, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        (Throttle::new(config, PressureSampler::new(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn nth_plus_one_concurrent_request_is_capacity_full() {
        let config = BridgeConfig { max_concurrent_requests: 2, ..Default::default() };
        let (throttle, _clock) = throttle(&config);
        let g1 = throttle.admit().await.unwrap();
        let g2 = throttle.admit().await.unwrap();
        let err = throttle.admit().await.unwrap_err();
        assert_eq!(err.code(), "capacity_full");
        drop(g1);
        assert!(throttle.admit().await.is_ok());
        drop(g2);
    }

    #[tokio::test]
    async fn rate_window_rejects_past_the_per_minute_limit() {
        let config = BridgeConfig { max_requests_per_minute: 2, ..Default::default() };
        let (throttle, clock) = throttle(&config);
        assert!(throttle.admit().await.is_ok());
        assert!(throttle.admit().await.is_ok());
        let err = throttle.admit().await.unwrap_err();
        assert_eq!(err.code(), "rate_limited");

        clock.advance(Duration::from_secs(61));
        assert!(throttle.admit().await.is_ok());
    }
}
