//! The resource registry: per-kind tables of opaque string handles to live
//! objects, with idle-timeout reaping and capacity limits.

use crate::clock::Clock;
use crate::error::BridgeError;
use bridge_config::{BridgeConfig, ResourceKind};
use rand::RngCore;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// A cleanup action run exactly once, when a handle is deleted or evicted.
pub type Destructor = Box<dyn FnOnce() + Send>;

struct ResourceRecord {
    kind: ResourceKind,
    value: Arc<dyn Any + Send + Sync>,
    created_at: Instant,
    last_used_at: Instant,
    owner_conn_id: Option<String>,
    idle_ttl: Duration,
    destructor: Option<Destructor>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KindStats {
    pub count: usize,
    pub oldest_age_secs: u64,
}

#[derive(Debug, Clone)]
pub struct HandleSummary {
    pub handle: String,
    pub kind: ResourceKind,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub owner_conn_id: Option<String>,
}

struct KindTable {
    entries: HashMap<String, ResourceRecord>,
    capacity: usize,
    default_ttl: Duration,
}

/// Options accompanying a `put`.
#[derive(Default)]
pub struct PutOptions {
    pub ttl: Option<Duration>,
    pub destructor: Option<Destructor>,
    pub owner_conn_id: Option<String>,
}

pub struct ResourceRegistry {
    tables: HashMap<ResourceKind, Mutex<KindTable>>,
    clock: Arc<dyn Clock>,
    evictions_total: AtomicU64,
}

impl ResourceRegistry {
    pub fn new(config: &BridgeConfig, clock: Arc<dyn Clock>) -> Self {
        let mut tables = HashMap::new();
        for kind in ResourceKind::ALL {
            tables.insert(
                *kind,
                Mutex::new(KindTable {
                    entries: HashMap::new(),
                    capacity: config.capacity(*kind),
                    default_ttl: config.idle_ttl(*kind),
                }),
            );
        }
        ResourceRegistry {
            tables,
            clock,
            evictions_total: AtomicU64::new(0),
        }
    }

    fn table(&self, kind: ResourceKind) -> &Mutex<KindTable> {
        self.tables.get(&kind).expect("ResourceKind::ALL is exhaustive")
    }

    fn mint_handle(kind: ResourceKind) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}_{}", kind.prefix(), hex)
    }

    /// Stores a value under a freshly minted handle. Never fails; if the
    /// kind is at capacity the oldest-idle entry is evicted first.
    pub async fn put<T: Any + Send + Sync>(
        &self,
        kind: ResourceKind,
        value: T,
        opts: PutOptions,
    ) -> String {
        let handle = Self::mint_handle(kind);
        let now = self.clock.now();
        let mut table = self.table(kind).lock().await;

        if table.entries.len() >= table.capacity {
            if let Some(victim) = table
                .entries
                .iter()
                .min_by_key(|(_, rec)| rec.last_used_at)
                .map(|(h, _)| h.clone())
            {
                warn!(kind = %kind, handle = %victim, "registry at capacity, evicting oldest-idle entry");
                if let Some(record) = table.entries.remove(&victim) {
                    self.run_destructor(record);
                }
            }
        }

        table.entries.insert(
            handle.clone(),
            ResourceRecord {
                kind,
                value: Arc::new(value),
                created_at: now,
                last_used_at: now,
                owner_conn_id: opts.owner_conn_id,
                idle_ttl: opts.ttl.unwrap_or(table.default_ttl),
                destructor: opts.destructor,
            },
        );
        handle
    }

    /// Looks up a handle and returns the stored value, also refreshing
    /// `last_used_at`. Callers downcast the `Arc<dyn Any>` to their type.
    pub async fn get(
        &self,
        kind: ResourceKind,
        handle: &str,
    ) -> Result<Arc<dyn Any + Send + Sync>, BridgeError> {
        let now = self.clock.now();
        let mut table = self.table(kind).lock().await;
        match table.entries.get_mut(handle) {
            Some(record) => {
                record.last_used_at = now;
                Ok(record.value.clone())
            }
            None => Err(BridgeError::InvalidHandle(handle.to_string())),
        }
    }

    /// Refreshes `last_used_at` without returning the value. Idempotent.
    pub async fn touch(&self, kind: ResourceKind, handle: &str) -> Result<(), BridgeError> {
        let now = self.clock.now();
        let mut table = self.table(kind).lock().await;
        match table.entries.get_mut(handle) {
            Some(record) => {
                record.last_used_at = now;
                Ok(())
            }
            None => Err(BridgeError::InvalidHandle(handle.to_string())),
        }
    }

    /// Deletes a handle, running its destructor exactly once. Returns
    /// `Ok(())` the first time, `Err(InvalidHandle)` on a repeat delete.
    pub async fn delete(&self, kind: ResourceKind, handle: &str) -> Result<(), BridgeError> {
        let mut table = self.table(kind).lock().await;
        match table.entries.remove(handle) {
            Some(record) => {
                drop(table);
                self.run_destructor(record);
                Ok(())
            }
            None => Err(BridgeError::InvalidHandle(handle.to_string())),
        }
    }

    fn run_destructor(&self, record: ResourceRecord) {
        self.evictions_total.fetch_add(1, Ordering::Relaxed);
        if let Some(destructor) = record.destructor {
            destructor();
        }
    }

    /// Evicts every entry whose idle time exceeds its TTL, across all
    /// kinds. Returns the number of entries evicted.
    pub async fn reap_idle(&self) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;
        for kind in ResourceKind::ALL {
            let mut table = self.table(*kind).lock().await;
            let expired: Vec<String> = table
                .entries
                .iter()
                .filter(|(_, rec)| now.saturating_duration_since(rec.last_used_at) > rec.idle_ttl)
                .map(|(h, _)| h.clone())
                .collect();
            for handle in expired {
                if let Some(record) = table.entries.remove(&handle) {
                    drop(table);
                    self.run_destructor(record);
                    evicted += 1;
                    table = self.table(*kind).lock().await;
                }
            }
        }
        evicted
    }

    /// Destructor-evicts every entry across every kind. Used at shutdown.
    pub async fn evict_all(&self) -> usize {
        let mut evicted = 0;
        for kind in ResourceKind::ALL {
            let mut table = self.table(*kind).lock().await;
            let all: Vec<String> = table.entries.keys().cloned().collect();
            for handle in all {
                if let Some(record) = table.entries.remove(&handle) {
                    drop(table);
                    self.run_destructor(record);
                    evicted += 1;
                    table = self.table(*kind).lock().await;
                }
            }
        }
        evicted
    }

    pub async fn list(&self, kind: Option<ResourceKind>) -> Vec<HandleSummary> {
        let now = self.clock.now();
        let kinds: Vec<ResourceKind> = match kind {
            Some(k) => vec![k],
            None => ResourceKind::ALL.to_vec(),
        };
        let mut out = Vec::new();
        for k in kinds {
            let table = self.table(k).lock().await;
            for (handle, record) in table.entries.iter() {
                out.push(HandleSummary {
                    handle: handle.clone(),
                    kind: record.kind,
                    age_secs: now.saturating_duration_since(record.created_at).as_secs(),
                    idle_secs: now.saturating_duration_since(record.last_used_at).as_secs(),
                    owner_conn_id: record.owner_conn_id.clone(),
                });
            }
        }
        out
    }

    pub async fn stats(&self) -> HashMap<ResourceKind, KindStats> {
        let now = self.clock.now();
        let mut out = HashMap::new();
        for kind in ResourceKind::ALL {
            let table = self.table(*kind).lock().await;
            let oldest_age_secs = table
                .entries
                .values()
                .map(|r| now.saturating_duration_since(r.created_at).as_secs())
                .max()
                .unwrap_or(0);
            out.insert(
                *kind,
                KindStats {
                    count: table.entries.len(),
                    oldest_age_secs,
                },
            );
        }
        out
    }

    pub fn evictions_total(&self) -> u64 {
        self.evictions_total.load(Ordering::Relaxed)
    }
}
