//! In-memory receipt store with a fixed time-to-live
//!
//! Every successful write pushes an entry's expiry out by the TTL. Readers
//! never see an expired entry even before the periodic purge drops it.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use scouter_common::{JobRecord, JobStore};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug)]
struct Entry {
    record: JobRecord,
    expires_at: Instant,
}

impl Entry {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

pub struct MemoryJobStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop expired entries; returns how many went.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        self.entries.retain(|_, entry| {
            if entry.is_live(now) {
                true
            } else {
                expired += 1;
                false
            }
        });
        if expired > 0 {
            debug!(expired, remaining = self.entries.len(), "purged expired receipts");
        }
        expired
    }

    /// Purge on a fixed period until the store is dropped.
    pub fn spawn_purge_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.purge();
            }
        })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<()> {
        let key = record.receipt.as_str().to_string();
        self.entries.insert(
            key,
            Entry {
                record,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn update(&self, record: JobRecord) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(record.receipt.as_str()) {
            Some(mut entry) if entry.is_live(now) => {
                entry.record = record;
                entry.expires_at = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, receipt: &str) -> Result<Option<JobRecord>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(receipt)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.record.clone()))
    }

    async fn delete(&self, receipt: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(receipt)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.purge())
    }

    fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|entry| entry.is_live(now)).count()
    }
}
