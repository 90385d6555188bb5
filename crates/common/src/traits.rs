//! Core traits for Scouter components
//!
//! The dispatcher only sees these two seams: something that runs a probe,
//! and somewhere to keep job records.

use crate::error::ScouterResult;
use crate::report::ProbePayload;
use crate::types::{JobRecord, ProbeType, RawOptions};
use anyhow::Result;
use async_trait::async_trait;

/// Runs one probe request to completion.
///
/// Implementations parse `options` into the probe's typed configuration;
/// option errors are returned as [`crate::ScouterError::Validation`].
#[async_trait]
pub trait ProbeEngine: Send + Sync {
    async fn execute(&self, probe_type: ProbeType, options: RawOptions)
        -> ScouterResult<ProbePayload>;

    /// Engine name/identifier
    fn name(&self) -> &str;
}

/// Receipt-keyed, TTL-expiring storage for job records.
///
/// Expired entries behave exactly like missing ones.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record, replacing any entry under the same receipt.
    async fn create(&self, record: JobRecord) -> Result<()>;

    /// Replace an existing record. Returns `false` (and stores nothing)
    /// when the receipt is absent, deleted or expired.
    async fn update(&self, record: JobRecord) -> Result<bool>;

    /// Fetch a live record.
    async fn get(&self, receipt: &str) -> Result<Option<JobRecord>>;

    /// Remove a record; returns whether a live one existed.
    async fn delete(&self, receipt: &str) -> Result<bool>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
