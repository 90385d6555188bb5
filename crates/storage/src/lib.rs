//! Job storage for Scouter
//!
//! Receipts live only in memory and expire after a fixed TTL; a restart
//! forgets every job.

pub mod memory;

pub use memory::MemoryJobStore;
