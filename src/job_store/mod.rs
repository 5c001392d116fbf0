//! Durable job persistence (spec §4.2 JobStore).
//!
//! Backed by Fjall, an embedded LSM key-value store, following the same
//! partitioned-keyspace layout the rest of this crate's storage code uses.
//! `JobStore` owns uniqueness enforcement over (sku, sha256, theme) and
//! delegates transition legality to [`crate::state_machine`].

pub mod error;
pub mod partitions;
pub mod pruning;
pub mod store;

pub use error::{JobStoreError, Result};
pub use pruning::{PruneStats, DEFAULT_RETENTION_DAYS};
pub use store::{CreateOutcome, JobStore};
