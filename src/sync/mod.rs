//! Replica synchronization
//!
//! Incremental propagation of local changes plus full-state bursts whenever a
//! peer link comes up. Merging is idempotent, so bursts may be repeated and
//! run from both ends of a link.

mod message;
mod synchronizer;

pub use message::SyncMessage;
pub use synchronizer::{SyncStats, Synchronizer};
