//! Nick ownership registry
//!
//! Holds the replicated state: ownership records, the pure merge rule used to
//! reconcile competing claims, and the concurrent store both are applied to.

mod record;
mod resolver;
mod store;

pub use record::{now, parse_account, NickRecord, NickUpdate, Timestamp, UNREGISTERED};
pub use resolver::{merge, resolve, Resolution};
pub use store::{IndexError, RegistryStore};
