//! nickreg - Replicated nick registration
//!
//! This library keeps a nick -> account registry consistent across a set of
//! independently running servers that may partition and rejoin. Conflicting
//! claims are merged deterministically, local changes are broadcast as they
//! happen, and full bursts reconcile replicas whenever a link comes up.

pub mod config;
pub mod error;
pub mod expiry;
pub mod policy;
pub mod registry;
pub mod service;
pub mod simulation;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use service::RegistrationService;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::registry::{NickRecord, NickUpdate, RegistryStore};
    pub use crate::service::RegistrationService;
    pub use crate::sync::{SyncMessage, Synchronizer};
}
