//! Peer message content
//!
//! Only the information content is fixed here; framing and transport belong
//! to the host. The binary form is what a host ships over its own links.

use crate::error::{Error, Result};
use crate::registry::{NickRecord, NickUpdate};
use serde::{Deserialize, Serialize};

/// A message exchanged between replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// A single ownership change
    Update(NickUpdate),
    /// The sender's complete registry, sent when a link comes up
    Burst(Vec<NickUpdate>),
}

impl SyncMessage {
    /// Build a burst from a store snapshot
    pub fn burst(records: Vec<NickRecord>) -> Self {
        SyncMessage::Burst(records.into_iter().map(NickUpdate::from).collect())
    }

    /// Number of ownership tuples carried
    pub fn record_count(&self) -> usize {
        match self {
            SyncMessage::Update(_) => 1,
            SyncMessage::Burst(records) => records.len(),
        }
    }

    /// Serialize for the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the wire
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
