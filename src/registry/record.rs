//! Ownership records and the updates that carry them between replicas

use serde::{Deserialize, Serialize};
use std::fmt;

/// Textual form of the "unregistered" account sentinel
pub const UNREGISTERED: &str = "-";

/// Seconds since the Unix epoch, as stamped by the originating server
pub type Timestamp = i64;

/// Parse an account from its textual form, mapping the sentinel to `None`
pub fn parse_account(text: &str) -> Option<String> {
    (text != UNREGISTERED).then(|| text.to_string())
}

/// Current wall-clock time in seconds
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// A live binding of a nick to an account, as held by the registry store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NickRecord {
    /// Registered nick (unique key)
    pub name: String,
    /// Owning account
    pub account: String,
    /// When this binding was established at its origin server
    pub claim_time: Timestamp,
    /// When the nick was last actively used
    pub last_used: Timestamp,
}

impl NickRecord {
    /// Create a new record
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        claim_time: Timestamp,
        last_used: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
            claim_time,
            last_used,
        }
    }

    /// Whether this record is stale relative to `cutoff`
    pub fn is_stale(&self, cutoff: Timestamp) -> bool {
        self.last_used < cutoff
    }
}

/// An ownership change, either claiming a nick or releasing it.
///
/// This is the unit of replication: incremental updates carry one of these,
/// reconciliation bursts carry one per record. `account == None` is the
/// unregistration sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NickUpdate {
    pub name: String,
    pub account: Option<String>,
    pub claim_time: Timestamp,
    pub last_used: Timestamp,
}

impl NickUpdate {
    /// Claim `name` for `account`
    pub fn claim(
        name: impl Into<String>,
        account: impl Into<String>,
        claim_time: Timestamp,
        last_used: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            account: Some(account.into()),
            claim_time,
            last_used,
        }
    }

    /// Release `name`, stamped at `at`
    pub fn unregister(name: impl Into<String>, at: Timestamp) -> Self {
        Self {
            name: name.into(),
            account: None,
            claim_time: at,
            last_used: at,
        }
    }

    /// Whether this update requests removal
    pub fn is_unregistration(&self) -> bool {
        self.account.is_none()
    }

    /// Account in textual form (`-` for the sentinel)
    pub fn account_str(&self) -> &str {
        self.account.as_deref().unwrap_or(UNREGISTERED)
    }

    /// The record this update would store, if it is a claim
    pub fn to_record(&self) -> Option<NickRecord> {
        self.account.as_ref().map(|account| NickRecord {
            name: self.name.clone(),
            account: account.clone(),
            claim_time: self.claim_time,
            last_used: self.last_used,
        })
    }
}

impl From<NickRecord> for NickUpdate {
    fn from(record: NickRecord) -> Self {
        Self {
            name: record.name,
            account: Some(record.account),
            claim_time: record.claim_time,
            last_used: record.last_used,
        }
    }
}

impl From<&NickRecord> for NickUpdate {
    fn from(record: &NickRecord) -> Self {
        record.clone().into()
    }
}

impl fmt::Display for NickUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.name,
            self.account_str(),
            self.claim_time,
            self.last_used
        )
    }
}
