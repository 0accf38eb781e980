//! Whether a party may hold a registered nick

/// Decision when a party tries to take a nick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Nick is free or belongs to the party's account
    Allow,
    /// Nick belongs to another account; refuse the change
    Deny { owner: String },
    /// Nick belongs to another account but the party is still connecting.
    /// Let it through now and re-check when the connection completes, so a
    /// pending login can land first.
    Defer { owner: String },
}

/// Decision when a connection completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyCheck {
    Allow,
    /// The party holds a nick owned by another account and must be renamed
    ForceRename { owner: String },
}

/// Decide whether a party logged in as `account` may adopt a nick owned by `owner`
pub fn check_nick_change(
    owner: Option<&str>,
    account: Option<&str>,
    fully_connected: bool,
) -> Admission {
    match owner {
        None => Admission::Allow,
        Some(owner) if Some(owner) == account => Admission::Allow,
        Some(owner) if fully_connected => Admission::Deny {
            owner: owner.to_string(),
        },
        Some(owner) => Admission::Defer {
            owner: owner.to_string(),
        },
    }
}

/// Decide whether a connecting party may keep its nick once it is ready
pub fn check_ready(owner: Option<&str>, account: Option<&str>) -> ReadyCheck {
    match owner {
        Some(owner) if Some(owner) != account => ReadyCheck::ForceRename {
            owner: owner.to_string(),
        },
        _ => ReadyCheck::Allow,
    }
}
