//! Registration policy applied at the boundary
//!
//! The registry trusts whatever it is given. These checks run before a
//! request reaches it: who may register, which nick and account a plain user
//! may name, the per-account quota, and nick syntax.

mod admission;
mod nick;

pub use admission::{check_nick_change, check_ready, Admission, ReadyCheck};
pub use nick::{irc_eq, irc_lower, is_valid_nick};

use crate::config::{RegistrationConfig, RegistrationMode};
use crate::error::{Error, Result};
use crate::registry::{parse_account, Timestamp};

/// Whoever issued a registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    /// Current nick (or server name for servers)
    pub nick: String,
    /// Account the requester is logged in to
    pub account: Option<String>,
    /// Holds the privilege to set any registration
    pub privileged: bool,
    /// Request came from a remote server, e.g. services
    pub remote_server: bool,
}

impl Requester {
    /// A plain local user
    pub fn user(nick: impl Into<String>, account: Option<&str>) -> Self {
        Self {
            nick: nick.into(),
            account: account.map(str::to_string),
            privileged: false,
            remote_server: false,
        }
    }

    /// A local user with registration privileges
    pub fn oper(nick: impl Into<String>, account: Option<&str>) -> Self {
        Self {
            privileged: true,
            ..Self::user(nick, account)
        }
    }

    /// A remote server such as services
    pub fn server(name: impl Into<String>) -> Self {
        Self {
            nick: name.into(),
            account: None,
            privileged: true,
            remote_server: true,
        }
    }
}

/// A parsed `[[<nick>] <account>|-]` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub nick: String,
    /// `None` unregisters
    pub account: Option<String>,
    /// Supplied only by servers
    pub claim_time: Option<Timestamp>,
    /// Supplied only by servers
    pub last_used: Option<Timestamp>,
}

impl RegistrationRequest {
    /// Parse command parameters.
    ///
    /// No parameters registers the requester's nick to their own account; one
    /// names the account (or `-`); two name nick and account. Servers may add
    /// claim time and last-used time as third and fourth parameters.
    pub fn parse(requester: &Requester, params: &[&str]) -> Result<Self> {
        let (nick, account) = match params {
            [] => {
                let account = requester.account.clone().ok_or(Error::NotLoggedIn)?;
                (requester.nick.clone(), account)
            }
            [account] => (requester.nick.clone(), account.to_string()),
            [nick, account, ..] => (nick.to_string(), account.to_string()),
        };
        let account = parse_account(&account);

        let (claim_time, last_used) = match params {
            [_, _, claim_time, last_used, ..] if requester.remote_server => {
                (Some(parse_time(claim_time)?), Some(parse_time(last_used)?))
            }
            _ => (None, None),
        };

        Ok(Self {
            nick,
            account,
            claim_time,
            last_used,
        })
    }
}

fn parse_time(value: &str) -> Result<Timestamp> {
    value
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("bad timestamp '{}'", value)))
}

/// Registration rules from configuration
#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    pub mode: RegistrationMode,
    pub max_per_account: usize,
    pub nick_max_len: usize,
}

impl RegistrationPolicy {
    pub fn new(config: &RegistrationConfig) -> Self {
        Self {
            mode: config.mode,
            max_per_account: config.max_per_account,
            nick_max_len: config.nick_max_len,
        }
    }

    /// Check a request. `owned` is what the requester's account already holds.
    pub fn authorize(
        &self,
        requester: &Requester,
        request: &RegistrationRequest,
        owned: &[String],
    ) -> Result<()> {
        match self.mode {
            RegistrationMode::Services if !requester.remote_server => {
                return Err(Error::ServicesOnly);
            }
            RegistrationMode::Opers if !requester.privileged => {
                return Err(Error::PermissionDenied(
                    "registration requires operator privileges".to_string(),
                ));
            }
            _ => {}
        }

        if !requester.privileged {
            if !irc_eq(&request.nick, &requester.nick) {
                return Err(Error::NotOwnNick);
            }
            if let Some(account) = &request.account {
                match &requester.account {
                    None => return Err(Error::NotLoggedIn),
                    Some(own) if own != account => return Err(Error::NotOwnAccount),
                    Some(_) => {}
                }
                let already_owned = owned.iter().any(|name| *name == request.nick);
                if !already_owned && owned.len() >= self.max_per_account {
                    return Err(Error::QuotaExceeded {
                        max: self.max_per_account,
                    });
                }
            }
        }

        if !requester.remote_server && !is_valid_nick(&request.nick, self.nick_max_len) {
            return Err(Error::InvalidNick(request.nick.clone()));
        }

        Ok(())
    }
}
