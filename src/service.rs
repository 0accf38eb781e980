//! Registration service
//!
//! The surface the rest of a server talks to. Local changes are applied to the
//! store and broadcast; peer traffic goes through the synchronizer, which
//! applies without forwarding.

use crate::config::Config;
use crate::error::Result;
use crate::expiry::ExpirySweeper;
use crate::policy::{
    check_nick_change, check_ready, Admission, ReadyCheck, RegistrationPolicy,
    RegistrationRequest, Requester,
};
use crate::registry::{now, NickRecord, NickUpdate, RegistryStore, Timestamp};
use crate::sync::{SyncMessage, Synchronizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// One replica's registry together with its synchronizer and sweeper
pub struct RegistrationService {
    store: Arc<RegistryStore>,
    sync: Arc<Synchronizer>,
    sweeper: Arc<ExpirySweeper>,
    policy: RegistrationPolicy,
}

impl RegistrationService {
    /// Build a service from validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        let window = config.expiry.window()?;
        Ok(Self::with_parts(
            config.server.name.clone(),
            RegistrationPolicy::new(&config.registration),
            window,
        ))
    }

    /// Build a service from explicit parts
    pub fn with_parts(
        server_name: impl Into<String>,
        policy: RegistrationPolicy,
        expiry_window: Duration,
    ) -> Self {
        let store = Arc::new(RegistryStore::new());
        let sync = Arc::new(Synchronizer::new(server_name, Arc::clone(&store)));
        let sweeper = Arc::new(ExpirySweeper::new(Arc::clone(&store), expiry_window));
        Self {
            store,
            sync,
            sweeper,
            policy,
        }
    }

    /// This server's name
    pub fn server_name(&self) -> &str {
        self.sync.server_name()
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// Underlying synchronizer
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    /// Underlying sweeper, e.g. to spawn its run loop
    pub fn sweeper(&self) -> &Arc<ExpirySweeper> {
        &self.sweeper
    }

    /// Active policy
    pub fn policy(&self) -> &RegistrationPolicy {
        &self.policy
    }

    /// Register `name` to `account` (`None` unregisters) with explicit times.
    /// Effective changes are broadcast to peers. Returns whether state changed.
    pub fn register(
        &self,
        name: &str,
        account: Option<&str>,
        claim_time: Timestamp,
        last_used: Timestamp,
    ) -> bool {
        let update = NickUpdate {
            name: name.to_string(),
            account: account.map(str::to_string),
            claim_time,
            last_used,
        };
        self.submit(update)
    }

    /// Register `name` to `account` stamped with the current time
    pub fn register_now(&self, name: &str, account: &str) -> bool {
        let at = now();
        self.register(name, Some(account), at, at)
    }

    /// Release `name`, stamped with the current time
    pub fn unregister(&self, name: &str) -> bool {
        self.submit(NickUpdate::unregister(name, now()))
    }

    /// Current owner of `name`
    pub fn get_owner(&self, name: &str) -> Option<String> {
        self.store.lookup(name).map(|record| record.account)
    }

    /// Full record for `name`
    pub fn get_record(&self, name: &str) -> Option<NickRecord> {
        self.store.lookup(name)
    }

    /// Nicks owned by `account`
    pub fn get_names(&self, account: &str) -> Vec<String> {
        self.store.owned_names(account)
    }

    /// Mark `name` as in use
    pub fn touch(&self, name: &str) {
        self.store.touch(name);
    }

    /// Check and apply a registration command.
    ///
    /// Returns whether the registry changed. Policy refusals come back as
    /// errors for the caller to report to the requester.
    pub fn handle_request(&self, requester: &Requester, params: &[&str]) -> Result<bool> {
        let request = RegistrationRequest::parse(requester, params)?;
        let owned = requester
            .account
            .as_deref()
            .map(|account| self.get_names(account))
            .unwrap_or_default();
        self.policy.authorize(requester, &request, &owned)?;

        let at = now();
        let changed = self.register(
            &request.nick,
            request.account.as_deref(),
            request.claim_time.unwrap_or(at),
            request.last_used.unwrap_or(at),
        );
        info!(
            "{} {}registered {}{}",
            requester.nick,
            if request.account.is_none() { "un" } else { "" },
            request.nick,
            if changed { "" } else { " (no change)" }
        );
        Ok(changed)
    }

    /// A party logged in as `account` wants to change from `old_nick` to
    /// `new_nick`. The old nick counts as used.
    pub fn nick_change(
        &self,
        old_nick: &str,
        new_nick: &str,
        account: Option<&str>,
        fully_connected: bool,
    ) -> Admission {
        self.store.touch(old_nick);
        let owner = self.get_owner(new_nick);
        check_nick_change(owner.as_deref(), account, fully_connected)
    }

    /// A connecting party holding `nick` has finished connecting
    pub fn connection_ready(&self, nick: &str, account: Option<&str>) -> ReadyCheck {
        let owner = self.get_owner(nick);
        check_ready(owner.as_deref(), account)
    }

    /// A party holding `nick` disconnected
    pub fn quit(&self, nick: &str) {
        self.store.touch(nick);
    }

    /// A peer link came up; drain the returned queue onto it
    pub fn peer_joined(&self, peer: &str) -> UnboundedReceiver<SyncMessage> {
        self.sync.peer_joined(peer)
    }

    /// A peer link went down
    pub fn peer_left(&self, peer: &str) {
        self.sync.peer_left(peer);
    }

    /// Apply a message from a peer
    pub fn receive(&self, from: &str, message: SyncMessage) -> usize {
        self.sync.receive(from, message)
    }

    /// Run one expiry sweep now
    pub fn sweep(&self) -> usize {
        self.sweeper.sweep()
    }

    /// Start the periodic expiry loop on the current runtime, sweeping every
    /// `period` until `shutdown` flips to true
    pub fn spawn_sweeper(
        &self,
        period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let sweeper = Arc::clone(&self.sweeper);
        tokio::spawn(async move { sweeper.run(period, shutdown).await })
    }

    fn submit(&self, update: NickUpdate) -> bool {
        self.sync.submit(&update)
    }
}
