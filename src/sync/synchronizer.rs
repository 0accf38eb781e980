//! Update propagation and reconciliation between replicas

use super::message::SyncMessage;
use crate::registry::{NickUpdate, RegistryStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Incremental updates enqueued to peers (one per peer)
    pub updates_sent: u64,
    /// Reconciliation bursts enqueued
    pub bursts_sent: u64,
    /// Ownership tuples received from peers
    pub records_received: u64,
    /// Received tuples that changed local state
    pub records_applied: u64,
}

#[derive(Debug, Default)]
struct Counters {
    updates_sent: AtomicU64,
    bursts_sent: AtomicU64,
    records_received: AtomicU64,
    records_applied: AtomicU64,
}

/// Keeps connected peers in step with the local registry.
///
/// Each peer gets an unbounded outbound queue; the host drains the receiving
/// end onto whatever transport it uses. Nothing here waits on a peer.
///
/// Lock order: publish gate, then a nick's store shard, then the peer table.
pub struct Synchronizer {
    /// This server's name
    server_name: String,
    /// Local registry
    store: Arc<RegistryStore>,
    /// Shared by local submits, exclusive while a burst is snapshotted and queued
    publish: RwLock<()>,
    /// Outbound queues by peer name
    peers: RwLock<HashMap<String, UnboundedSender<SyncMessage>>>,
    counters: Counters,
}

impl Synchronizer {
    /// Create a synchronizer for `store`
    pub fn new(server_name: impl Into<String>, store: Arc<RegistryStore>) -> Self {
        Self {
            server_name: server_name.into(),
            store,
            publish: RwLock::new(()),
            peers: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// This server's name
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Register a newly reachable peer and queue a full burst for it.
    ///
    /// Returns the receiving end of the peer's outbound queue. The burst is
    /// always the first message on it. A peer that was already registered has
    /// its old queue replaced.
    pub fn peer_joined(&self, peer: &str) -> UnboundedReceiver<SyncMessage> {
        let (tx, rx) = mpsc::unbounded_channel();

        // No local change can be published between the snapshot and the
        // registration of the queue.
        let _gate = self.publish.write();
        let burst = SyncMessage::burst(self.store.snapshot());
        let count = burst.record_count();
        // rx is alive, so this cannot fail
        let _ = tx.send(burst);
        self.counters.bursts_sent.fetch_add(1, Ordering::Relaxed);

        if self.peers.write().insert(peer.to_string(), tx).is_some() {
            info!("Peer {} relinked, previous link dropped", peer);
        }
        info!("Peer {} joined, queued burst of {} records", peer, count);
        rx
    }

    /// Forget a peer. Its queue is closed.
    pub fn peer_left(&self, peer: &str) {
        if self.peers.write().remove(peer).is_some() {
            info!("Peer {} left", peer);
        }
    }

    /// Queue another full burst to an already connected peer
    pub fn reconcile(&self, peer: &str) -> bool {
        let _gate = self.publish.write();
        if !self.peers.read().contains_key(peer) {
            return false;
        }
        let burst = SyncMessage::burst(self.store.snapshot());
        let count = burst.record_count();

        let sent = self
            .peers
            .read()
            .get(peer)
            .map(|tx| tx.send(burst).is_ok())
            .unwrap_or(false);
        if !sent {
            self.prune_closed();
            return false;
        }
        self.counters.bursts_sent.fetch_add(1, Ordering::Relaxed);
        debug!("Queued reconciliation burst of {} records to {}", count, peer);
        true
    }

    /// Apply a locally originated change and, if it took effect, queue it to
    /// every connected peer. Returns whether state changed.
    ///
    /// Queueing happens while the nick is still locked, so peers receive
    /// changes to one nick in the order they were applied here.
    pub fn submit(&self, update: &NickUpdate) -> bool {
        let _gate = self.publish.read();
        let changed = self.store.apply_then(update, || self.broadcast(update));
        if !changed {
            debug!("Update {} had no effect", update);
        }
        changed
    }

    /// Names of connected peers, sorted
    pub fn connected_peers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Queue a change to every connected peer. Callers hold the nick's lock.
    fn broadcast(&self, update: &NickUpdate) {
        let message = SyncMessage::Update(update.clone());
        let mut dead = false;
        {
            let peers = self.peers.read();
            for (peer, tx) in peers.iter() {
                if tx.send(message.clone()).is_err() {
                    warn!("Peer {} queue closed, dropping peer", peer);
                    dead = true;
                } else {
                    self.counters.updates_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if dead {
            self.prune_closed();
        }
        debug!("Broadcast {}", update);
    }

    /// Apply a message received from `from`. Returns how many records changed.
    ///
    /// Received changes are never forwarded: each origin broadcasts its own
    /// changes, and reconciliation covers anyone who missed them.
    pub fn receive(&self, from: &str, message: SyncMessage) -> usize {
        if from == self.server_name {
            warn!("Ignoring sync message that claims to come from ourselves");
            return 0;
        }

        let received = message.record_count();
        let applied = match message {
            SyncMessage::Update(update) => usize::from(self.store.apply(&update)),
            SyncMessage::Burst(updates) => {
                let applied = updates
                    .iter()
                    .filter(|update| self.store.apply(update))
                    .count();
                info!(
                    "Burst from {}: {} records, {} changed",
                    from,
                    updates.len(),
                    applied
                );
                applied
            }
        };

        self.counters
            .records_received
            .fetch_add(received as u64, Ordering::Relaxed);
        self.counters
            .records_applied
            .fetch_add(applied as u64, Ordering::Relaxed);
        applied
    }

    /// Current traffic counters
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            updates_sent: self.counters.updates_sent.load(Ordering::Relaxed),
            bursts_sent: self.counters.bursts_sent.load(Ordering::Relaxed),
            records_received: self.counters.records_received.load(Ordering::Relaxed),
            records_applied: self.counters.records_applied.load(Ordering::Relaxed),
        }
    }

    fn prune_closed(&self) {
        self.peers.write().retain(|_, tx| !tx.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NickRecord;

    fn replica(name: &str) -> (Arc<RegistryStore>, Synchronizer) {
        let store = Arc::new(RegistryStore::new());
        let sync = Synchronizer::new(name, Arc::clone(&store));
        (store, sync)
    }

    fn drain(rx: &mut UnboundedReceiver<SyncMessage>) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_burst_first_then_updates() {
        let (store, sync) = replica("hub.example");
        store.apply(&NickUpdate::claim("alice", "acctA", 10, 10));

        let mut rx = sync.peer_joined("leaf.example");
        sync.submit(&NickUpdate::claim("bob", "acctB", 20, 20));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            SyncMessage::Burst(vec![NickUpdate::claim("alice", "acctA", 10, 10)])
        );
        assert_eq!(
            messages[1],
            SyncMessage::Update(NickUpdate::claim("bob", "acctB", 20, 20))
        );
    }

    #[test]
    fn test_local_change_reaches_every_peer_once() {
        let (store, sync) = replica("a");
        let mut rx_b = sync.peer_joined("b");
        let mut rx_c = sync.peer_joined("c");
        drain(&mut rx_b);
        drain(&mut rx_c);

        let update = NickUpdate::claim("alice", "acctA", 10, 10);
        assert!(sync.submit(&update));
        assert!(!sync.submit(&update));

        assert_eq!(drain(&mut rx_b), vec![SyncMessage::Update(update.clone())]);
        assert_eq!(drain(&mut rx_c), vec![SyncMessage::Update(update)]);
        assert_eq!(sync.stats().updates_sent, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_received_updates_are_not_relayed() {
        let (store, sync) = replica("a");
        let mut rx_b = sync.peer_joined("b");
        let mut rx_c = sync.peer_joined("c");
        drain(&mut rx_b);
        drain(&mut rx_c);

        let applied = sync.receive(
            "b",
            SyncMessage::Update(NickUpdate::claim("alice", "acctA", 10, 10)),
        );
        assert_eq!(applied, 1);
        assert_eq!(store.lookup("alice").unwrap().account, "acctA");
        assert!(drain(&mut rx_b).is_empty());
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_receive_from_self_ignored() {
        let (store, sync) = replica("a");
        let applied = sync.receive(
            "a",
            SyncMessage::Update(NickUpdate::claim("alice", "acctA", 10, 10)),
        );
        assert_eq!(applied, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_closed_queue_drops_peer() {
        let (_store, sync) = replica("a");
        let rx = sync.peer_joined("b");
        drop(rx);
        sync.submit(&NickUpdate::claim("alice", "acctA", 10, 10));
        assert!(sync.connected_peers().is_empty());
    }

    #[test]
    fn test_relink_replaces_queue() {
        let (_store, sync) = replica("a");
        let mut old = sync.peer_joined("b");
        let _new = sync.peer_joined("b");
        assert_eq!(sync.connected_peers(), vec!["b".to_string()]);
        drain(&mut old);
        assert!(old.try_recv().is_err());
        assert_eq!(sync.stats().bursts_sent, 2);
    }

    #[test]
    fn test_reconciliation_convergence_disjoint() {
        let (store_a, sync_a) = replica("a");
        let (store_b, sync_b) = replica("b");
        store_a.apply(&NickUpdate::claim("alice", "acct1", 10, 10));
        store_a.apply(&NickUpdate::claim("amy", "acct2", 11, 11));
        store_b.apply(&NickUpdate::claim("bob", "acct3", 12, 12));

        // a bursts to b, then b bursts back
        let mut a_to_b = sync_a.peer_joined("b");
        for message in drain(&mut a_to_b) {
            sync_b.receive("a", message);
        }
        let mut b_to_a = sync_b.peer_joined("a");
        for message in drain(&mut b_to_a) {
            sync_a.receive("b", message);
        }

        assert_eq!(store_a.snapshot(), store_b.snapshot());
        assert_eq!(store_a.len(), 3);
        store_a.check_consistency().unwrap();
        store_b.check_consistency().unwrap();
    }

    #[test]
    fn test_concurrent_tie_converges_to_smaller_account() {
        let (store_a, sync_a) = replica("a");
        let (store_b, sync_b) = replica("b");

        // Partitioned: each side claims alice at the same time
        store_a.apply(&NickUpdate::claim("alice", "acctY", 100, 100));
        store_b.apply(&NickUpdate::claim("alice", "acctX", 100, 100));

        let mut a_to_b = sync_a.peer_joined("b");
        let mut b_to_a = sync_b.peer_joined("a");
        for message in drain(&mut a_to_b) {
            sync_b.receive("a", message);
        }
        for message in drain(&mut b_to_a) {
            sync_a.receive("b", message);
        }

        assert_eq!(store_a.lookup("alice").unwrap().account, "acctX");
        assert_eq!(store_b.lookup("alice").unwrap().account, "acctX");
        assert_eq!(store_a.digest(), store_b.digest());
    }

    #[test]
    fn test_repeated_burst_is_idempotent() {
        let (store_a, sync_a) = replica("a");
        let (store_b, sync_b) = replica("b");
        store_a.apply(&NickUpdate::claim("alice", "acct1", 10, 10));

        let mut a_to_b = sync_a.peer_joined("b");
        let first: usize = drain(&mut a_to_b)
            .into_iter()
            .map(|m| sync_b.receive("a", m))
            .sum();
        assert!(sync_a.reconcile("b"));
        let second: usize = drain(&mut a_to_b)
            .into_iter()
            .map(|m| sync_b.receive("a", m))
            .sum();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(
            store_b.snapshot(),
            vec![NickRecord::new("alice", "acct1", 10, 10)]
        );
        assert!(!sync_a.reconcile("nobody"));
    }

    #[test]
    fn test_racing_claim_and_release_reach_peer_in_order() {
        for _ in 0..500 {
            let (store_a, sync_a) = replica("a");
            let (store_b, sync_b) = replica("b");
            let mut a_to_b = sync_a.peer_joined("b");
            let barrier = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    sync_a.submit(&NickUpdate::claim("x", "acct", 10, 10));
                });
                scope.spawn(|| {
                    barrier.wait();
                    sync_a.submit(&NickUpdate::unregister("x", 11));
                });
            });

            for message in drain(&mut a_to_b) {
                sync_b.receive("a", message);
            }
            assert_eq!(store_a.digest(), store_b.digest());
        }
    }

    #[test]
    fn test_join_during_local_churn_keeps_burst_first() {
        let (store_a, sync_a) = replica("a");
        let (store_b, sync_b) = replica("b");
        let mut a_to_b = None;

        std::thread::scope(|scope| {
            for worker in 0..4i64 {
                let sync_a = &sync_a;
                scope.spawn(move || {
                    for i in 0..200i64 {
                        let name = format!("nick{}", i % 16);
                        let at = i * 4 + worker;
                        if i % 5 == 0 {
                            sync_a.submit(&NickUpdate::unregister(name, at));
                        } else {
                            let account = format!("acct{}", worker);
                            sync_a.submit(&NickUpdate::claim(name, account, at, at));
                        }
                    }
                });
            }
            a_to_b = Some(sync_a.peer_joined("b"));
        });

        let mut a_to_b = a_to_b.unwrap();
        let messages = drain(&mut a_to_b);
        assert!(matches!(messages.first(), Some(SyncMessage::Burst(_))));
        for message in messages {
            sync_b.receive("a", message);
        }
        assert_eq!(store_a.digest(), store_b.digest());
        store_b.check_consistency().unwrap();
    }
}
