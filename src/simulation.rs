//! In-process partition simulation
//!
//! Runs a handful of replicas over in-memory links, splits them into two
//! halves, lets both halves accept conflicting claims, heals the split, and
//! checks that every replica ends with the same registry.

use crate::config::RegistrationMode;
use crate::policy::RegistrationPolicy;
use crate::registry::Timestamp;
use crate::service::RegistrationService;
use crate::sync::SyncMessage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

const BASE_TIME: Timestamp = 1_000_000;

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub replicas: usize,
    pub names: usize,
    pub accounts: usize,
    pub rounds: usize,
    pub seed: u64,
    /// Expiry window used by the final sweep, in seconds
    pub expiry_window_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            replicas: 4,
            names: 16,
            accounts: 4,
            rounds: 200,
            seed: 1,
            expiry_window_secs: 100,
        }
    }
}

/// What happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Whether the two halves disagreed at the end of the partition
    pub diverged_during_partition: bool,
    /// Whether all replicas held identical registries after healing
    pub converged: bool,
    /// Whether they still agreed after each ran its own expiry sweep
    pub converged_after_sweep: bool,
    /// Records per replica after healing
    pub records: usize,
    /// Records purged per replica by the final sweep
    pub purged: Vec<usize>,
    /// Messages delivered over all links
    pub messages_delivered: usize,
    /// Hex digest of each replica's registry after the sweep
    pub digests: Vec<String>,
}

struct Link {
    from: usize,
    to: usize,
    rx: UnboundedReceiver<SyncMessage>,
}

struct Cluster {
    nodes: Vec<RegistrationService>,
    links: HashMap<(usize, usize), Link>,
    delivered: usize,
}

impl Cluster {
    fn new(count: usize, expiry_window: Duration) -> Self {
        let policy = RegistrationPolicy {
            mode: RegistrationMode::Services,
            max_per_account: usize::MAX,
            nick_max_len: 30,
        };
        let nodes = (0..count)
            .map(|i| {
                RegistrationService::with_parts(node_name(i), policy.clone(), expiry_window)
            })
            .collect();
        Self {
            nodes,
            links: HashMap::new(),
            delivered: 0,
        }
    }

    fn connect(&mut self, a: usize, b: usize) {
        for (from, to) in [(a, b), (b, a)] {
            let rx = self.nodes[from].peer_joined(&node_name(to));
            self.links.insert((from, to), Link { from, to, rx });
        }
    }

    fn disconnect(&mut self, a: usize, b: usize) {
        for (from, to) in [(a, b), (b, a)] {
            self.nodes[from].peer_left(&node_name(to));
            self.links.remove(&(from, to));
        }
    }

    /// Deliver queued messages until every link is empty
    fn pump(&mut self) {
        loop {
            let mut moved = 0;
            for link in self.links.values_mut() {
                while let Ok(message) = link.rx.try_recv() {
                    self.nodes[link.to].receive(&node_name(link.from), message);
                    moved += 1;
                }
            }
            if moved == 0 {
                break;
            }
            self.delivered += moved;
        }
    }

    /// Every node re-bursts its full state to every peer it is linked to
    fn reconcile_all(&mut self) {
        for &(from, to) in self.links.keys() {
            self.nodes[from].synchronizer().reconcile(&node_name(to));
        }
        self.pump();
    }

    fn digests(&self, members: impl Iterator<Item = usize>) -> Vec<[u8; 32]> {
        members.map(|i| self.nodes[i].store().digest()).collect()
    }
}

fn node_name(index: usize) -> String {
    format!("node{}.sim", index)
}

fn all_equal(digests: &[[u8; 32]]) -> bool {
    digests.windows(2).all(|pair| pair[0] == pair[1])
}

/// Run the simulation
pub fn run(config: &SimulationConfig) -> SimulationReport {
    let replicas = config.replicas.max(2);
    let names = config.names.max(1);
    let accounts = config.accounts.max(1);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut cluster = Cluster::new(replicas, Duration::from_secs(config.expiry_window_secs));

    for a in 0..replicas {
        for b in (a + 1)..replicas {
            cluster.connect(a, b);
        }
    }
    cluster.pump();

    let split = replicas / 2;
    for a in 0..split {
        for b in split..replicas {
            cluster.disconnect(a, b);
        }
    }
    info!("Partitioned {} replicas at {}", replicas, split);

    // Claims land on both sides of the split. Time only advances every few
    // rounds so equal claim times compete on both sides.
    for round in 0..config.rounds {
        let node = rng.gen_range(0..replicas);
        let name = format!("nick{}", rng.gen_range(0..names));
        let at = BASE_TIME + (round / 4) as Timestamp;
        if rng.gen_bool(0.1) {
            cluster.nodes[node].register(&name, None, at, at);
        } else {
            let account = format!("acct{}", rng.gen_range(0..accounts));
            cluster.nodes[node].register(&name, Some(&account), at, at);
        }
        if rng.gen_bool(0.3) {
            cluster.pump();
        }
    }
    cluster.pump();

    let left = cluster.digests(0..split);
    let right = cluster.digests(split..replicas);
    let diverged_during_partition = left.first() != right.first();

    for a in 0..split {
        for b in split..replicas {
            cluster.connect(a, b);
        }
    }
    cluster.pump();
    info!("Healed partition after {} messages", cluster.delivered);

    // Releases delete rather than tombstone, so a replica that dropped a nick
    // can pick it back up from a peer that still held an older claim. One more
    // round after the dust settles gives every replica every live record.
    cluster.reconcile_all();

    let healed = cluster.digests(0..replicas);
    let converged = all_equal(&healed)
        && cluster
            .nodes
            .iter()
            .all(|node| node.store().check_consistency().is_ok());
    let records = cluster.nodes[0].store().len();

    let sweep_at = BASE_TIME
        + (config.rounds / 8) as Timestamp
        + config.expiry_window_secs as Timestamp;
    let purged: Vec<usize> = cluster
        .nodes
        .iter()
        .map(|node| node.sweeper().sweep_at(sweep_at))
        .collect();
    debug!("Sweep at {} purged {:?}", sweep_at, purged);

    let swept = cluster.digests(0..replicas);
    let converged_after_sweep = all_equal(&swept);

    SimulationReport {
        diverged_during_partition,
        converged,
        converged_after_sweep,
        records,
        purged,
        messages_delivered: cluster.delivered,
        digests: swept
            .iter()
            .map(|digest| blake3::Hash::from(*digest).to_hex().to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_simulation_converges() {
        let report = run(&SimulationConfig::default());
        assert!(report.converged);
        assert!(report.converged_after_sweep);
        assert_eq!(report.digests.len(), 4);
        assert!(report.messages_delivered > 0);
    }

    #[test]
    fn test_many_seeds_converge() {
        for seed in 0..20 {
            let config = SimulationConfig {
                replicas: 5,
                names: 6,
                accounts: 3,
                rounds: 120,
                seed,
                expiry_window_secs: 10,
            };
            let report = run(&config);
            assert!(report.converged, "seed {} did not converge", seed);
            assert!(report.converged_after_sweep, "seed {} diverged after sweep", seed);
        }
    }
}
