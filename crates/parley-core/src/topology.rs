//! Relay topology
//!
//! The topology manager keeps one [`PeerEntry`] per known remote peer: the
//! peer's identity plus its [`Role`] and the instant it was last heard from.
//! A peer is *live* while that instant is younger than the liveness timeout;
//! liveness is evaluated on every read and nothing is swept in the
//! background.
//!
//! Roles change only under the manager's write lock. The local peer is not
//! stored in the table; its relay flag lives beside it.
//!
//! # Lock order
//!
//! Callers that also hold the room membership lock must take it *before*
//! calling into the manager.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::RelayConfig;
use crate::fanout::FanOut;
use crate::peer::{PeerId, PeerRecord, Role};
use crate::transport::Dialer;

/// Only this many leading table entries are considered for election.
pub const MAX_ELECTION_CANDIDATES: usize = 5;

/// A known remote peer with its role and liveness.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Identity
    pub peer: PeerRecord,
    /// Current role
    pub role: Role,
    /// Last time the peer was admitted or refreshed
    pub last_active: Instant,
}

impl PeerEntry {
    fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_active) < timeout
    }

    fn is_eligible(&self, local: &PeerId) -> bool {
        !self.peer.supernode_opt_out && &self.peer.id != local
    }
}

/// Who was promoted by a failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    /// A remote peer became relay
    Peer(PeerId),
    /// The local peer promoted itself
    Local,
}

#[derive(Debug, Default)]
struct TopologyState {
    entries: Vec<PeerEntry>,
    local_is_relay: bool,
}

/// Relay election, failover and liveness bookkeeping.
#[derive(Debug)]
pub struct TopologyManager {
    local: PeerRecord,
    relay_mode: AtomicBool,
    threshold: usize,
    liveness_timeout: Duration,
    state: RwLock<TopologyState>,
}

impl TopologyManager {
    /// Manager for the node identified by `local`.
    #[must_use]
    pub fn new(local: PeerRecord, config: &RelayConfig) -> Self {
        Self {
            local,
            relay_mode: AtomicBool::new(config.enabled),
            threshold: config.threshold,
            liveness_timeout: config.liveness_timeout,
            state: RwLock::new(TopologyState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TopologyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TopologyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The local peer's record.
    #[must_use]
    pub fn local(&self) -> &PeerRecord {
        &self.local
    }

    /// Insert or refresh a peer.
    ///
    /// A refresh overwrites identity fields and liveness but keeps the role,
    /// except that a relay which now opts out is demoted. Returns true if
    /// the peer was new. The local peer is never inserted.
    pub fn admit(&self, peer: PeerRecord) -> bool {
        if peer.id == self.local.id {
            return false;
        }
        let now = Instant::now();
        let mut state = self.write();

        if let Some(entry) = state.entries.iter_mut().find(|e| e.peer.id == peer.id) {
            if peer.supernode_opt_out && entry.role == Role::Relay {
                tracing::info!(peer = %peer.id, "relay opted out, demoting");
                entry.role = Role::Regular;
            }
            entry.peer = peer;
            entry.last_active = now;
            return false;
        }

        tracing::debug!(peer = %peer.id, "peer added to topology");
        state.entries.push(PeerEntry {
            peer,
            role: Role::Regular,
            last_active: now,
        });
        true
    }

    /// Pick a relay among the first live, eligible peers.
    ///
    /// This is a weak tie-break seeded from wall-clock seconds. Peers that
    /// run it in the same second over the same table tend to agree, nothing
    /// more. Not suitable as a security decision.
    pub fn elect_approximate(&self) -> Option<PeerId> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.elect_approximate_with(&mut StdRng::seed_from_u64(seed))
    }

    /// [`TopologyManager::elect_approximate`] with an explicit randomness
    /// source.
    pub fn elect_approximate_with<R: RngCore>(&self, rng: &mut R) -> Option<PeerId> {
        let now = Instant::now();
        let mut state = self.write();

        let candidates: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_eligible(&self.local.id) && e.is_live(now, self.liveness_timeout))
            .map(|(i, _)| i)
            .take(MAX_ELECTION_CANDIDATES)
            .collect();
        if candidates.is_empty() {
            tracing::debug!("no relay candidates");
            return None;
        }

        let chosen = candidates[rng.gen_range(0..candidates.len())];
        let entry = &mut state.entries[chosen];
        entry.role = Role::Relay;
        tracing::info!(peer = %entry.peer.id, "elected relay");
        Some(entry.peer.id.clone())
    }

    /// True iff relay mode is enabled and the room has more than the
    /// threshold number of members.
    #[must_use]
    pub fn relay_mode_active(&self, member_count: usize) -> bool {
        self.relay_mode.load(Ordering::Acquire) && member_count > self.threshold
    }

    /// Enable or disable relay mode.
    pub fn set_relay_mode(&self, enabled: bool) {
        self.relay_mode.store(enabled, Ordering::Release);
        tracing::info!(enabled, "relay mode switched");
    }

    /// Current relay mode switch.
    #[must_use]
    pub fn relay_mode(&self) -> bool {
        self.relay_mode.load(Ordering::Acquire)
    }

    /// Remove a peer; fail over if it was the last live relay.
    ///
    /// Returns the removed entry and any promotion that followed.
    pub fn handle_leave(&self, id: &PeerId) -> (Option<PeerEntry>, Option<Promotion>) {
        let now = Instant::now();
        let mut state = self.write();

        let Some(index) = state.entries.iter().position(|e| &e.peer.id == id) else {
            return (None, None);
        };
        let removed = state.entries.remove(index);
        tracing::debug!(peer = %id, role = %removed.role, "peer left");

        let mut promotion = None;
        if removed.role == Role::Relay && removed.is_live(now, self.liveness_timeout) {
            let remaining = state
                .entries
                .iter()
                .filter(|e| e.role == Role::Relay && e.is_live(now, self.liveness_timeout))
                .count();
            // the leaving relay was the only live one
            if remaining == 0 {
                promotion = self.failover_locked(&mut state, now);
            }
        }
        (Some(removed), promotion)
    }

    /// Promote the first live, eligible regular peer, or the local peer if
    /// there is none.
    pub fn failover(&self) -> Option<Promotion> {
        let now = Instant::now();
        let mut state = self.write();
        self.failover_locked(&mut state, now)
    }

    fn failover_locked(&self, state: &mut TopologyState, now: Instant) -> Option<Promotion> {
        let candidate = state.entries.iter_mut().find(|e| {
            e.role == Role::Regular
                && e.is_eligible(&self.local.id)
                && e.is_live(now, self.liveness_timeout)
        });
        if let Some(entry) = candidate {
            entry.role = Role::Relay;
            tracing::info!(peer = %entry.peer.id, "failover promoted relay");
            return Some(Promotion::Peer(entry.peer.id.clone()));
        }

        if !self.local.supernode_opt_out && !state.local_is_relay {
            state.local_is_relay = true;
            tracing::info!("failover promoted local peer to relay");
            return Some(Promotion::Local);
        }

        tracing::warn!("failover found no eligible relay");
        None
    }

    /// Mark a known peer as relay (e.g. it announced itself as one).
    ///
    /// Opted-out peers are never promoted. Returns true if the role changed.
    pub fn promote(&self, id: &PeerId) -> bool {
        let mut state = self.write();
        match state.entries.iter_mut().find(|e| &e.peer.id == id) {
            Some(entry) if entry.is_eligible(&self.local.id) && entry.role != Role::Relay => {
                entry.role = Role::Relay;
                tracing::debug!(peer = %id, "peer marked relay");
                true
            }
            _ => false,
        }
    }

    /// Make the local peer a relay unless it opted out.
    pub fn promote_local(&self) -> bool {
        if self.local.supernode_opt_out {
            return false;
        }
        let mut state = self.write();
        let changed = !state.local_is_relay;
        state.local_is_relay = true;
        changed
    }

    /// Is the local peer currently a relay?
    #[must_use]
    pub fn is_local_relay(&self) -> bool {
        self.read().local_is_relay
    }

    /// Role of a peer in the table (the local peer is not in the table).
    #[must_use]
    pub fn role_of(&self, id: &PeerId) -> Option<Role> {
        self.read()
            .entries
            .iter()
            .find(|e| &e.peer.id == id)
            .map(|e| e.role)
    }

    /// Live relays in table order.
    #[must_use]
    pub fn live_relays(&self) -> Vec<PeerRecord> {
        self.live_with_role(Role::Relay)
    }

    /// Live regular peers in table order.
    #[must_use]
    pub fn live_regulars(&self) -> Vec<PeerRecord> {
        self.live_with_role(Role::Regular)
    }

    fn live_with_role(&self, role: Role) -> Vec<PeerRecord> {
        let now = Instant::now();
        self.read()
            .entries
            .iter()
            .filter(|e| e.role == role && e.is_live(now, self.liveness_timeout))
            .map(|e| e.peer.clone())
            .collect()
    }

    /// First live relay; there is no load metric.
    #[must_use]
    pub fn best_relay(&self) -> Option<PeerRecord> {
        self.live_relays().into_iter().next()
    }

    /// Snapshot of the whole table.
    #[must_use]
    pub fn entries(&self) -> Vec<PeerEntry> {
        self.read().entries.clone()
    }

    /// Number of peers in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// True if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Send `frame` to every other live relay, skipping `exclude`.
    ///
    /// Best effort: each send runs as its own task and failures are only
    /// logged and reported through the returned [`FanOut`].
    pub fn forward(&self, frame: Arc<[u8]>, dialer: &Dialer, exclude: Option<&PeerId>) -> FanOut {
        let targets = self
            .live_relays()
            .into_iter()
            .filter(|p| Some(&p.id) != exclude)
            .map(|p| p.address)
            .collect();
        dialer.fan_out(frame, targets)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: &PeerId, by: Duration) {
        let mut state = self.write();
        if let Some(entry) = state.entries.iter_mut().find(|e| &e.peer.id == id) {
            if let Some(earlier) = entry.last_active.checked_sub(by) {
                entry.last_active = earlier;
            }
        }
    }
}
