//! Routing decisions.
//!
//! The functions here decide *where* a frame goes; the session performs the
//! sends. Keeping them free of I/O makes the loop-avoidance rules testable
//! on their own.

use std::net::SocketAddr;

use crate::message::Message;
use crate::peer::{PeerId, PeerRecord, Role};
use crate::topology::TopologyManager;

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Relay mode inactive (or no relay known): every member except self
    Direct(Vec<SocketAddr>),
    /// Local peer is a relay: the relay pass plus live regular peers
    Relay(RelayPlan),
    /// Local peer is regular: hand the frame to one relay
    ViaRelay(SocketAddr),
}

impl Route {
    /// Every address the frame will be sent to.
    #[must_use]
    pub fn targets(&self) -> Vec<SocketAddr> {
        match self {
            Route::Direct(targets) => targets.clone(),
            Route::Relay(plan) => plan.addresses(),
            Route::ViaRelay(addr) => vec![*addr],
        }
    }
}

/// Targets a relay forwards a frame to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayPlan {
    /// Live regular peers other than the sender and self
    pub regular_pass: Vec<PeerRecord>,
    /// Other live relays other than the sender and self
    pub relay_pass: Vec<PeerRecord>,
}

impl RelayPlan {
    /// Addresses of both passes, regular pass first.
    #[must_use]
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.regular_pass
            .iter()
            .chain(&self.relay_pass)
            .map(|p| p.address)
            .collect()
    }

    /// True if there is nobody to forward to.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regular_pass.is_empty() && self.relay_pass.is_empty()
    }
}

/// Choose the route for a message originated locally.
///
/// `members` is the room's member list, which may include the local peer.
#[must_use]
pub fn plan_outbound(topology: &TopologyManager, members: &[PeerRecord]) -> Route {
    let local = &topology.local().id;
    let direct = || {
        Route::Direct(
            members
                .iter()
                .filter(|m| &m.id != local)
                .map(|m| m.address)
                .collect(),
        )
    };

    if !topology.relay_mode_active(members.len()) {
        return direct();
    }
    if topology.is_local_relay() {
        return Route::Relay(plan_relay(topology, None));
    }
    match topology.best_relay() {
        Some(relay) => Route::ViaRelay(relay.address),
        None => {
            tracing::debug!("relay mode active but no relay known, sending direct");
            direct()
        }
    }
}

/// Targets for a frame the local relay must pass on.
///
/// Never includes the local peer or `sender`. The regular pass never
/// contains a peer whose current role is relay; relays are reached only
/// through the relay pass.
#[must_use]
pub fn plan_relay(topology: &TopologyManager, sender: Option<&PeerId>) -> RelayPlan {
    let local = &topology.local().id;
    let keep = |p: &PeerRecord| &p.id != local && Some(&p.id) != sender;

    let regular_pass = topology
        .live_regulars()
        .into_iter()
        .filter(|p| keep(p) && topology.role_of(&p.id) != Some(Role::Relay))
        .collect();
    let relay_pass = topology.live_relays().into_iter().filter(|p| keep(p)).collect();

    RelayPlan {
        regular_pass,
        relay_pass,
    }
}

/// Work out which member handed us a frame.
///
/// The TCP source port of an inbound connection is ephemeral, so the
/// address rarely matches a member exactly. In order of preference: an
/// exact address match, a member on the same IP whose display name is the
/// message's sender, the only member on that IP.
#[must_use]
pub fn resolve_sender(
    remote: SocketAddr,
    message: &Message,
    members: &[PeerRecord],
) -> Option<PeerId> {
    if let Some(m) = members.iter().find(|m| m.address == remote) {
        return Some(m.id.clone());
    }

    let same_ip: Vec<&PeerRecord> = members
        .iter()
        .filter(|m| m.address.ip() == remote.ip())
        .collect();
    if let Some(m) = same_ip.iter().find(|m| m.display_name == message.sender) {
        return Some(m.id.clone());
    }
    match same_ip.as_slice() {
        [only] => Some(only.id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn rec(host: u8, name: &str) -> PeerRecord {
        PeerRecord::new(format!("10.0.0.{host}:8080").parse().unwrap(), name)
    }

    fn local() -> PeerRecord {
        rec(100, "me")
    }

    fn message_from(sender: &str) -> Message {
        Message {
            room_id: "r1".into(),
            sender: sender.into(),
            timestamp: "t".into(),
            content: "c".into(),
            msg_id: None,
        }
    }

    /// Members {self(Relay), A, B(Regular), C(Relay)}.
    fn scenario() -> (TopologyManager, PeerRecord, PeerRecord, PeerRecord) {
        let (a, b, c) = (rec(1, "A"), rec(2, "B"), rec(3, "C"));
        let topo = TopologyManager::new(local(), &RelayConfig::default());
        topo.admit(a.clone());
        topo.admit(b.clone());
        topo.admit(c.clone());
        topo.promote(&c.id);
        topo.promote_local();
        (topo, a, b, c)
    }

    #[test]
    fn test_loop_avoidance_scenario() {
        let (topo, a, b, c) = scenario();
        let plan = plan_relay(&topo, Some(&a.id));

        let regular: Vec<_> = plan.regular_pass.iter().map(|p| p.id.clone()).collect();
        let relays: Vec<_> = plan.relay_pass.iter().map(|p| p.id.clone()).collect();
        assert_eq!(regular, vec![b.id]);
        assert_eq!(relays, vec![c.id]);
        assert!(!plan.addresses().contains(&a.address));
        assert!(!plan.addresses().contains(&local().address));
    }

    #[test]
    fn test_relay_sender_excluded_from_relay_pass() {
        let (topo, a, b, c) = scenario();
        let plan = plan_relay(&topo, Some(&c.id));
        let regular: Vec<_> = plan.regular_pass.iter().map(|p| p.id.clone()).collect();
        assert_eq!(regular, vec![a.id, b.id]);
        assert!(plan.relay_pass.is_empty());
    }

    #[test]
    fn test_outbound_direct_below_threshold() {
        let (topo, a, b, c) = scenario();
        let members = vec![local(), a.clone(), b.clone(), c.clone()];
        assert_eq!(
            plan_outbound(&topo, &members),
            Route::Direct(vec![a.address, b.address, c.address])
        );
    }

    #[test]
    fn test_outbound_as_relay_above_threshold() {
        let topo = TopologyManager::new(local(), &RelayConfig::default());
        let mut members = vec![local()];
        for n in 1..=5 {
            let p = rec(n, &format!("p{n}"));
            topo.admit(p.clone());
            members.push(p);
        }
        topo.promote(&rec(2, "p2").id);
        topo.promote_local();

        match plan_outbound(&topo, &members) {
            Route::Relay(plan) => {
                assert_eq!(plan.relay_pass.len(), 1);
                assert_eq!(plan.regular_pass.len(), 4);
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_outbound_via_best_relay() {
        let topo = TopologyManager::new(local(), &RelayConfig::default());
        let mut members = vec![local()];
        for n in 1..=6 {
            let p = rec(n, &format!("p{n}"));
            topo.admit(p.clone());
            members.push(p);
        }
        topo.promote(&rec(4, "p4").id);
        topo.promote(&rec(2, "p2").id);

        // first live relay in table order
        assert_eq!(
            plan_outbound(&topo, &members),
            Route::ViaRelay(rec(2, "p2").address)
        );
    }

    #[test]
    fn test_outbound_degrades_without_relay() {
        let topo = TopologyManager::new(local(), &RelayConfig::default());
        let mut members = vec![local()];
        for n in 1..=6 {
            let p = rec(n, &format!("p{n}"));
            topo.admit(p.clone());
            members.push(p);
        }
        match plan_outbound(&topo, &members) {
            Route::Direct(targets) => assert_eq!(targets.len(), 6),
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_resolve_sender_exact_address() {
        let members = vec![rec(1, "A"), rec(2, "B")];
        let got = resolve_sender(rec(2, "B").address, &message_from("zzz"), &members);
        assert_eq!(got, Some(rec(2, "B").id));
    }

    #[test]
    fn test_resolve_sender_by_ip_and_name() {
        let a = PeerRecord::new("127.0.0.1:9001".parse().unwrap(), "A");
        let b = PeerRecord::new("127.0.0.1:9002".parse().unwrap(), "B");
        let members = vec![a, b.clone()];
        let got = resolve_sender("127.0.0.1:53211".parse().unwrap(), &message_from("B"), &members);
        assert_eq!(got, Some(b.id));
    }

    #[test]
    fn test_resolve_sender_single_member_on_ip() {
        let members = vec![rec(1, "A"), rec(2, "B")];
        let got = resolve_sender("10.0.0.1:40000".parse().unwrap(), &message_from("X"), &members);
        assert_eq!(got, Some(rec(1, "A").id));
    }

    #[test]
    fn test_resolve_sender_ambiguous() {
        let a = PeerRecord::new("127.0.0.1:9001".parse().unwrap(), "A");
        let b = PeerRecord::new("127.0.0.1:9002".parse().unwrap(), "B");
        let got = resolve_sender("127.0.0.1:5000".parse().unwrap(), &message_from("X"), &[a, b]);
        assert_eq!(got, None);
    }
}
