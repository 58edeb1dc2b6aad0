//! Room membership.

use parley_crypto::RoomKey;

use crate::peer::{PeerId, PeerRecord};

/// Outcome of [`Room::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New member appended
    Added,
    /// Existing member's identity fields overwritten
    Refreshed,
    /// Room is full; peer not added
    Refused,
}

/// A chat room: id, shared key and ordered member list.
///
/// Members are kept in admission order and unique by id. The key is fixed
/// for the room's lifetime.
#[derive(Debug)]
pub struct Room {
    id: String,
    key: RoomKey,
    members: Vec<PeerRecord>,
    max_members: usize,
}

impl Room {
    /// Empty room.
    #[must_use]
    pub fn new(id: impl Into<String>, key: RoomKey, max_members: usize) -> Self {
        Self {
            id: id.into(),
            key,
            members: Vec::new(),
            max_members,
        }
    }

    /// Room id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared key
    #[must_use]
    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    /// Insert or refresh a member.
    ///
    /// Refreshing an existing id is always allowed; a new id is refused once
    /// the room holds `max_members`.
    pub fn admit(&mut self, peer: PeerRecord) -> Admission {
        if let Some(existing) = self.members.iter_mut().find(|m| m.id == peer.id) {
            *existing = peer;
            return Admission::Refreshed;
        }
        if self.members.len() >= self.max_members {
            return Admission::Refused;
        }
        self.members.push(peer);
        Admission::Added
    }

    /// Remove a member, returning its record.
    pub fn remove(&mut self, id: &PeerId) -> Option<PeerRecord> {
        let index = self.members.iter().position(|m| &m.id == id)?;
        Some(self.members.remove(index))
    }

    /// Members in admission order.
    #[must_use]
    pub fn members(&self) -> &[PeerRecord] {
        &self.members
    }

    /// Member count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(n: u16) -> PeerRecord {
        let addr: SocketAddr = format!("10.0.0.1:{}", 9000 + n).parse().unwrap();
        PeerRecord::new(addr, format!("peer{n}"))
    }

    fn room(max: usize) -> Room {
        Room::new("r1", RoomKey::new([0u8; 16]), max)
    }

    #[test]
    fn test_admit_appends_in_order() {
        let mut room = room(10);
        assert_eq!(room.admit(peer(1)), Admission::Added);
        assert_eq!(room.admit(peer(2)), Admission::Added);
        assert_eq!(room.members()[0].display_name, "peer1");
        assert_eq!(room.members()[1].display_name, "peer2");
    }

    #[test]
    fn test_admit_refresh_never_duplicates() {
        let mut room = room(10);
        room.admit(peer(1));
        let mut renamed = peer(1);
        renamed.display_name = "renamed".into();
        assert_eq!(room.admit(renamed), Admission::Refreshed);
        assert_eq!(room.len(), 1);
        assert_eq!(room.members()[0].display_name, "renamed");
    }

    #[test]
    fn test_admission_cap() {
        let max = 4;
        let mut room = room(max);
        for n in 0..=max as u16 {
            room.admit(peer(n));
        }
        assert_eq!(room.len(), max);
        let refused = peer(max as u16).id;
        assert!(room.members().iter().all(|m| m.id != refused));

        // Retrying does not sneak the peer in
        assert_eq!(room.admit(peer(max as u16)), Admission::Refused);
        assert_eq!(room.len(), max);

        // Existing members can still refresh at the cap
        assert_eq!(room.admit(peer(0)), Admission::Refreshed);

        // Removing one frees a slot
        room.remove(&peer(0).id);
        assert_eq!(room.admit(peer(max as u16)), Admission::Added);
    }

    #[test]
    fn test_remove_unknown() {
        let mut room = room(4);
        assert!(room.remove(&PeerId::from("nobody")).is_none());
    }
}
