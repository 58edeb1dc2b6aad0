//! Chat messages and their encrypted wire form.
//!
//! A frame on the wire is `IV || AES-128-CBC(JSON)` where the JSON object is
//!
//! ```json
//! {"room_id":"r1","sender":"BraveOwl7","timestamp":"2024-05-01 12:00:00","content":"hi"}
//! ```
//!
//! plus an optional `msg_id` used for duplicate suppression.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use parley_crypto::RoomKey;

use crate::error::Result;

/// Timestamp format used on the wire and in display lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default capacity of the duplicate-suppression cache.
pub const SEEN_CACHE_CAPACITY: usize = 1024;

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Room the message belongs to
    pub room_id: String,
    /// Sender's display name
    pub sender: String,
    /// Local wall-clock time at the sender
    pub timestamp: String,
    /// Message text
    pub content: String,
    /// Random id for duplicate suppression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
}

impl Message {
    /// New message stamped with the current local time and a random id.
    #[must_use]
    pub fn new(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            content: content.into(),
            msg_id: Some(hex::encode(rand::random::<[u8; 8]>())),
        }
    }

    /// Serialize and encrypt into a wire frame.
    ///
    /// # Errors
    ///
    /// Fails only if serialization or IV generation fails.
    pub fn seal(&self, key: &RoomKey) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        Ok(parley_crypto::encrypt(key, &json)?)
    }

    /// Decrypt and decode a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ChatError::ProtocolMalformed`] if the frame does not
    /// decrypt under `key` or does not hold a message.
    pub fn open(key: &RoomKey, frame: &[u8]) -> Result<Self> {
        let json = parley_crypto::decrypt(key, frame)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// `[ts] sender: content`
    #[must_use]
    pub fn display_line(&self) -> String {
        format!("[{}] {}: {}", self.timestamp, self.sender, self.content)
    }

    /// `[ts] Me: content`
    #[must_use]
    pub fn echo_line(&self) -> String {
        format!("[{}] Me: {}", self.timestamp, self.content)
    }

    /// Stable fingerprint for duplicate suppression.
    ///
    /// Uses `msg_id` when present so two identical texts sent in the same
    /// second stay distinct.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.room_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.sender.as_bytes());
        hasher.update(&[0]);
        match &self.msg_id {
            Some(id) => {
                hasher.update(b"id");
                hasher.update(id.as_bytes());
            }
            None => {
                hasher.update(self.timestamp.as_bytes());
                hasher.update(&[0]);
                hasher.update(self.content.as_bytes());
            }
        }
        *hasher.finalize().as_bytes()
    }
}

/// Bounded set of recently seen message fingerprints.
///
/// Oldest entries are evicted first once the capacity is reached.
#[derive(Debug)]
pub struct SeenMessages {
    order: VecDeque<[u8; 32]>,
    set: HashSet<[u8; 32]>,
    capacity: usize,
}

impl SeenMessages {
    /// Empty cache holding at most `capacity` fingerprints.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record a fingerprint. Returns false if it was already present.
    pub fn insert(&mut self, fingerprint: [u8; 32]) -> bool {
        if !self.set.insert(fingerprint) {
            return false;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }

    /// Number of fingerprints held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new(SEEN_CACHE_CAPACITY)
    }
}
