//! Test fixtures for multi-peer scenarios
//!
//! - [`TwoPeerFixture`]: two real sessions on loopback sharing a room
//! - [`FakePeer`]: a bare TCP listener standing in for a remote member, so
//!   tests can see exactly which frames a relay forwards where
//!
//! # Example
//!
//! ```no_run
//! use parley_integration_tests::fixtures::TwoPeerFixture;
//!
//! # async fn run() {
//! let mut fixture = TwoPeerFixture::new("r1").await.unwrap();
//! fixture.creator.send_message("hi").unwrap();
//! fixture.shutdown().await;
//! # }
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_core::{
    ChatConfig, ChatEvent, ChatSession, EventReceiver, FrameFormat, PeerRecord, Result,
    RoomKey, read_frame,
};

/// How long tests wait for something that should happen.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long tests wait to be confident something did not happen.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(300);

/// A session on loopback with no STUN and no broadcast.
pub fn loopback_session(nickname: &str) -> (ChatSession, EventReceiver) {
    loopback_session_with(ChatConfig::loopback(), nickname)
}

/// [`loopback_session`] with a custom configuration.
pub fn loopback_session_with(config: ChatConfig, nickname: &str) -> (ChatSession, EventReceiver) {
    ChatSession::new(Arc::new(config), nickname, IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for<F>(events: &mut EventReceiver, mut pred: F) -> Option<ChatEvent>
where
    F: FnMut(&ChatEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Collect every event that arrives within [`SILENCE_WINDOW`].
pub async fn drain(events: &mut EventReceiver) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(SILENCE_WINDOW, events.recv()).await {
        out.push(event);
    }
    out
}

/// Two sessions in the same room that know about each other.
pub struct TwoPeerFixture {
    /// Created the room
    pub creator: ChatSession,
    /// Creator's events
    pub creator_events: EventReceiver,
    /// Joined with the creator's key
    pub joiner: ChatSession,
    /// Joiner's events
    pub joiner_events: EventReceiver,
    /// Shared room key
    pub key: RoomKey,
}

impl TwoPeerFixture {
    /// Create `room_id` on one session, join it from another and admit each
    /// peer on the other side.
    ///
    /// # Errors
    ///
    /// Returns the first session error.
    pub async fn new(room_id: &str) -> Result<Self> {
        let (creator, mut creator_events) = loopback_session("X");
        let (joiner, mut joiner_events) = loopback_session("Y");

        let key = creator.create_room(room_id).await?;
        joiner.join_room(room_id, &key.to_base64()).await?;

        let (Some(x), Some(y)) = (creator.local_record(), joiner.local_record()) else {
            return Err(parley_core::ChatError::invalid_state("sessions not in a room"));
        };
        creator.admit_peer(y)?;
        joiner.admit_peer(x)?;

        // Skip the join and election notices
        drain(&mut creator_events).await;
        drain(&mut joiner_events).await;

        Ok(Self {
            creator,
            creator_events,
            joiner,
            joiner_events,
            key,
        })
    }

    /// Stop both sessions.
    pub async fn shutdown(self) {
        self.creator.shutdown().await;
        self.joiner.shutdown().await;
    }
}

/// A TCP endpoint that records every frame it receives.
pub struct FakePeer {
    /// Member record pointing at this listener
    pub record: PeerRecord,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl FakePeer {
    /// Bind on loopback.
    ///
    /// # Errors
    ///
    /// Returns an error if no port can be bound.
    pub async fn bind(display_name: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let (tx, frames) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(frame) = read_frame(&mut stream, FrameFormat::Raw, 1 << 16).await {
                        let _ = tx.send(frame);
                    }
                });
            }
        });

        Ok(Self {
            record: PeerRecord::new(addr, display_name),
            frames,
            task,
        })
    }

    /// Same record, opted out of relay election.
    #[must_use]
    pub fn opted_out(mut self) -> Self {
        self.record = self.record.clone().opted_out(true);
        self
    }

    /// Next frame, if one arrives within [`EVENT_TIMEOUT`].
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(EVENT_TIMEOUT, self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// True if no frame arrives within [`SILENCE_WINDOW`].
    pub async fn stays_silent(&mut self) -> bool {
        tokio::time::timeout(SILENCE_WINDOW, self.frames.recv())
            .await
            .is_err()
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
