//! Chat session
//!
//! [`ChatSession`] is the façade the CLI drives: create or join one room,
//! send messages, list peers. Everything the session observes (incoming
//! messages, the local echo, peers joining and leaving) is delivered as a
//! [`ChatEvent`] on the channel returned by the constructor.
//!
//! # Lock order
//!
//! Membership lock first, then the topology manager. No lock is held across
//! an `.await`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, watch};

use parley_crypto::RoomKey;
use parley_discovery::nat::{EndpointResolver, local_ip_guess};
use parley_discovery::{Announcement, DiscoveryEvent, LanConfig, LanDiscovery};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::fanout::FanOut;
use crate::message::{Message, SeenMessages};
use crate::peer::{PeerId, PeerRecord, Role};
use crate::room::{Admission, Room};
use crate::router::{Route, plan_outbound, plan_relay, resolve_sender};
use crate::topology::{Promotion, TopologyManager};
use crate::transport::{Dialer, Listener};

/// Discovery events buffered between the LAN listener and the session.
const DISCOVERY_CHANNEL_CAPACITY: usize = 64;

/// Something the user may want to see.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A message from another peer
    Message(Message),
    /// Our own message, emitted once per send
    LocalEcho(Message),
    /// A new peer was admitted
    PeerJoined(PeerRecord),
    /// A peer was removed
    PeerLeft(PeerId),
    /// A peer (or the local node) took the relay role
    RelayPromoted(Promotion),
}

/// Receiving end of the session's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ChatEvent>;

/// A member as shown by `/list`.
#[derive(Debug, Clone)]
pub struct PeerView {
    /// Identity
    pub record: PeerRecord,
    /// Role as currently known locally
    pub role: Role,
    /// This is the local node
    pub is_local: bool,
}

/// Result of [`ChatSession::send_message`].
#[derive(Debug)]
pub struct Outbound {
    /// The message as sent
    pub message: Message,
    /// Routing decision taken
    pub route: Route,
    /// In-flight sends
    pub delivery: FanOut,
}

/// State for the one room a session participates in.
struct ActiveRoom {
    local: PeerRecord,
    membership: RwLock<Room>,
    topology: TopologyManager,
    dialer: Dialer,
    seen: Mutex<SeenMessages>,
    elected: AtomicBool,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ActiveRoom {
    fn members_read(&self) -> RwLockReadGuard<'_, Room> {
        self.membership.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn members_write(&self) -> RwLockWriteGuard<'_, Room> {
        self.membership.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn room_id(&self) -> String {
        self.members_read().id().to_string()
    }

    fn key(&self) -> RoomKey {
        self.members_read().key().clone()
    }

    fn first_sighting(&self, message: &Message) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message.fingerprint())
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn admit(&self, peer: PeerRecord) -> Admission {
        if peer.id == self.local.id {
            return Admission::Refreshed;
        }

        let mut room = self.members_write();
        let admission = room.admit(peer.clone());
        if admission == Admission::Refused {
            tracing::warn!(peer = %peer.address, max = room.len(), "room full, refusing peer");
            return admission;
        }

        self.topology.admit(peer.clone());

        let mut elected = None;
        if admission == Admission::Added
            && room.len() >= 2
            && self.topology.live_relays().is_empty()
            && !self.topology.is_local_relay()
            && !self.elected.swap(true, Ordering::AcqRel)
        {
            elected = self.topology.elect_approximate();
        }
        drop(room);

        if admission == Admission::Added {
            tracing::info!(peer = %peer.address, nickname = %peer.display_name, "peer joined");
            self.emit(ChatEvent::PeerJoined(peer));
        }
        if let Some(id) = elected {
            self.emit(ChatEvent::RelayPromoted(Promotion::Peer(id)));
        }
        admission
    }

    fn leave(&self, id: &PeerId) -> Option<PeerRecord> {
        let mut room = self.members_write();
        let removed = room.remove(id);
        let (_, promotion) = self.topology.handle_leave(id);
        drop(room);

        if removed.is_some() {
            tracing::info!(peer = %id, "peer left");
            self.emit(ChatEvent::PeerLeft(id.clone()));
        }
        if let Some(promotion) = promotion {
            self.emit(ChatEvent::RelayPromoted(promotion));
        }
        removed
    }

    fn handle_announcement(&self, announcement: Announcement, from: SocketAddr) {
        let id = PeerId::from_addr(announcement.address);
        if id == self.local.id {
            return;
        }
        if announcement.id != id.as_str() {
            tracing::debug!(peer = %from, claimed = %announcement.id, %id, "announced id ignored");
        }
        if announcement.leaving {
            self.leave(&id);
            return;
        }

        tracing::trace!(peer = %from, %id, "announcement");
        let is_relay = announcement.super_node;
        let record = PeerRecord::from(announcement);
        if self.admit(record) != Admission::Refused && is_relay && self.topology.promote(&id) {
            tracing::debug!(peer = %id, "learned relay from announcement");
        }
    }

    fn handle_frame(&self, frame: Vec<u8>, remote: SocketAddr) {
        let message = match Message::open(&self.key(), &frame) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(peer = %remote, error = %e, "dropping undecodable frame");
                return;
            }
        };
        if message.room_id != self.room_id() {
            tracing::trace!(peer = %remote, room = %message.room_id, "frame for another room");
            return;
        }
        if !self.first_sighting(&message) {
            tracing::trace!(peer = %remote, "duplicate message");
            return;
        }

        let members = self.members_read().members().to_vec();
        if self.topology.is_local_relay() && self.topology.relay_mode_active(members.len()) {
            let sender = resolve_sender(remote, &message, &members);
            self.relay(Arc::from(frame), sender.as_ref());
        }
        self.emit(ChatEvent::Message(message));
    }

    /// Forward to live regulars and other relays, never to `sender` or self.
    fn relay(&self, frame: Arc<[u8]>, sender: Option<&PeerId>) -> FanOut {
        let plan = plan_relay(&self.topology, sender);
        let regulars = plan.regular_pass.iter().map(|p| p.address).collect();
        let regular_sends = self.dialer.fan_out(Arc::clone(&frame), regulars);
        let relay_sends = self.topology.forward(frame, &self.dialer, sender);
        tracing::debug!(
            regulars = plan.regular_pass.len(),
            relays = plan.relay_pass.len(),
            "relaying frame"
        );
        regular_sends.merge(relay_sends)
    }

    fn send(&self, content: &str) -> Result<Outbound> {
        let (room_id, key) = {
            let room = self.members_read();
            (room.id().to_string(), room.key().clone())
        };
        let message = Message::new(&room_id, &self.local.display_name, content);
        let sealed = message.seal(&key)?;
        if sealed.len() > self.dialer.max_frame_size() {
            return Err(ChatError::ResourceExhausted(
                format!(
                    "message is {} bytes sealed, peers accept at most {}",
                    sealed.len(),
                    self.dialer.max_frame_size()
                )
                .into(),
            ));
        }
        let frame: Arc<[u8]> = Arc::from(sealed);
        self.first_sighting(&message);
        self.emit(ChatEvent::LocalEcho(message.clone()));

        let members = self.members_read().members().to_vec();
        let route = plan_outbound(&self.topology, &members);
        let delivery = match &route {
            Route::Relay(_) => self.relay(frame, None),
            Route::Direct(targets) => self.dialer.fan_out(frame, targets.clone()),
            Route::ViaRelay(relay) => self.dialer.fan_out(frame, vec![*relay]),
        };

        Ok(Outbound {
            message,
            route,
            delivery,
        })
    }

    fn peers(&self) -> Vec<PeerView> {
        let room = self.members_read();
        let local_role = if self.topology.is_local_relay() {
            Role::Relay
        } else {
            Role::Regular
        };
        room.members()
            .iter()
            .map(|m| {
                let is_local = m.id == self.local.id;
                let role = if is_local {
                    local_role
                } else {
                    self.topology.role_of(&m.id).unwrap_or_default()
                };
                PeerView {
                    record: m.clone(),
                    role,
                    is_local,
                }
            })
            .collect()
    }
}

struct SessionInner {
    config: Arc<ChatConfig>,
    nickname: String,
    advertise_ip: IpAddr,
    relay_mode: AtomicBool,
    running: AtomicBool,
    room: RwLock<Option<Arc<ActiveRoom>>>,
    lan: Mutex<Option<Arc<LanDiscovery>>>,
    events: mpsc::UnboundedSender<ChatEvent>,
    shutdown: watch::Sender<bool>,
}

/// A node's chat session.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    /// Create a session that advertises `advertise_ip`.
    ///
    /// No socket is opened until a room is created or joined.
    #[must_use]
    pub fn new(
        config: Arc<ChatConfig>,
        nickname: impl Into<String>,
        advertise_ip: IpAddr,
    ) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let inner = SessionInner {
            relay_mode: AtomicBool::new(config.relay.enabled),
            config,
            nickname: nickname.into(),
            advertise_ip,
            running: AtomicBool::new(false),
            room: RwLock::new(None),
            lan: Mutex::new(None),
            events,
            shutdown,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Validate the configuration, resolve the public address, then create
    /// the session.
    ///
    /// With `nat.resolve_public` the STUN servers are queried in order;
    /// otherwise (or when all fail) the local address guess is used.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConfigInvalid`] if the configuration is unusable.
    pub async fn start(
        config: Arc<ChatConfig>,
        nickname: impl Into<String>,
    ) -> Result<(Self, EventReceiver)> {
        config.validate()?;
        let ip = if config.nat.resolve_public {
            EndpointResolver::new(
                config.nat.stun_servers.clone(),
                config.nat.stun_timeout,
                config.tcp_port,
            )
            .resolve_public_endpoint()
            .await
            .ip()
        } else {
            local_ip_guess()
        };
        tracing::info!(%ip, "advertised address resolved");
        Ok(Self::new(config, nickname, ip))
    }

    /// Display name used for outgoing messages.
    #[must_use]
    pub fn nickname(&self) -> &str {
        &self.inner.nickname
    }

    /// The configuration snapshot.
    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    fn active(&self) -> Option<Arc<ActiveRoom>> {
        self.inner
            .room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_room(&self) -> Result<Arc<ActiveRoom>> {
        self.active()
            .ok_or(ChatError::invalid_state("not in a room"))
    }

    /// Id of the current room.
    #[must_use]
    pub fn room_id(&self) -> Option<String> {
        self.active().map(|r| r.room_id())
    }

    /// The local peer's record once in a room.
    #[must_use]
    pub fn local_record(&self) -> Option<PeerRecord> {
        self.active().map(|r| r.local.clone())
    }

    /// Is the session running (in a room and not shut down)?
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Create a room with a fresh key and enter it.
    ///
    /// Returns the key; share [`RoomKey::to_base64`] with the other peers.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidState`] if already in a room and
    /// [`ChatError::Io`] if the listener cannot be bound.
    pub async fn create_room(&self, room_id: &str) -> Result<RoomKey> {
        let key = RoomKey::generate()?;
        self.enter_room(room_id, key.clone()).await?;
        tracing::info!(room = room_id, "room created");
        Ok(key)
    }

    /// Join a room with its base64 key.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConfigInvalid`] if the key is not base64 or not
    /// 16 bytes, [`ChatError::InvalidState`] if already in a room.
    pub async fn join_room(&self, room_id: &str, key_base64: &str) -> Result<()> {
        let key = RoomKey::from_base64(key_base64)?;
        self.enter_room(room_id, key).await?;
        tracing::info!(room = room_id, "joined room");
        Ok(())
    }

    async fn enter_room(&self, room_id: &str, key: RoomKey) -> Result<()> {
        if room_id.is_empty() {
            return Err(ChatError::config_invalid("room id must not be empty"));
        }
        if self.active().is_some() {
            return Err(ChatError::invalid_state("already in a room"));
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChatError::invalid_state("already in a room"));
        }

        match self.open_room(room_id, key).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn open_room(&self, room_id: &str, key: RoomKey) -> Result<()> {
        let config = &self.inner.config;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.tcp_port);
        let listener = Listener::bind(bind_addr, &config.transport).await?;
        let port = listener.local_addr()?.port();

        let advertised = SocketAddr::new(self.inner.advertise_ip, port);
        let local = PeerRecord::new(advertised, &self.inner.nickname)
            .opted_out(config.relay.supernode_opt_out);

        let mut room = Room::new(room_id, key, config.max_nodes);
        room.admit(local.clone());

        let mut relay_config = config.relay.clone();
        relay_config.enabled = self.inner.relay_mode.load(Ordering::Acquire);

        let active = Arc::new(ActiveRoom {
            topology: TopologyManager::new(local.clone(), &relay_config),
            local,
            membership: RwLock::new(room),
            dialer: Dialer::new(&config.transport),
            seen: Mutex::new(SeenMessages::default()),
            elected: AtomicBool::new(false),
            events: self.inner.events.clone(),
        });

        *self
            .inner
            .room
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&active));

        let handler_room = Arc::clone(&active);
        listener.serve(
            move |frame, remote| handler_room.handle_frame(frame, remote),
            self.inner.shutdown.subscribe(),
        );

        if config.lan_discovery {
            self.start_lan_discovery(&active)?;
        }
        tracing::info!(
            id = %active.local.id,
            nickname = %active.local.display_name,
            "session started"
        );
        Ok(())
    }

    fn start_lan_discovery(&self, active: &Arc<ActiveRoom>) -> Result<()> {
        let config = &self.inner.config;
        let lan = LanDiscovery::bind(LanConfig {
            port: config.udp_port,
            broadcast_addr: config.broadcast_addr,
            interval: config.broadcast_interval,
        })
        .map_err(|e| ChatError::Io(e.to_string()))?;
        let lan = Arc::new(lan);

        let announcer_room = Arc::clone(active);
        lan.spawn_announcer(move || {
            announcer_room
                .local
                .announcement(announcer_room.topology.is_local_relay())
        });

        let (tx, mut rx) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
        lan.spawn_listener(tx);
        let listener_room = Arc::clone(active);
        tokio::spawn(async move {
            while let Some(DiscoveryEvent::Announced { announcement, from }) = rx.recv().await {
                listener_room.handle_announcement(announcement, from);
            }
        });

        *self.inner.lan.lock().unwrap_or_else(PoisonError::into_inner) = Some(lan);
        Ok(())
    }

    /// Send a message to the room.
    ///
    /// The local echo is emitted before any send starts. Sends run in the
    /// background; await [`FanOut::wait`] on the result to observe them.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidState`] outside a room and
    /// [`ChatError::ResourceExhausted`] if the sealed frame is larger than
    /// `transport.max_frame_size`; nothing is echoed or sent then.
    pub fn send_message(&self, content: &str) -> Result<Outbound> {
        self.require_room()?.send(content)
    }

    /// Admit a peer as if it had been discovered.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidState`] outside a room and
    /// [`ChatError::ResourceExhausted`] if the room is full.
    pub fn admit_peer(&self, peer: PeerRecord) -> Result<Admission> {
        match self.require_room()?.admit(peer) {
            Admission::Refused => Err(ChatError::ResourceExhausted("room is full".into())),
            admission => Ok(admission),
        }
    }

    /// Process a discovery announcement.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidState`] outside a room.
    pub fn handle_announcement(&self, announcement: Announcement, from: SocketAddr) -> Result<()> {
        self.require_room()?.handle_announcement(announcement, from);
        Ok(())
    }

    /// Remove a peer from the room, failing over if it was the last relay.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidState`] outside a room or when `peer_id`
    /// is the local node.
    pub fn leave(&self, peer_id: &PeerId) -> Result<Option<PeerRecord>> {
        let active = self.require_room()?;
        if *peer_id == active.local.id {
            return Err(ChatError::invalid_state("cannot remove the local node"));
        }
        Ok(active.leave(peer_id))
    }

    /// Members in admission order with their known roles.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerView> {
        self.active().map(|r| r.peers()).unwrap_or_default()
    }

    /// Turn relay mode on or off.
    pub fn set_relay_mode(&self, enabled: bool) {
        self.inner.relay_mode.store(enabled, Ordering::Release);
        if let Some(active) = self.active() {
            active.topology.set_relay_mode(enabled);
        }
    }

    /// Current relay mode switch.
    #[must_use]
    pub fn relay_mode(&self) -> bool {
        self.inner.relay_mode.load(Ordering::Acquire)
    }

    /// Is the local node currently a relay?
    #[must_use]
    pub fn is_relay(&self) -> bool {
        self.active().is_some_and(|r| r.topology.is_local_relay())
    }

    /// Stop the listener and LAN discovery and leave the room.
    ///
    /// Peers on the LAN are told we are leaving. In-flight sends are left
    /// to finish or fail on their own.
    pub async fn shutdown(&self) {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let lan = self
            .inner
            .lan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let active = self
            .inner
            .room
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(lan), Some(active)) = (lan, active) {
            let mut farewell = active.local.announcement(false);
            farewell.leaving = true;
            if let Err(e) = lan.announce(&farewell).await {
                tracing::debug!(error = %e, "farewell announcement failed");
            }
            lan.stop();
        }

        let _ = self.inner.shutdown.send(true);
        tracing::info!("session stopped");
    }
}
