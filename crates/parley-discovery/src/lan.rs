//! LAN presence announcements over UDP broadcast.
//!
//! Every node periodically broadcasts a small JSON [`Announcement`] to the
//! discovery port and listens on the same port for everyone else's. The
//! socket is opened with address reuse so several nodes on one host can
//! share the port.
//!
//! Announcements carry no room id and no authentication; the session layer
//! decides what to do with them.

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::DiscoveryError;

/// Largest announcement datagram accepted.
const MAX_DATAGRAM: usize = 2048;

/// A node's presence announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Peer id (the canonical `ip:port` text of the address)
    pub id: String,
    /// TCP endpoint for chat frames
    pub address: SocketAddr,
    /// Display name
    pub nickname: String,
    /// Node refuses the relay role
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_super_node: bool,
    /// Node currently acts as a relay
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub super_node: bool,
    /// Node is shutting down
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub leaving: bool,
}

impl Announcement {
    /// Encode to a JSON datagram.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON datagram.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Codec`] for anything that is not an
    /// announcement.
    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Something heard on the discovery port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A well-formed announcement arrived
    Announced {
        /// Decoded announcement
        announcement: Announcement,
        /// Datagram source
        from: SocketAddr,
    },
}

/// LAN discovery settings.
#[derive(Debug, Clone)]
pub struct LanConfig {
    /// UDP port to bind and broadcast to
    pub port: u16,
    /// Destination of outgoing announcements
    pub broadcast_addr: Ipv4Addr,
    /// Time between announcements
    pub interval: Duration,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            broadcast_addr: Ipv4Addr::BROADCAST,
            interval: Duration::from_secs(5),
        }
    }
}

/// Broadcast announcer and listener sharing one UDP socket.
pub struct LanDiscovery {
    socket: Arc<UdpSocket>,
    config: LanConfig,
    shutdown: watch::Sender<bool>,
}

impl LanDiscovery {
    /// Bind the discovery socket on all interfaces.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Io`] if the socket cannot be configured or
    /// bound.
    pub fn bind(config: LanConfig) -> Result<Self, DiscoveryError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        socket.bind(&SockAddr::from(bind_addr))?;

        let socket = UdpSocket::from_std(socket.into())?;
        let (shutdown, _) = watch::channel(false);
        tracing::debug!(port = config.port, "LAN discovery socket bound");

        Ok(Self {
            socket: Arc::new(socket),
            config,
            shutdown,
        })
    }

    /// Local address of the discovery socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be read from the socket.
    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one announcement to the broadcast address.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or sending fails.
    pub async fn announce(&self, announcement: &Announcement) -> Result<(), DiscoveryError> {
        let datagram = announcement.encode()?;
        let target = SocketAddrV4::new(self.config.broadcast_addr, self.config.port);
        self.socket.send_to(&datagram, target).await?;
        Ok(())
    }

    /// Announce every interval until [`LanDiscovery::stop`] is called.
    ///
    /// `current` is invoked before each send so the announcement reflects
    /// the node's role at that moment. Send failures are logged and the
    /// loop keeps going.
    pub fn spawn_announcer<F>(&self, current: F) -> JoinHandle<()>
    where
        F: Fn() -> Announcement + Send + Sync + 'static,
    {
        let socket = Arc::clone(&self.socket);
        let target = SocketAddrV4::new(self.config.broadcast_addr, self.config.port);
        let mut ticker = tokio::time::interval(self.config.interval);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                let datagram = match current().encode() {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode announcement");
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&datagram, target).await {
                    tracing::warn!(error = %e, %target, "announcement send failed");
                }
            }
            tracing::debug!("announcer stopped");
        })
    }

    /// Decode incoming announcements and forward them to `events`.
    ///
    /// Malformed datagrams are dropped. The task ends on
    /// [`LanDiscovery::stop`] or when the receiver is dropped.
    pub fn spawn_listener(&self, events: mpsc::Sender<DiscoveryEvent>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = tokio::select! {
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "discovery receive failed");
                            continue;
                        }
                    },
                    _ = shutdown.changed() => break,
                };

                let announcement = match Announcement::decode(&buf[..len]) {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::debug!(peer = %from, error = %e, "ignoring malformed announcement");
                        continue;
                    }
                };

                let event = DiscoveryEvent::Announced { announcement, from };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            tracing::debug!("discovery listener stopped");
        })
    }

    /// Stop the announcer and listener tasks.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}
