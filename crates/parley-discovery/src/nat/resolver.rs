//! Ordered STUN resolution with a local fallback.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use super::stun::{StunClient, StunError};

/// Public STUN servers, tried in order.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
    "stun2.l.google.com:19302",
    "stun3.l.google.com:19302",
    "stun4.l.google.com:19302",
    "stun.qq.com:19302",
    "stun.miwifi.com:19302",
    "stun.msn.com:19302",
    "stun.hot-chilli.net:19302",
    "stun.ekiga.net:3478",
    "stun.ideasip.com:3478",
    "stun.rixtelecom.se:3478",
    "stun.schlund.de:3478",
    "stun.stunprotocol.org:3478",
    "stun.voiparound.com:3478",
    "stun.voipbuster.com:3478",
    "stun.voipstunt.com:3478",
    "stun.voxgratia.org:3478",
    "stun.xten.com:3478",
];

/// Resolves the node's externally reachable endpoint.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    servers: Vec<String>,
    timeout: Duration,
    fallback_port: u16,
}

impl EndpointResolver {
    /// Create a resolver over `servers` (each `host:port`).
    ///
    /// `fallback_port` is paired with the local address guess when every
    /// server fails.
    #[must_use]
    pub fn new(servers: Vec<String>, timeout: Duration, fallback_port: u16) -> Self {
        Self {
            servers,
            timeout,
            fallback_port,
        }
    }

    /// Query each server in order and return the first mapped endpoint.
    ///
    /// Never fails: if no server answers with a usable mapping, returns the
    /// local address guess paired with the fallback port.
    pub async fn resolve_public_endpoint(&self) -> SocketAddr {
        match self.try_servers().await {
            Ok(addr) => addr,
            Err(e) => {
                let fallback = SocketAddr::new(local_ip_guess(), self.fallback_port);
                tracing::warn!(error = %e, %fallback, "STUN resolution failed, using local address");
                fallback
            }
        }
    }

    async fn try_servers(&self) -> Result<SocketAddr, StunError> {
        let mut last_error = StunError::MappedAddressNotFound;
        for server in &self.servers {
            match self.query_one(server).await {
                Ok(mapped) => {
                    tracing::info!(%server, %mapped, "STUN mapped address resolved");
                    return Ok(SocketAddr::V4(mapped));
                }
                Err(e) => {
                    tracing::debug!(%server, error = %e, "STUN server failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// One query on its own socket, so a late answer from an earlier server
    /// cannot land in this exchange.
    async fn query_one(&self, server: &str) -> Result<SocketAddrV4, StunError> {
        let mut client = StunClient::bind("0.0.0.0:0").await?;
        client.set_timeout(self.timeout);
        client.query(server).await
    }
}

/// Best guess at the address of the outbound interface.
///
/// Connects an unbound UDP socket toward a public address (no packet is
/// sent) and reads back the local address the kernel picked. Falls back to
/// loopback when there is no route.
#[must_use]
pub fn local_ip_guess() -> IpAddr {
    let connect_guess = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match connect_guess() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
