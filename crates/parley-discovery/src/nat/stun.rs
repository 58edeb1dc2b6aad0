//! STUN Binding (RFC 5389) for public endpoint discovery.
//!
//! Only the subset Parley needs is implemented: an attribute-less Binding
//! Request, and extraction of an IPv4 XOR-MAPPED-ADDRESS from a Binding
//! Success Response.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0|     STUN Message Type     |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Magic Cookie                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Transaction ID (96 bits)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use rand::RngCore;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::Instant;

/// STUN magic cookie (0x2112A442)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Binding Request message type
pub const BINDING_REQUEST: u16 = 0x0001;

/// Binding Success Response message type
pub const BINDING_SUCCESS: u16 = 0x0101;

/// XOR-MAPPED-ADDRESS attribute type
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// Address family marker for IPv4
const FAMILY_IPV4: u8 = 0x01;

/// Receive buffer size for responses
const RECV_BUFFER_SIZE: usize = 1024;

/// Default STUN timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A Binding Request with its transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRequest {
    /// Transaction ID (96 bits)
    pub transaction_id: [u8; 12],
}

impl BindingRequest {
    /// Create a request with a random transaction id.
    #[must_use]
    pub fn new() -> Self {
        let mut transaction_id = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut transaction_id);
        Self { transaction_id }
    }

    /// Encode to the 20-byte wire form (header only, no attributes).
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
        // length stays zero
        buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf[8..20].copy_from_slice(&self.transaction_id);
        buf
    }
}

impl Default for BindingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction id of a STUN message, if the header is present.
#[must_use]
pub fn transaction_id(data: &[u8]) -> Option<[u8; 12]> {
    data.get(8..HEADER_SIZE)?.try_into().ok()
}

/// Parse a Binding Success Response and return the IPv4 XOR-MAPPED-ADDRESS.
///
/// The attribute walk stops at the first attribute whose declared length runs
/// past the message; such a response yields
/// [`StunError::MappedAddressNotFound`] instead of reading out of bounds.
///
/// # Errors
///
/// - [`StunError::MessageTooShort`] if fewer than 20 bytes are supplied
/// - [`StunError::InvalidMessageType`] if the type is not Binding Success
/// - [`StunError::Incomplete`] if the body is shorter than the declared length
/// - [`StunError::MappedAddressNotFound`] if no usable IPv4 mapping is present
pub fn parse_binding_response(data: &[u8]) -> Result<SocketAddrV4, StunError> {
    if data.len() < HEADER_SIZE {
        return Err(StunError::MessageTooShort);
    }

    let message_type = u16::from_be_bytes([data[0], data[1]]);
    if message_type != BINDING_SUCCESS {
        return Err(StunError::InvalidMessageType);
    }

    let message_len = usize::from(u16::from_be_bytes([data[2], data[3]]));
    let end = HEADER_SIZE + message_len;
    if data.len() < end {
        return Err(StunError::Incomplete);
    }

    let mut offset = HEADER_SIZE;
    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = usize::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > end {
            break;
        }

        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            if let Some(addr) = decode_xor_mapped_v4(&data[value_start..value_end]) {
                return Ok(addr);
            }
        }

        // Attributes are padded to 4-byte boundaries
        let padding = (4 - (attr_len % 4)) % 4;
        offset = value_end + padding;
    }

    Err(StunError::MappedAddressNotFound)
}

fn decode_xor_mapped_v4(value: &[u8]) -> Option<SocketAddrV4> {
    if value.len() < 8 || value[1] != FAMILY_IPV4 {
        return None;
    }

    let cookie = MAGIC_COOKIE.to_be_bytes();
    let port = u16::from_be_bytes([value[2], value[3]]) ^ ((MAGIC_COOKIE >> 16) as u16);
    let ip = Ipv4Addr::new(
        value[4] ^ cookie[0],
        value[5] ^ cookie[1],
        value[6] ^ cookie[2],
        value[7] ^ cookie[3],
    );
    Some(SocketAddrV4::new(ip, port))
}

/// STUN client for server reflexive address discovery
pub struct StunClient {
    socket: UdpSocket,
    timeout: Duration,
}

impl StunClient {
    /// Bind a new STUN client to a local address
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound
    pub async fn bind(addr: &str) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the read timeout for a single query
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Get local socket address
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Query one server, given as `host:port`, for our mapped IPv4 endpoint.
    ///
    /// # Errors
    ///
    /// Returns `StunError` if the name does not resolve to an IPv4 address,
    /// network I/O fails, the server does not answer within the timeout, or
    /// the answer does not parse.
    pub async fn query(&self, server: &str) -> Result<SocketAddrV4, StunError> {
        let target = lookup_host(server)
            .await
            .map_err(|_| StunError::Resolve(server.to_string()))?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| StunError::Resolve(server.to_string()))?;

        self.get_mapped_address(target).await
    }

    /// Get mapped address from a resolved STUN server
    ///
    /// Datagrams from any other source, or carrying another transaction id
    /// (a late answer to an earlier query), are skipped until the deadline.
    ///
    /// # Errors
    ///
    /// Returns `StunError` if:
    /// - Network I/O fails
    /// - STUN server doesn't respond within timeout
    /// - Response is invalid or missing XOR-MAPPED-ADDRESS
    pub async fn get_mapped_address(&self, server: SocketAddr) -> Result<SocketAddrV4, StunError> {
        let request = BindingRequest::new();
        self.socket.send_to(&request.encode(), server).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| StunError::Timeout)??;

            let response = &buf[..len];
            if from != server {
                tracing::trace!(%from, %server, "ignoring datagram from unexpected source");
                continue;
            }
            if transaction_id(response).is_some_and(|id| id != request.transaction_id) {
                tracing::trace!(%server, "ignoring stale STUN response");
                continue;
            }
            return parse_binding_response(response);
        }
    }
}

/// STUN error types
#[derive(Debug)]
pub enum StunError {
    /// I/O error
    Io(std::io::Error),
    /// Query timeout
    Timeout,
    /// Server name did not resolve to an IPv4 address
    Resolve(String),
    /// Fewer than 20 bytes received
    MessageTooShort,
    /// Not a Binding Success Response
    InvalidMessageType,
    /// Body shorter than the declared message length
    Incomplete,
    /// No IPv4 XOR-MAPPED-ADDRESS attribute
    MappedAddressNotFound,
}

impl std::fmt::Display for StunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Timeout => write!(f, "STUN query timeout"),
            Self::Resolve(server) => write!(f, "cannot resolve STUN server {server}"),
            Self::MessageTooShort => write!(f, "STUN message too short"),
            Self::InvalidMessageType => write!(f, "not a Binding Success Response"),
            Self::Incomplete => write!(f, "incomplete STUN message"),
            Self::MappedAddressNotFound => write!(f, "XOR-MAPPED-ADDRESS not found"),
        }
    }
}

impl std::error::Error for StunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StunError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Build a Binding Success Response carrying `mapped`, as a server would.
///
/// Used by tests and by the loopback STUN responder in the integration suite.
#[must_use]
pub fn encode_binding_success(transaction_id: [u8; 12], mapped: SocketAddrV4) -> Vec<u8> {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let port = mapped.port() ^ ((MAGIC_COOKIE >> 16) as u16);
    let ip = mapped.ip().octets();

    let mut buf = Vec::with_capacity(HEADER_SIZE + 12);
    buf.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
    buf.extend_from_slice(&12u16.to_be_bytes());
    buf.extend_from_slice(&cookie);
    buf.extend_from_slice(&transaction_id);
    buf.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
    buf.extend_from_slice(&8u16.to_be_bytes());
    buf.push(0);
    buf.push(FAMILY_IPV4);
    buf.extend_from_slice(&port.to_be_bytes());
    for (b, c) in ip.iter().zip(cookie.iter()) {
        buf.push(b ^ c);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn header(message_type: u16, len: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&message_type.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf.extend_from_slice(&[7u8; 12]);
        buf
    }

    #[test]
    fn test_binding_request_encoding() {
        let request = BindingRequest::new();
        let bytes = request.encode();

        assert_eq!(&bytes[0..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..4], &[0x00, 0x00]);
        assert_eq!(&bytes[4..8], &[0x21, 0x12, 0xA4, 0x42]);
        assert_eq!(&bytes[8..20], &request.transaction_id);
    }

    #[test]
    fn test_transaction_ids_are_random() {
        assert_ne!(
            BindingRequest::new().transaction_id,
            BindingRequest::new().transaction_id
        );
    }

    #[test]
    fn test_parse_success_response() {
        let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 54321);
        let response = encode_binding_success([1u8; 12], mapped);
        assert_eq!(parse_binding_response(&response).unwrap(), mapped);
    }

    #[test]
    fn test_parse_known_bytes() {
        // 192.0.2.1:32853 XORed with the cookie
        let mut response = header(BINDING_SUCCESS, 12);
        response.extend_from_slice(&[0x00, 0x20, 0x00, 0x08]);
        response.extend_from_slice(&[0x00, 0x01, 0xA1, 0x47, 0xE1, 0x12, 0xA6, 0x43]);

        let addr = parse_binding_response(&response).unwrap();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 32853));
    }

    #[test]
    fn test_parse_skips_unknown_attributes() {
        let mapped = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 9), 3478);
        let tail = encode_binding_success([0u8; 12], mapped);

        // SOFTWARE attribute with 5 bytes of value, padded to 8
        let mut response = header(BINDING_SUCCESS, 12 + 12);
        response.extend_from_slice(&[0x80, 0x22, 0x00, 0x05]);
        response.extend_from_slice(b"parle\0\0\0");
        response.extend_from_slice(&tail[HEADER_SIZE..]);

        assert_eq!(parse_binding_response(&response).unwrap(), mapped);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(matches!(
            parse_binding_response(&[0u8; 19]),
            Err(StunError::MessageTooShort)
        ));
    }

    #[test]
    fn test_parse_wrong_type() {
        let response = header(BINDING_REQUEST, 0);
        assert!(matches!(
            parse_binding_response(&response),
            Err(StunError::InvalidMessageType)
        ));
    }

    #[test]
    fn test_parse_incomplete_body() {
        let mut response = header(BINDING_SUCCESS, 12);
        response.extend_from_slice(&[0x00, 0x20, 0x00, 0x08]);
        assert!(matches!(
            parse_binding_response(&response),
            Err(StunError::Incomplete)
        ));
    }

    #[test]
    fn test_parse_truncated_attribute_is_not_found() {
        // Attribute claims 32 bytes but the message holds only 8 after its header
        let mut response = header(BINDING_SUCCESS, 12);
        response.extend_from_slice(&[0x00, 0x20, 0x00, 0x20]);
        response.extend_from_slice(&[0x00, 0x01, 0xA1, 0x47, 0xE1, 0x12, 0xA6, 0x43]);
        assert!(matches!(
            parse_binding_response(&response),
            Err(StunError::MappedAddressNotFound)
        ));
    }

    #[test]
    fn test_parse_short_mapped_value_is_not_found() {
        let mut response = header(BINDING_SUCCESS, 8);
        response.extend_from_slice(&[0x00, 0x20, 0x00, 0x04]);
        response.extend_from_slice(&[0x00, 0x01, 0xA1, 0x47]);
        assert!(matches!(
            parse_binding_response(&response),
            Err(StunError::MappedAddressNotFound)
        ));
    }

    #[test]
    fn test_parse_ipv6_family_is_not_found() {
        let mut response = header(BINDING_SUCCESS, 24);
        response.extend_from_slice(&[0x00, 0x20, 0x00, 0x14]);
        response.extend_from_slice(&[0x00, 0x02, 0xA1, 0x47]);
        response.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            parse_binding_response(&response),
            Err(StunError::MappedAddressNotFound)
        ));
    }

    #[test]
    fn test_transaction_id_extraction() {
        let response = header(BINDING_SUCCESS, 0);
        assert_eq!(transaction_id(&response), Some([7u8; 12]));
        assert_eq!(transaction_id(&response[..10]), None);
    }

    #[tokio::test]
    async fn test_client_against_loopback_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 77), 40000);

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let id = transaction_id(&buf[..len]).unwrap();
            let reply = encode_binding_success(id, mapped);
            server.send_to(&reply, from).await.unwrap();
        });

        let client = StunClient::bind("127.0.0.1:0").await.unwrap();
        let got = client.query(&server_addr.to_string()).await.unwrap();
        assert_eq!(got, mapped);
    }

    #[tokio::test]
    async fn test_client_skips_stale_and_foreign_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 40001);
        let decoy = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 1);

        let mut client = StunClient::bind("127.0.0.1:0").await.unwrap();
        client.set_timeout(Duration::from_millis(500));
        let client_addr = client.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let id = transaction_id(&buf[..len]).unwrap();

            // Right id, wrong source
            stranger
                .send_to(&encode_binding_success(id, decoy), client_addr)
                .await
                .unwrap();
            // Right source, answer to an older query
            server
                .send_to(&encode_binding_success([0xEE; 12], decoy), from)
                .await
                .unwrap();
            server
                .send_to(&encode_binding_success(id, mapped), from)
                .await
                .unwrap();
        });

        let got = client.get_mapped_address(server_addr).await.unwrap();
        assert_eq!(got, mapped);
    }

    #[tokio::test]
    async fn test_client_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut client = StunClient::bind("127.0.0.1:0").await.unwrap();
        client.set_timeout(Duration::from_millis(100));

        let result = client
            .get_mapped_address(silent.local_addr().unwrap())
            .await;
        assert!(matches!(result, Err(StunError::Timeout)));
    }

    proptest! {
        #[test]
        fn prop_parser_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse_binding_response(&data);
        }

        #[test]
        fn prop_parser_never_panics_on_success_header(
            body in proptest::collection::vec(any::<u8>(), 0..128),
            declared in 0u16..200,
        ) {
            let mut data = header(BINDING_SUCCESS, declared);
            data.extend_from_slice(&body);
            let _ = parse_binding_response(&data);
        }
    }
}
