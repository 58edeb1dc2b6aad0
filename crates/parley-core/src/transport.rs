//! TCP transport for chat frames.
//!
//! Every frame travels on its own short-lived connection: dial, write,
//! close. The listener accepts connections and spawns one task per
//! connection to read a single frame and hand it to the session.
//!
//! With [`FrameFormat::Raw`] the frame is everything the peer writes before
//! closing, capped at `max_frame_size`. With [`FrameFormat::LengthPrefixed`]
//! a 4-byte big-endian length precedes the frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{FrameFormat, TransportConfig};
use crate::error::{ChatError, Result};
use crate::fanout::{DeliveryReport, FanOut};

/// First pause after a failed `accept`.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest pause between `accept` retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before retrying `accept` after `failures` consecutive errors.
///
/// Doubles from [`ACCEPT_BACKOFF_MIN`] up to [`ACCEPT_BACKOFF_MAX`].
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Outbound side: dials peers and writes frames.
#[derive(Debug, Clone)]
pub struct Dialer {
    config: TransportConfig,
    permits: Arc<Semaphore>,
}

impl Dialer {
    /// Dialer bounded to `max_concurrent_sends` in-flight sends.
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            config: config.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_sends)),
        }
    }

    /// Largest frame a peer will accept.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.config.max_frame_size
    }

    /// Dial `addr`, write one frame and close.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransientNetwork`] if the dial times out or any
    /// socket operation fails.
    pub async fn send_frame(&self, addr: SocketAddr, frame: &[u8]) -> Result<()> {
        let mut stream = tokio::time::timeout(self.config.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ChatError::network("dial timed out"))?
            .map_err(|e| ChatError::network_dynamic(format!("dial failed: {e}")))?;

        if self.config.frame_format == FrameFormat::LengthPrefixed {
            let len = u32::try_from(frame.len())
                .map_err(|_| ChatError::network("frame too large to prefix"))?;
            stream
                .write_all(&len.to_be_bytes())
                .await
                .map_err(|e| ChatError::network_dynamic(format!("write failed: {e}")))?;
        }
        stream
            .write_all(frame)
            .await
            .map_err(|e| ChatError::network_dynamic(format!("write failed: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| ChatError::network_dynamic(format!("close failed: {e}")))?;
        Ok(())
    }

    /// Send `frame` to every target concurrently, one task per target.
    ///
    /// Returns immediately. Failures are logged with the peer address and
    /// reported through the returned [`FanOut`]; none is retried.
    pub fn fan_out(&self, frame: Arc<[u8]>, targets: Vec<SocketAddr>) -> FanOut {
        if targets.is_empty() {
            return FanOut::empty();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for &target in &targets {
            let dialer = self.clone();
            let frame = Arc::clone(&frame);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = match Arc::clone(&dialer.permits).acquire_owned().await {
                    Ok(_permit) => dialer.send_frame(target, &frame).await,
                    Err(_) => Err(ChatError::network("send pool closed")),
                };
                match &outcome {
                    Ok(()) => tracing::trace!(peer = %target, "frame delivered"),
                    Err(e) => tracing::warn!(peer = %target, error = %e, "send failed"),
                }
                let _ = tx.send(DeliveryReport { target, outcome });
            });
        }
        FanOut::new(rx, targets)
    }
}

/// Read one frame from `reader`.
///
/// # Errors
///
/// Returns [`ChatError::TransientNetwork`] on I/O failure and
/// [`ChatError::ProtocolMalformed`] for empty or oversized frames.
pub async fn read_frame<R>(
    reader: &mut R,
    format: FrameFormat,
    max_frame_size: usize,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let frame = match format {
        FrameFormat::Raw => {
            let mut buf = Vec::new();
            let limit = u64::try_from(max_frame_size).unwrap_or(u64::MAX).saturating_add(1);
            reader
                .take(limit)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| ChatError::network_dynamic(format!("read failed: {e}")))?;
            if buf.len() > max_frame_size {
                return Err(ChatError::malformed("frame exceeds maximum size"));
            }
            buf
        }
        FrameFormat::LengthPrefixed => {
            let mut len_bytes = [0u8; 4];
            reader
                .read_exact(&mut len_bytes)
                .await
                .map_err(|e| ChatError::network_dynamic(format!("read failed: {e}")))?;
            let len = usize::try_from(u32::from_be_bytes(len_bytes))
                .map_err(|_| ChatError::malformed("frame length overflow"))?;
            if len > max_frame_size {
                return Err(ChatError::malformed("frame exceeds maximum size"));
            }
            let mut buf = vec![0u8; len];
            reader
                .read_exact(&mut buf)
                .await
                .map_err(|e| ChatError::network_dynamic(format!("read failed: {e}")))?;
            buf
        }
    };

    if frame.is_empty() {
        return Err(ChatError::malformed("empty frame"));
    }
    Ok(frame)
}

/// Inbound side: accepts connections and reads one frame from each.
pub struct Listener {
    listener: TcpListener,
    config: TransportConfig,
}

impl Listener {
    /// Bind the chat listener.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Io`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "chat listener bound");
        Ok(Self {
            listener,
            config: config.clone(),
        })
    }

    /// Bound address.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Io`] if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until `shutdown` flips to true.
    ///
    /// `handler` receives each frame with the connection's source address.
    /// Connection errors are logged and never stop the loop. Failed accepts
    /// (for example when out of file descriptors) back off before retrying.
    pub fn serve<H>(self, handler: H, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        H: Fn(Vec<u8>, SocketAddr) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                let (mut stream, remote) = tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            let pause = accept_backoff(failures);
                            tracing::warn!(error = %e, ?pause, "accept failed");
                            tokio::select! {
                                () = tokio::time::sleep(pause) => continue,
                                _ = shutdown.changed() => break,
                            }
                        }
                    },
                    _ = shutdown.changed() => break,
                };
                failures = 0;

                let handler = Arc::clone(&handler);
                let config = self.config.clone();
                tokio::spawn(async move {
                    let read = read_frame(&mut stream, config.frame_format, config.max_frame_size);
                    let result = match config.read_timeout {
                        Some(limit) => tokio::time::timeout(limit, read)
                            .await
                            .unwrap_or_else(|_| Err(ChatError::network("read timed out"))),
                        None => read.await,
                    };
                    match result {
                        Ok(frame) => handler(frame, remote),
                        Err(e) => tracing::debug!(peer = %remote, error = %e, "dropping connection"),
                    }
                });
            }
            tracing::debug!("chat listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), ACCEPT_BACKOFF_MIN);
        assert_eq!(accept_backoff(2), ACCEPT_BACKOFF_MIN * 2);
        assert_eq!(accept_backoff(4), ACCEPT_BACKOFF_MIN * 8);
        assert_eq!(accept_backoff(20), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
        assert!((1..40).all(|n| accept_backoff(n) <= accept_backoff(n + 1)));
    }

    fn config(format: FrameFormat) -> TransportConfig {
        TransportConfig {
            dial_timeout: Duration::from_secs(2),
            frame_format: format,
            ..TransportConfig::default()
        }
    }

    async fn roundtrip(format: FrameFormat, payload: &[u8]) -> Vec<u8> {
        let config = config(format);
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), &config)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let _task = listener.serve(
            move |frame, _| {
                let _ = tx.send(frame);
            },
            stop_rx,
        );

        Dialer::new(&config).send_frame(addr, payload).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = stop.send(true);
        got
    }

    #[tokio::test]
    async fn test_raw_frame_delivery() {
        assert_eq!(roundtrip(FrameFormat::Raw, b"hello frame").await, b"hello frame");
    }

    #[tokio::test]
    async fn test_length_prefixed_delivery() {
        let payload = vec![0xEE; 3000];
        assert_eq!(roundtrip(FrameFormat::LengthPrefixed, &payload).await, payload);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_raw() {
        let data = vec![1u8; 100];
        let err = read_frame(&mut &data[..], FrameFormat::Raw, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ProtocolMalformed(_)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_prefix() {
        let mut data = 5000u32.to_be_bytes().to_vec();
        data.extend_from_slice(&[0u8; 16]);
        let err = read_frame(&mut &data[..], FrameFormat::LengthPrefixed, 4096)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ProtocolMalformed(_)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_empty() {
        let err = read_frame(&mut &b""[..], FrameFormat::Raw, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ProtocolMalformed(_)));
    }

    #[tokio::test]
    async fn test_dial_refused_is_transient() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let err = Dialer::new(&config(FrameFormat::Raw))
            .send_frame(addr, b"x")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fan_out_reports_each_target() {
        let config = config(FrameFormat::Raw);
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), &config)
            .await
            .unwrap();
        let good = listener.local_addr().unwrap();
        let (stop, stop_rx) = watch::channel(false);
        let _task = listener.serve(|_, _| {}, stop_rx);

        let bad = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let fan_out = Dialer::new(&config).fan_out(Arc::from(&b"frame"[..]), vec![good, bad]);
        assert_eq!(fan_out.len(), 2);
        let reports = fan_out.wait().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.target == good && r.is_ok()));
        assert!(reports.iter().any(|r| r.target == bad && !r.is_ok()));
        let _ = stop.send(true);
    }

    #[tokio::test]
    async fn test_empty_fan_out() {
        let fan_out = Dialer::new(&TransportConfig::default()).fan_out(Arc::from(&b""[..]), vec![]);
        assert!(fan_out.is_empty());
        assert!(fan_out.wait().await.is_empty());
    }
}
