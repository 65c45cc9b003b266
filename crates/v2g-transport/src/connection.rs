//! One framed connection between EVCC and SECC
//!
//! A [`Connection`] owns exactly one plain or TLS stream. It is created on
//! accept/connect, used for duplex framed I/O and closed exactly once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use v2g_core::{Message, MessageCodec};

use crate::error::{ConnectError, TransportError};
use crate::framing::{write_frame, Frame, FrameBuffer};

/// Default upper bound for a single payload (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_LENGTH: u32 = 1024 * 1024;

/// Byte stream a connection can run on
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// Receives the connection-lost notification
pub trait ConnectionListener: Send + Sync {
    /// Called at most once per connection, only for I/O failures
    fn connection_lost(&self, reason: &str);
}

/// Transport-agnostic interface for a session's message exchange
///
/// Implemented by [`Connection`] and by [`crate::MockTransport`].
#[async_trait]
pub trait MessageTransport: Send {
    /// Wait up to `timeout` for the next message
    ///
    /// A [`TransportError::Timeout`] leaves the transport usable.
    async fn receive(&mut self, timeout: Duration) -> Result<Message, TransportError>;

    /// Send a message, bounded by `timeout`
    async fn send(&mut self, message: &Message, timeout: Duration) -> Result<(), TransportError>;

    /// Close the transport; calling it again is a no-op
    async fn stop(&mut self);

    fn is_tls(&self) -> bool;
}

struct ConnectionShared {
    stop_initiated: AtomicBool,
    interrupt: watch::Sender<bool>,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
}

impl ConnectionShared {
    /// True only for the first caller
    fn initiate_stop(&self) -> bool {
        let first = !self.stop_initiated.swap(true, Ordering::SeqCst);
        if first {
            self.interrupt.send_replace(true);
        }
        first
    }

    fn is_stopped(&self) -> bool {
        self.stop_initiated.load(Ordering::SeqCst)
    }
}

/// Cloneable handle that stops a connection from any task
///
/// Interrupts a pending `receive`; the owning task releases the socket.
/// Never triggers the connection-lost notification.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<ConnectionShared>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.shared.initiate_stop() {
            debug!("Connection stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

/// Framed connection over a plain or TLS stream
pub struct Connection {
    reader: Option<ReadHalf<BoxedStream>>,
    read_buffer: FrameBuffer,
    writer: Option<WriteHalf<BoxedStream>>,
    shared: Arc<ConnectionShared>,
    codec: Arc<dyn MessageCodec>,
    is_tls: bool,
    peer_addr: Option<SocketAddr>,
    max_payload_length: u32,
}

impl Connection {
    pub fn new<S>(
        stream: S,
        is_tls: bool,
        peer_addr: Option<SocketAddr>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self
    where
        S: AsyncStream + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        let (interrupt, _) = watch::channel(false);
        Self {
            reader: Some(reader),
            read_buffer: FrameBuffer::new(),
            writer: Some(writer),
            shared: Arc::new(ConnectionShared {
                stop_initiated: AtomicBool::new(false),
                interrupt,
                listener: Mutex::new(None),
            }),
            codec,
            is_tls,
            peer_addr,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
        }
    }

    pub fn with_max_payload_length(mut self, max_payload_length: u32) -> Self {
        self.max_payload_length = max_payload_length;
        self
    }

    pub fn set_listener(&self, listener: Arc<dyn ConnectionListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Close read side, then write side
    async fn close_streams(&mut self) {
        if let Some(reader) = self.reader.take() {
            drop(reader);
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Error while closing connection (ignored)");
            }
        }
    }

    /// Stop after an I/O failure and notify the listener once
    async fn stop_and_notify(&mut self, reason: &str) {
        let first = self.shared.initiate_stop();
        self.close_streams().await;
        if !first {
            return;
        }
        warn!(peer = ?self.peer_addr, %reason, "Connection lost");
        let listener = self.shared.listener.lock().clone();
        if let Some(listener) = listener {
            listener.connection_lost(reason);
        }
    }
}

enum ReadOutcome {
    Frame(Result<Frame, TransportError>),
    TimedOut,
    Interrupted,
}

#[async_trait]
impl MessageTransport for Connection {
    async fn receive(&mut self, timeout: Duration) -> Result<Message, TransportError> {
        if self.shared.is_stopped() {
            self.close_streams().await;
            return Err(TransportError::ConnectionClosed);
        }
        let max = self.max_payload_length;
        let mut interrupt = self.shared.interrupt.subscribe();
        let outcome = match self.reader.as_mut() {
            Some(reader) => {
                let read_buffer = &mut self.read_buffer;
                tokio::select! {
                    read = tokio::time::timeout(timeout, read_buffer.read_from(reader, max)) => match read {
                        Ok(result) => ReadOutcome::Frame(result),
                        Err(_) => ReadOutcome::TimedOut,
                    },
                    _ = interrupt.wait_for(|stopped| *stopped) => ReadOutcome::Interrupted,
                }
            }
            None => ReadOutcome::Interrupted,
        };

        match outcome {
            ReadOutcome::Frame(Ok(frame)) => {
                debug!(payload_type = ?frame.payload_type, len = frame.payload.len(), "Frame received");
                Ok(self.codec.decode(frame.payload_type, &frame.payload)?)
            }
            ReadOutcome::Frame(Err(e)) => {
                self.stop_and_notify(&e.to_string()).await;
                Err(e)
            }
            ReadOutcome::TimedOut => {
                debug!(buffered = self.read_buffer.buffered(), "Receive timed out");
                Err(TransportError::Timeout(format!(
                    "no message within {} ms",
                    timeout.as_millis()
                )))
            }
            ReadOutcome::Interrupted => {
                self.close_streams().await;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn send(&mut self, message: &Message, timeout: Duration) -> Result<(), TransportError> {
        if self.shared.is_stopped() {
            self.close_streams().await;
            return Err(TransportError::ConnectionClosed);
        }
        let encoded = self.codec.encode(message)?;
        let frame = Frame::new(encoded.payload_type, encoded.bytes);
        let max = self.max_payload_length;
        let writer = self
            .writer
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        match tokio::time::timeout(timeout, write_frame(writer, &frame, max)).await {
            Ok(Ok(())) => {
                debug!(kind = %message.kind(), "Message sent");
                Ok(())
            }
            Ok(Err(TransportError::Framing(e))) => Err(TransportError::Framing(e)),
            Ok(Err(e)) => {
                self.stop_and_notify(&e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                let e = TransportError::Io(format!(
                    "send blocked for more than {} ms",
                    timeout.as_millis()
                ));
                self.stop_and_notify(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) {
        if self.shared.initiate_stop() {
            info!(peer = ?self.peer_addr, "Stopping connection");
        }
        self.close_streams().await;
    }

    fn is_tls(&self) -> bool {
        self.is_tls
    }
}

/// Open a plain TCP connection with a bounded connect timeout
pub async fn connect_plain(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    codec: Arc<dyn MessageCodec>,
) -> Result<Connection, ConnectError> {
    let (stream, addr) = open_tcp(host, port, connect_timeout).await?;
    info!(%addr, "TCP connection established");
    Ok(Connection::new(stream, false, Some(addr), codec))
}

/// Resolve `host` and open a TCP socket to the first address that answers
pub(crate) async fn open_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr), ConnectError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ConnectError::HostResolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::HostResolution {
            host: host.to_string(),
            reason: "no addresses".to_string(),
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                return Ok((stream, addr));
            }
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "TCP connect failed");
                last_error = Some(ConnectError::Io(e));
            }
            Err(_) => last_error = Some(ConnectError::ConnectTimeout(connect_timeout)),
        }
    }
    Err(last_error.unwrap_or(ConnectError::ConnectTimeout(connect_timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{duplex, AsyncReadExt};
    use v2g_core::{
        ChargingSession, JsonCodec, MessageCodec, MessageKind, PayloadType, SessionId,
        SessionStopReq,
    };

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
    }

    impl ConnectionListener for CountingListener {
        fn connection_lost(&self, _reason: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connection_pair() -> (Connection, tokio::io::DuplexStream) {
        let (local, remote) = duplex(64 * 1024);
        (
            Connection::new(local, false, None, Arc::new(JsonCodec)),
            remote,
        )
    }

    fn stop_message() -> Message {
        Message::new(
            SessionId([3; 8]),
            SessionStopReq {
                charging_session: ChargingSession::Terminate,
            },
        )
    }

    #[tokio::test]
    async fn test_send_receive_over_duplex() {
        let (local, remote) = duplex(64 * 1024);
        let mut a = Connection::new(local, false, None, Arc::new(JsonCodec));
        let mut b = Connection::new(remote, false, None, Arc::new(JsonCodec));

        a.send(&stop_message(), Duration::from_secs(1)).await.unwrap();
        let received = b.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.kind(), MessageKind::SessionStopReq);
        assert_eq!(received, stop_message());
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_and_does_not_notify() {
        let (mut conn, _remote) = connection_pair();
        let listener = Arc::new(CountingListener::default());
        conn.set_listener(listener.clone());

        let err = conn.receive(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);

        // still usable
        assert!(conn.send(&stop_message(), Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_mid_frame_keeps_partial_bytes() {
        let (mut conn, mut remote) = connection_pair();
        let listener = Arc::new(CountingListener::default());
        conn.set_listener(listener.clone());
        let encoded = JsonCodec.encode(&stop_message()).unwrap();
        let bytes = Frame::new(encoded.payload_type, encoded.bytes)
            .to_bytes(DEFAULT_MAX_PAYLOAD_LENGTH)
            .unwrap();

        remote.write_all(&bytes[..4]).await.unwrap();
        let err = conn.receive(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());

        remote.write_all(&bytes[4..12]).await.unwrap();
        let err = conn.receive(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());

        remote.write_all(&bytes[12..]).await.unwrap();
        let received = conn.receive(Duration::from_millis(200)).await.unwrap();
        assert_eq!(received, stop_message());
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let (mut conn, mut remote) = connection_pair();
        let listener = Arc::new(CountingListener::default());
        conn.set_listener(listener.clone());

        conn.stop().await;
        conn.stop().await;
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);

        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            conn.receive(Duration::from_millis(10)).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_peer_close_notifies_once() {
        let (mut conn, remote) = connection_pair();
        let listener = Arc::new(CountingListener::default());
        conn.set_listener(listener.clone());
        drop(remote);

        let err = conn.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        let _ = conn.receive(Duration::from_secs(1)).await;
        let _ = conn.send(&stop_message(), Duration::from_secs(1)).await;
        conn.stop().await;
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let (mut conn, mut remote) = connection_pair();
        let listener = Arc::new(CountingListener::default());
        conn.set_listener(listener.clone());

        remote
            .write_all(&[0x01, 0xFE, 0x80, 0x01, 0xFF, 0xFF, 0xFF, 0xFF])
            .await
            .unwrap();
        let err = conn.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_handle_interrupts_receive() {
        let (mut conn, _remote) = connection_pair();
        let listener = Arc::new(CountingListener::default());
        conn.set_listener(listener.clone());
        let handle = conn.stop_handle();

        let task = tokio::spawn(async move { conn.receive(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
        handle.stop();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(handle.is_stopped());
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_payload_type_is_codec_error() {
        let (mut conn, mut remote) = connection_pair();
        let frame = Frame::new(PayloadType::Other(0x8002), vec![]);
        remote
            .write_all(&frame.to_bytes(DEFAULT_MAX_PAYLOAD_LENGTH).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            conn.receive(Duration::from_secs(1)).await,
            Err(TransportError::Codec(_))
        ));
    }
}
