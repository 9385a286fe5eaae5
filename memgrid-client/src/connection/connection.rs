//! A single socket session to one cluster member.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bytes::BytesMut;
use memgrid_core::protocol::{ClientMessage, ClientMessageCodec};
use memgrid_core::{GridError, Result};

use super::address::Address;
use super::writer::PipelinedWriter;

/// Unique identifier for a connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receives every message read from a connection.
pub trait MessageHandler: Send + Sync {
    /// Handles one complete (reassembled) message.
    fn handle_message(&self, connection: &Arc<Connection>, message: ClientMessage);
}

/// Called once when a connection closes.
pub type CloseHandler = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Why a connection was closed.
#[derive(Debug, Clone)]
pub struct CloseReason {
    /// Human readable reason.
    pub reason: String,
    /// Error that caused the close, if any.
    pub cause: Option<GridError>,
}

/// Settings a connection needs from the client configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Upper bound in bytes for one coalesced write; zero disables coalescing.
    pub write_threshold: usize,
}

/// An open or closed session to one member.
///
/// The connection owns a reader task that feeds decoded messages to a
/// [`MessageHandler`] and a [`PipelinedWriter`]. It goes from open to closed
/// exactly once; later `close` calls do nothing.
pub struct Connection {
    id: ConnectionId,
    remote_address: Address,
    local_address: Option<std::net::SocketAddr>,
    member_uuid: OnceLock<Uuid>,
    member_address: OnceLock<Address>,
    server_version: OnceLock<String>,
    started_at: Instant,
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
    closed: AtomicBool,
    close_reason: OnceLock<CloseReason>,
    cancel: CancellationToken,
    writer: OnceLock<PipelinedWriter>,
    close_handler: CloseHandler,
    self_ref: Weak<Connection>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("member_uuid", &self.member_uuid.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Takes ownership of an established stream and starts its reader and
    /// writer tasks.
    pub fn start<S>(
        stream: S,
        remote_address: Address,
        local_address: Option<std::net::SocketAddr>,
        options: ConnectionOptions,
        handler: Arc<dyn MessageHandler>,
        close_handler: CloseHandler,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let cancel = CancellationToken::new();

        let connection = Arc::new_cyclic(|self_ref| Self {
            id: ConnectionId::new(),
            remote_address,
            local_address,
            member_uuid: OnceLock::new(),
            member_address: OnceLock::new(),
            server_version: OnceLock::new(),
            started_at: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            close_reason: OnceLock::new(),
            cancel: cancel.clone(),
            writer: OnceLock::new(),
            close_handler,
            self_ref: self_ref.clone(),
        });

        let weak = Arc::downgrade(&connection);
        let writer = PipelinedWriter::spawn(
            write_half,
            options.write_threshold,
            cancel.clone(),
            move |error| {
                if let Some(connection) = weak.upgrade() {
                    connection.close("write failed", Some(error));
                }
            },
        );
        let _ = connection.writer.set(writer);

        tokio::spawn(read_loop(
            FramedRead::new(read_half, ClientMessageCodec::new()),
            Arc::downgrade(&connection),
            handler,
            cancel,
        ));

        connection
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the address the socket was opened to.
    pub fn remote_address(&self) -> &Address {
        &self.remote_address
    }

    /// Returns the local socket address, if known.
    pub fn local_address(&self) -> Option<std::net::SocketAddr> {
        self.local_address
    }

    /// Returns the member's UUID once authenticated.
    pub fn member_uuid(&self) -> Option<Uuid> {
        self.member_uuid.get().copied()
    }

    /// Returns the address the member reported during authentication.
    pub fn member_address(&self) -> Option<&Address> {
        self.member_address.get()
    }

    /// Returns the server version reported during authentication.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.get().map(String::as_str)
    }

    pub(crate) fn set_authenticated(&self, member_uuid: Uuid, member_address: Option<Address>, server_version: String) {
        let _ = self.member_uuid.set(member_uuid);
        if let Some(address) = member_address {
            let _ = self.member_address.set(address);
        }
        let _ = self.server_version.set(server_version);
    }

    /// Returns when the connection was opened.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns when a message was last read; the open time if none was.
    pub fn last_read(&self) -> Instant {
        self.started_at + Duration::from_millis(self.last_read_ms.load(Ordering::Acquire))
    }

    /// Returns when a message was last written; the open time if none was.
    pub fn last_write(&self) -> Instant {
        self.started_at + Duration::from_millis(self.last_write_ms.load(Ordering::Acquire))
    }

    fn touch(&self, slot: &AtomicU64) {
        let elapsed = self.started_at.elapsed().as_millis() as u64;
        slot.fetch_max(elapsed, Ordering::AcqRel);
    }

    /// Returns `true` until the connection is closed.
    pub fn is_alive(&self) -> bool {
        !self.is_closed()
    }

    /// Returns `true` once the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns why the connection was closed.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.get()
    }

    /// Writes a message. Resolves when the bytes reached the socket.
    pub async fn write(&self, message: &ClientMessage) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let writer = self
            .writer
            .get()
            .ok_or_else(|| GridError::IllegalState("connection writer not started".to_string()))?;

        let mut buffer = BytesMut::with_capacity(message.wire_size());
        message.write_to(&mut buffer);
        writer.write(buffer.freeze()).await?;
        self.touch(&self.last_write_ms);
        Ok(())
    }

    /// Error for operations on a closed connection.
    pub fn closed_error(&self) -> GridError {
        let reason = self
            .close_reason
            .get()
            .map(|r| r.reason.as_str())
            .unwrap_or("connection closed");
        GridError::TargetDisconnected(format!("{} ({}): {}", self.remote_address, self.id, reason))
    }

    /// Closes the connection. Only the first call has any effect.
    pub fn close(&self, reason: &str, cause: Option<GridError>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match &cause {
            Some(error) => tracing::warn!(
                id = %self.id,
                address = %self.remote_address,
                reason,
                error = %error,
                "connection closed"
            ),
            None => tracing::info!(
                id = %self.id,
                address = %self.remote_address,
                reason,
                "connection closed"
            ),
        }

        let _ = self.close_reason.set(CloseReason {
            reason: reason.to_string(),
            cause,
        });
        self.cancel.cancel();

        if let Some(connection) = self.self_ref.upgrade() {
            (self.close_handler)(&connection);
        }
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, ClientMessageCodec>,
    connection: Weak<Connection>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = frames.next() => next,
        };
        let Some(connection) = connection.upgrade() else {
            return;
        };

        match next {
            Some(Ok(message)) => {
                connection.touch(&connection.last_read_ms);
                handler.handle_message(&connection, message);
            }
            Some(Err(e)) => {
                connection.close("failed to read from connection", Some(e));
                return;
            }
            None => {
                connection.close(
                    "connection closed by the remote side",
                    Some(GridError::TargetDisconnected(format!(
                        "{} closed the connection",
                        connection.remote_address
                    ))),
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memgrid_core::protocol::constants::CLIENT_PING;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    struct ChannelHandler(mpsc::UnboundedSender<ClientMessage>);

    impl MessageHandler for ChannelHandler {
        fn handle_message(&self, _connection: &Arc<Connection>, message: ClientMessage) {
            let _ = self.0.send(message);
        }
    }

    fn start_pair(
        close_handler: CloseHandler,
    ) -> (
        Arc<Connection>,
        tokio::io::DuplexStream,
        mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::start(
            client,
            Address::new("127.0.0.1", 5701),
            None,
            ConnectionOptions { write_threshold: 8192 },
            Arc::new(ChannelHandler(tx)),
            close_handler,
        );
        (connection, server, rx)
    }

    fn noop_close() -> CloseHandler {
        Arc::new(|_: &Arc<Connection>| {})
    }

    fn ping(correlation_id: i64) -> ClientMessage {
        let mut message = ClientMessage::create_for_encode_any_partition(CLIENT_PING);
        message.set_correlation_id(correlation_id);
        message
    }

    #[test]
    fn test_connection_id_uniqueness() {
        let ids: Vec<_> = (0..3).map(|_| ConnectionId::new()).collect();
        assert!(ids[0] < ids[1] && ids[1] < ids[2]);
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (connection, mut server, _rx) = start_pair(noop_close());
        let message = ping(5);
        connection.write(&message).await.unwrap();

        let mut expected = BytesMut::new();
        message.write_to(&mut expected);
        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..], &expected[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_messages_reach_handler_and_update_last_read() {
        let (connection, mut server, mut rx) = start_pair(noop_close());
        tokio::time::advance(Duration::from_secs(3)).await;

        let mut bytes = BytesMut::new();
        ping(9).write_to(&mut bytes);
        server.write_all(&bytes).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.correlation_id(), Some(9));
        assert!(connection.last_read() >= connection.started_at() + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_notifies_once() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let (connection, _server, _rx) = start_pair(Arc::new(move |_: &Arc<Connection>| {
            *counter.lock().unwrap() += 1;
        }));

        connection.close("first", None);
        connection.close("second", Some(GridError::Connection("ignored".into())));

        assert!(connection.is_closed());
        assert_eq!(connection.close_reason().unwrap().reason, "first");
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(matches!(
            connection.write(&ping(1)).await,
            Err(GridError::TargetDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_hangup_closes_connection() {
        let (tx, mut closed_rx) = mpsc::unbounded_channel();
        let (connection, server, _rx) = start_pair(Arc::new(move |c: &Arc<Connection>| {
            let _ = tx.send(c.id());
        }));

        drop(server);
        assert_eq!(closed_rx.recv().await, Some(connection.id()));
        assert!(matches!(
            connection.close_reason().unwrap().cause,
            Some(GridError::TargetDisconnected(_))
        ));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    struct DiscardHandler;

    impl MessageHandler for DiscardHandler {
        fn handle_message(&self, _connection: &Arc<Connection>, _message: ClientMessage) {}
    }

    /// Starts a connection over an in-memory pipe and marks it authenticated
    /// to `member_uuid`. The peer end must be kept alive by the caller.
    pub(crate) fn authenticated_connection(
        member_uuid: Uuid,
        port: u16,
    ) -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let connection = Connection::start(
            client,
            Address::new("127.0.0.1", port),
            None,
            ConnectionOptions { write_threshold: 0 },
            Arc::new(DiscardHandler),
            Arc::new(|_: &Arc<Connection>| {}),
        );
        connection.set_authenticated(member_uuid, Some(Address::new("127.0.0.1", port)), "5.3.0".into());
        (connection, server)
    }
}
