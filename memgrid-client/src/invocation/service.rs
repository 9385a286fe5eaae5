//! Sends invocations, matches responses by correlation id and retries
//! retryable failures until the invocation deadline.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use memgrid_core::{ClientMessage, GridError, Result};

use super::{EventHandler, Invocation, InvocationTarget};
use crate::cluster::{LifecycleService, PartitionService};
use crate::codec::ErrorsCodec;
use crate::config::ClientProperties;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, MessageHandler};

struct PendingInvocation {
    connection: ConnectionId,
    sender: oneshot::Sender<Result<ClientMessage>>,
}

struct RegisteredHandler {
    connection: ConnectionId,
    handler: EventHandler,
}

/// Drops an invocation's table entries when it is abandoned or fails.
struct PendingEntry<'a> {
    service: &'a InvocationService,
    correlation_id: i64,
    completed: bool,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.service.discard(self.correlation_id);
        }
    }
}

/// Routes requests to connections and completes them with their responses.
///
/// Every send takes a fresh correlation id, so a correlation id is never
/// shared by two invocations in flight. Event registrations keep their
/// handler until it is removed or its connection closes.
pub struct InvocationService {
    pending: DashMap<i64, PendingInvocation>,
    event_handlers: DashMap<i64, RegisteredHandler>,
    next_correlation_id: AtomicI64,
    limiter: Option<Semaphore>,
    registry: Arc<ConnectionRegistry>,
    partitions: Arc<PartitionService>,
    lifecycle: Arc<LifecycleService>,
    invocation_timeout: Duration,
    retry_pause: Duration,
    redo_operation: bool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for InvocationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationService")
            .field("pending", &self.pending.len())
            .field("event_handlers", &self.event_handlers.len())
            .field("invocation_timeout", &self.invocation_timeout)
            .finish()
    }
}

impl InvocationService {
    /// Creates the service.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        partitions: Arc<PartitionService>,
        lifecycle: Arc<LifecycleService>,
        properties: &ClientProperties,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            event_handlers: DashMap::new(),
            next_correlation_id: AtomicI64::new(1),
            limiter: properties.max_concurrent_invocations().map(Semaphore::new),
            registry,
            partitions,
            lifecycle,
            invocation_timeout: properties.invocation_timeout(),
            retry_pause: properties.invocation_retry_pause(),
            redo_operation: properties.redo_operation(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of invocations waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends `request` to any connection.
    pub async fn invoke_on_random_target(&self, request: ClientMessage) -> Result<ClientMessage> {
        self.invoke(Invocation::new(request, InvocationTarget::Random))
            .await
    }

    /// Sends `request` to the owner of `partition_id`.
    pub async fn invoke_on_partition(
        &self,
        request: ClientMessage,
        partition_id: i32,
    ) -> Result<ClientMessage> {
        self.invoke(Invocation::new(
            request,
            InvocationTarget::Partition(partition_id),
        ))
        .await
    }

    /// Sends `request` to the member `member_uuid`.
    pub async fn invoke_on_member(
        &self,
        request: ClientMessage,
        member_uuid: Uuid,
    ) -> Result<ClientMessage> {
        self.invoke(Invocation::new(request, InvocationTarget::Member(member_uuid)))
            .await
    }

    /// Sends `request` over `connection` only.
    pub async fn invoke_on_connection(
        &self,
        request: ClientMessage,
        connection: Arc<Connection>,
    ) -> Result<ClientMessage> {
        self.invoke(Invocation::new(
            request,
            InvocationTarget::Connection(connection),
        ))
        .await
    }

    /// Sends control-plane traffic, bypassing the concurrency limit and the
    /// client state check.
    pub async fn invoke_urgent(
        &self,
        request: ClientMessage,
        target: InvocationTarget,
    ) -> Result<ClientMessage> {
        self.invoke(Invocation::new(request, target).urgent()).await
    }

    /// Sends an invocation and waits for its response, retrying retryable
    /// failures until the invocation timeout.
    #[tracing::instrument(
        name = "invocation.invoke",
        skip(self, invocation),
        fields(
            message_type = ?invocation.request.message_type(),
            urgent = invocation.urgent
        )
    )]
    pub async fn invoke(&self, mut invocation: Invocation) -> Result<ClientMessage> {
        let _permit = match (&self.limiter, invocation.urgent) {
            (Some(limiter), false) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|_| Self::not_active())?,
            ),
            _ => None,
        };

        let deadline = Instant::now() + self.invocation_timeout;
        loop {
            let error = match self.send_and_wait(&mut invocation).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if !self.is_retryable(&invocation, &error) {
                return Err(error);
            }
            if Instant::now() >= deadline {
                return Err(GridError::OperationTimeout {
                    message: format!(
                        "invocation did not complete within {:?}",
                        self.invocation_timeout
                    ),
                    cause: Box::new(error),
                });
            }

            tracing::debug!(error = %error, pause = ?self.retry_pause, "retrying invocation");
            tokio::time::sleep(self.retry_pause).await;
        }
    }

    async fn send_and_wait(&self, invocation: &mut Invocation) -> Result<ClientMessage> {
        if self.shut_down.load(Ordering::Acquire) || !self.lifecycle.is_running() {
            return Err(Self::not_active());
        }
        if !invocation.urgent {
            self.registry.check_if_invocation_allowed()?;
        }

        let connection = self.select_connection(&invocation.target)?;
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::AcqRel);
        invocation.request.set_correlation_id(correlation_id);
        if let InvocationTarget::Partition(partition_id) = invocation.target {
            invocation.request.set_partition_id(partition_id);
        }

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            correlation_id,
            PendingInvocation {
                connection: connection.id(),
                sender,
            },
        );
        if let Some(handler) = &invocation.event_handler {
            self.event_handlers.insert(
                correlation_id,
                RegisteredHandler {
                    connection: connection.id(),
                    handler: Arc::clone(handler),
                },
            );
        }

        let mut entry = PendingEntry {
            service: self,
            correlation_id,
            completed: false,
        };

        // A close that ran before the insert above did not see this entry.
        if connection.is_closed() {
            return Err(connection.closed_error());
        }

        tracing::trace!(correlation_id, connection = %connection.id(), "sending invocation");
        connection.write(&invocation.request).await?;

        let result = receiver.await.unwrap_or_else(|_| Err(Self::not_active()));
        // Event handlers outlive a successful registration.
        entry.completed = result.is_ok();
        result
    }

    fn select_connection(&self, target: &InvocationTarget) -> Result<Arc<Connection>> {
        match target {
            InvocationTarget::Connection(connection) => {
                if connection.is_alive() {
                    Ok(Arc::clone(connection))
                } else {
                    Err(connection.closed_error())
                }
            }
            InvocationTarget::Partition(partition_id) => {
                if self.registry.is_smart_routing() {
                    if let Some(connection) = self
                        .partitions
                        .partition_owner(*partition_id)
                        .and_then(|owner| self.registry.get_connection(&owner))
                    {
                        return Ok(connection);
                    }
                }
                self.random_connection()
            }
            InvocationTarget::Member(member_uuid) => {
                self.registry.get_connection(member_uuid).ok_or_else(|| {
                    GridError::no_connection(format!("No connection found to member {}", member_uuid))
                })
            }
            InvocationTarget::Random => self.random_connection(),
        }
    }

    fn random_connection(&self) -> Result<Arc<Connection>> {
        self.registry
            .get_random_connection()
            .ok_or_else(|| GridError::no_connection("No connection found to cluster."))
    }

    fn is_retryable(&self, invocation: &Invocation, error: &GridError) -> bool {
        if matches!(invocation.target, InvocationTarget::Connection(_)) {
            return false;
        }
        match error {
            GridError::Io(_) => true,
            GridError::Remote(remote) => remote.is_retryable(),
            GridError::TargetDisconnected(_) => {
                self.redo_operation || invocation.request.is_retryable()
            }
            _ => false,
        }
    }

    fn discard(&self, correlation_id: i64) {
        self.pending.remove(&correlation_id);
        self.event_handlers.remove(&correlation_id);
    }

    fn not_active() -> GridError {
        GridError::ClientNotActive("client is shutting down".to_string())
    }

    /// Removes a listener registration's event handler.
    pub fn remove_event_handler(&self, correlation_id: i64) -> bool {
        self.event_handlers.remove(&correlation_id).is_some()
    }

    /// Fails every invocation waiting on `connection` and drops the event
    /// handlers registered over it.
    pub fn on_connection_closed(&self, connection: &Connection) {
        let id = connection.id();
        let waiting: Vec<i64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().connection == id)
            .map(|entry| *entry.key())
            .collect();

        if !waiting.is_empty() {
            tracing::debug!(connection = %id, count = waiting.len(), "failing invocations of closed connection");
        }
        for correlation_id in waiting {
            if let Some((_, pending)) = self.pending.remove(&correlation_id) {
                let _ = pending.sender.send(Err(connection.closed_error()));
            }
        }
        self.event_handlers.retain(|_, registered| registered.connection != id);
    }

    /// Fails every pending invocation with `ClientNotActive` and rejects
    /// new ones.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(limiter) = &self.limiter {
            limiter.close();
        }

        let waiting: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for correlation_id in waiting {
            if let Some((_, pending)) = self.pending.remove(&correlation_id) {
                let _ = pending.sender.send(Err(Self::not_active()));
            }
        }
        self.event_handlers.clear();
    }
}

impl MessageHandler for InvocationService {
    fn handle_message(&self, connection: &Arc<Connection>, message: ClientMessage) {
        let Some(correlation_id) = message.correlation_id() else {
            tracing::warn!(connection = %connection.id(), "dropping message without header");
            return;
        };

        if message.is_event() {
            let handler = self
                .event_handlers
                .get(&correlation_id)
                .map(|registered| Arc::clone(&registered.handler));
            match handler {
                Some(handler) => handler(message),
                None => tracing::trace!(
                    correlation_id,
                    message_type = ?message.message_type(),
                    "event for unknown registration"
                ),
            }
            return;
        }

        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            tracing::debug!(correlation_id, connection = %connection.id(), "response for unknown invocation");
            return;
        };

        let result = if message.is_exception() {
            Err(ErrorsCodec::decode(&message).map_or_else(|e| e, GridError::Remote))
        } else {
            Ok(message)
        };
        let _ = pending.sender.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, Weak};

    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    use memgrid_core::protocol::{ClientMessageCodec, CLIENT_PING, CLIENT_PING_RESPONSE};
    use memgrid_core::RemoteError;

    use crate::cluster::{ClientInfo, ClusterService};
    use crate::config::{ClientPropertiesBuilder, ReconnectMode};
    use crate::connection::{
        Address, ClientState, ConnectionOptions, RoundRobinLoadBalancer,
    };

    type Peer = Framed<DuplexStream, ClientMessageCodec>;

    struct Harness {
        service: Arc<InvocationService>,
        registry: Arc<ConnectionRegistry>,
        partitions: Arc<PartitionService>,
    }

    fn harness(properties: ClientProperties) -> Harness {
        let cluster = Arc::new(ClusterService::new(ClientInfo::new(
            Uuid::new_v4(),
            "test".to_string(),
            Vec::new(),
        )));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(RoundRobinLoadBalancer::new()),
            cluster,
            true,
            false,
            ReconnectMode::On,
        ));
        registry.set_state(ClientState::InitializedOnCluster);
        let partitions = Arc::new(PartitionService::new());
        let lifecycle = Arc::new(LifecycleService::new());
        lifecycle.start();
        let service = Arc::new(InvocationService::new(
            Arc::clone(&registry),
            Arc::clone(&partitions),
            lifecycle,
            &properties,
        ));
        Harness {
            service,
            registry,
            partitions,
        }
    }

    fn properties() -> ClientProperties {
        ClientPropertiesBuilder::new()
            .invocation_retry_pause(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    impl Harness {
        fn connect(&self, member_uuid: Uuid, port: u16) -> (Arc<Connection>, Peer) {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let weak: Weak<InvocationService> = Arc::downgrade(&self.service);
            let connection = Connection::start(
                client,
                Address::new("127.0.0.1", port),
                None,
                ConnectionOptions { write_threshold: 0 },
                Arc::clone(&self.service) as Arc<dyn MessageHandler>,
                Arc::new(move |connection: &Arc<Connection>| {
                    if let Some(service) = weak.upgrade() {
                        service.on_connection_closed(connection);
                    }
                }),
            );
            connection.set_authenticated(member_uuid, None, "5.3.0".to_string());
            self.registry.add_connection(member_uuid, Arc::clone(&connection));
            (connection, Framed::new(server, ClientMessageCodec::new()))
        }
    }

    fn ping() -> ClientMessage {
        ClientMessage::create_for_encode_any_partition(CLIENT_PING)
    }

    fn response_to(request: &ClientMessage) -> ClientMessage {
        ClientMessage::create_for_response(CLIENT_PING_RESPONSE, request.correlation_id().unwrap())
    }

    fn retryable_error(request: &ClientMessage) -> ClientMessage {
        ErrorsCodec::encode(
            request.correlation_id().unwrap(),
            &[RemoteError::new(
                46,
                "memgrid.spi.RetryableException",
                None,
            )],
        )
    }

    #[tokio::test]
    async fn test_concurrent_invocations_get_unique_correlation_ids() {
        let h = harness(properties());
        let (_connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Some(Ok(request)) = peer.next().await {
                recorded.lock().unwrap().push(request.correlation_id().unwrap());
                peer.send(response_to(&request)).await.unwrap();
            }
        });

        let calls: Vec<_> = (0..64)
            .map(|_| {
                let service = Arc::clone(&h.service);
                tokio::spawn(async move { service.invoke_on_random_target(ping()).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        let mut ids = seen.lock().unwrap().clone();
        assert_eq!(ids.len(), 64);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 64);
        assert_eq!(h.service.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried_with_new_correlation_id() {
        let h = harness(properties());
        let (_connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        let member = tokio::spawn(async move {
            let first = peer.next().await.unwrap().unwrap();
            peer.send(retryable_error(&first)).await.unwrap();
            let second = peer.next().await.unwrap().unwrap();
            peer.send(response_to(&second)).await.unwrap();
            (first.correlation_id(), second.correlation_id())
        });

        let response = h.service.invoke_on_random_target(ping()).await.unwrap();
        assert_eq!(response.message_type(), Some(CLIENT_PING_RESPONSE));

        let (first, second) = member.await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_retryable_error_past_deadline_times_out() {
        let h = harness(
            ClientPropertiesBuilder::new()
                .invocation_timeout(Duration::ZERO)
                .build()
                .unwrap(),
        );
        let (_connection, mut peer) = h.connect(Uuid::new_v4(), 5701);
        tokio::spawn(async move {
            while let Some(Ok(request)) = peer.next().await {
                peer.send(retryable_error(&request)).await.unwrap();
            }
        });

        match h.service.invoke_on_random_target(ping()).await {
            Err(GridError::OperationTimeout { cause, .. }) => {
                assert!(matches!(*cause, GridError::Remote(ref e) if e.error_code == 46));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_bound_invocation_is_not_retried() {
        let h = harness(properties());
        let (connection, mut peer) = h.connect(Uuid::new_v4(), 5701);
        tokio::spawn(async move {
            while let Some(Ok(request)) = peer.next().await {
                peer.send(retryable_error(&request)).await.unwrap();
            }
        });

        let result = h.service.invoke_on_connection(ping(), connection).await;
        assert!(matches!(result, Err(GridError::Remote(_))));
    }

    #[tokio::test]
    async fn test_non_retryable_remote_error_is_returned() {
        let h = harness(properties());
        let (_connection, mut peer) = h.connect(Uuid::new_v4(), 5701);
        tokio::spawn(async move {
            let request = peer.next().await.unwrap().unwrap();
            let error = ErrorsCodec::encode(
                request.correlation_id().unwrap(),
                &[RemoteError::new(2, "java.lang.IllegalArgumentException", Some("bad".into()))],
            );
            peer.send(error).await.unwrap();
        });

        match h.service.invoke_on_random_target(ping()).await {
            Err(GridError::Remote(error)) => {
                assert_eq!(error.class_name, "java.lang.IllegalArgumentException");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_connection_fails_pending_invocation() {
        let h = harness(properties());
        let (connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        let service = Arc::clone(&h.service);
        let call = tokio::spawn(async move { service.invoke_on_connection(ping(), connection).await });
        peer.next().await.unwrap().unwrap();
        drop(peer);

        assert!(matches!(
            call.await.unwrap(),
            Err(GridError::TargetDisconnected(_))
        ));
        assert_eq!(h.service.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_and_new_invocations() {
        let h = harness(properties());
        let (_connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        let service = Arc::clone(&h.service);
        let call = tokio::spawn(async move { service.invoke_on_random_target(ping()).await });
        peer.next().await.unwrap().unwrap();

        h.service.shutdown();
        assert!(matches!(
            call.await.unwrap(),
            Err(GridError::ClientNotActive(_))
        ));
        assert!(matches!(
            h.service.invoke_on_random_target(ping()).await,
            Err(GridError::ClientNotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_events_reach_handler_after_response() {
        let h = harness(properties());
        let (connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let invocation = Invocation::new(ping(), InvocationTarget::Connection(connection))
            .with_event_handler(Arc::new(move |message: ClientMessage| {
                let _ = events_tx.send(message.message_type());
            }))
            .urgent();

        let member = tokio::spawn(async move {
            let request = peer.next().await.unwrap().unwrap();
            let correlation_id = request.correlation_id().unwrap();
            peer.send(response_to(&request)).await.unwrap();
            for _ in 0..2 {
                peer.send(ClientMessage::create_for_event(0x000302, correlation_id))
                    .await
                    .unwrap();
            }
            peer
        });

        let response = h.service.invoke(invocation).await.unwrap();
        let _peer = member.await.unwrap();
        assert_eq!(events_rx.recv().await, Some(Some(0x000302)));
        assert_eq!(events_rx.recv().await, Some(Some(0x000302)));

        assert!(h
            .service
            .remove_event_handler(response.correlation_id().unwrap()));
    }

    #[tokio::test]
    async fn test_abandoned_invocations_leave_no_entries() {
        let h = harness(properties());
        let (connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        for _ in 0..100 {
            let call = h.service.invoke_on_random_target(ping());
            assert!(tokio::time::timeout(Duration::from_millis(1), call)
                .await
                .is_err());
        }
        assert_eq!(h.service.pending_count(), 0);

        let registration = Invocation::new(ping(), InvocationTarget::Connection(connection))
            .with_event_handler(Arc::new(|_: ClientMessage| {}))
            .urgent();
        let call = h.service.invoke(registration);
        let (result, request) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(50), call),
            async {
                let mut last = None;
                while let Ok(Some(Ok(request))) =
                    tokio::time::timeout(Duration::from_millis(20), peer.next()).await
                {
                    last = Some(request);
                }
                last
            }
        );
        assert!(result.is_err());
        let correlation_id = request.unwrap().correlation_id().unwrap();
        assert_eq!(h.service.pending_count(), 0);
        assert!(!h.service.remove_event_handler(correlation_id));
    }

    #[tokio::test]
    async fn test_partition_invocation_goes_to_owner() {
        let h = harness(properties());
        let owner = Uuid::new_v4();
        let (other_connection, mut other_peer) = h.connect(Uuid::new_v4(), 5701);
        let (_owner_connection, mut owner_peer) = h.connect(owner, 5702);
        h.partitions
            .handle_partitions_view_event(other_connection.id(), 1, vec![(owner, vec![7])]);

        let member = tokio::spawn(async move {
            let request = owner_peer.next().await.unwrap().unwrap();
            owner_peer.send(response_to(&request)).await.unwrap();
            request.partition_id()
        });

        h.service.invoke_on_partition(ping(), 7).await.unwrap();
        assert_eq!(member.await.unwrap(), Some(7));

        let nothing =
            tokio::time::timeout(Duration::from_millis(50), other_peer.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_concurrency_limit_waits_for_permit() {
        let h = harness(
            ClientPropertiesBuilder::new()
                .max_concurrent_invocations(1)
                .build()
                .unwrap(),
        );
        let (_connection, mut peer) = h.connect(Uuid::new_v4(), 5701);

        let service = Arc::clone(&h.service);
        let first = tokio::spawn(async move { service.invoke_on_random_target(ping()).await });
        let request = peer.next().await.unwrap().unwrap();

        let service = Arc::clone(&h.service);
        let _second = tokio::spawn(async move { service.invoke_on_random_target(ping()).await });
        let blocked = tokio::time::timeout(Duration::from_millis(50), peer.next()).await;
        assert!(blocked.is_err());

        peer.send(response_to(&request)).await.unwrap();
        first.await.unwrap().unwrap();
        assert!(peer.next().await.is_some());
    }
}
