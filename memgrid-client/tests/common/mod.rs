//! A scripted cluster member for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use memgrid_client::codec::{
    AuthenticationResponse, AuthenticationStatus, ClientAddClusterViewListenerCodec,
    ClientAuthenticationCodec, ClientPingCodec, ErrorsCodec,
};
use memgrid_client::{Address, ClientConfig, ClientConfigBuilder, Member};
use memgrid_core::protocol::{
    ClientMessageCodec, CLIENT_ADD_CLUSTER_VIEW_LISTENER, CLIENT_AUTHENTICATION,
    CLIENT_AUTHENTICATION_CUSTOM, CLIENT_PING, CLIENT_PROTOCOL_PREAMBLE,
};
use memgrid_core::{ClientMessage, RemoteError};

pub const PARTITION_COUNT: i32 = 271;

/// Error code the client treats as retryable.
pub const RETRYABLE_ERROR_CODE: i32 = 8;

/// How the member answers.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub cluster_id: Uuid,
    pub partition_count: i32,
    pub auth_status: AuthenticationStatus,
    pub auth_delay: Duration,
    /// Number of data requests answered with a retryable error before the
    /// member starts answering them normally.
    pub fail_first: usize,
    /// Data requests are never answered.
    pub silent: bool,
    /// Member uuid to report instead of a fresh one.
    pub member_uuid: Option<Uuid>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            cluster_id: Uuid::new_v4(),
            partition_count: PARTITION_COUNT,
            auth_status: AuthenticationStatus::Authenticated,
            auth_delay: Duration::ZERO,
            fail_first: 0,
            silent: false,
            member_uuid: None,
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    accepted: AtomicUsize,
    data_requests: Mutex<Vec<i64>>,
}

/// A member listening on an ephemeral localhost port.
#[derive(Debug)]
pub struct MockMember {
    address: SocketAddr,
    uuid: Uuid,
    behavior: Behavior,
    stats: Arc<Stats>,
    stop: CancellationToken,
    connections: Arc<Mutex<CancellationToken>>,
}

impl MockMember {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let member = Self {
            address,
            uuid: behavior.member_uuid.unwrap_or_else(Uuid::new_v4),
            behavior,
            stats: Arc::new(Stats::default()),
            stop: CancellationToken::new(),
            connections: Arc::new(Mutex::new(CancellationToken::new())),
        };

        let session = member.session();
        let stop = member.stop.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => return,
                    },
                };
                session.stats.accepted.fetch_add(1, Ordering::SeqCst);
                let session = session.clone();
                tokio::spawn(async move { session.serve(stream).await });
            }
        });
        member
    }

    fn session(&self) -> Session {
        Session {
            address: Address::new("127.0.0.1", self.address.port()),
            uuid: self.uuid,
            behavior: self.behavior.clone(),
            stats: Arc::clone(&self.stats),
            connections: Arc::clone(&self.connections),
        }
    }

    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn cluster_id(&self) -> Uuid {
        self.behavior.cluster_id
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    /// Correlation ids of the data requests received so far.
    pub fn data_requests(&self) -> Vec<i64> {
        self.stats.data_requests.lock().unwrap().clone()
    }

    /// Drops every open connection. New connections are still accepted.
    pub fn disconnect_all(&self) {
        let mut current = self.connections.lock().unwrap();
        current.cancel();
        *current = CancellationToken::new();
    }

    /// Stops listening and drops every open connection.
    pub fn stop(&self) {
        self.stop.cancel();
        self.disconnect_all();
    }
}

impl Drop for MockMember {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
struct Session {
    address: Address,
    uuid: Uuid,
    behavior: Behavior,
    stats: Arc<Stats>,
    connections: Arc<Mutex<CancellationToken>>,
}

impl Session {
    async fn serve(self, mut stream: TcpStream) {
        let closed = self.connections.lock().unwrap().clone();

        let mut preamble = [0u8; 3];
        if stream.read_exact(&mut preamble).await.is_err() {
            return;
        }
        assert_eq!(&preamble, CLIENT_PROTOCOL_PREAMBLE);

        let mut framed = Framed::new(stream, ClientMessageCodec::new());
        loop {
            let request = tokio::select! {
                _ = closed.cancelled() => return,
                next = framed.next() => match next {
                    Some(Ok(request)) => request,
                    _ => return,
                },
            };
            for response in self.answer(&request).await {
                if framed.send(response).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn answer(&self, request: &ClientMessage) -> Vec<ClientMessage> {
        let correlation_id = request.correlation_id().unwrap_or_default();
        match request.message_type() {
            Some(message_type)
                if message_type == CLIENT_AUTHENTICATION
                    || message_type == CLIENT_AUTHENTICATION_CUSTOM =>
            {
                tokio::time::sleep(self.behavior.auth_delay).await;
                let response = if self.behavior.auth_status == AuthenticationStatus::Authenticated {
                    AuthenticationResponse::authenticated(
                        self.address.clone(),
                        self.uuid,
                        self.behavior.cluster_id,
                        self.behavior.partition_count,
                    )
                } else {
                    AuthenticationResponse::rejected(self.behavior.auth_status)
                };
                vec![ClientAuthenticationCodec::encode_response(
                    &response,
                    correlation_id,
                    message_type == CLIENT_AUTHENTICATION_CUSTOM,
                )]
            }
            Some(CLIENT_PING) => vec![ClientPingCodec::encode_response(correlation_id)],
            Some(CLIENT_ADD_CLUSTER_VIEW_LISTENER) => {
                let member = Member::new(self.uuid, self.address.clone());
                let partitions: Vec<i32> = (0..self.behavior.partition_count).collect();
                vec![
                    ClientAddClusterViewListenerCodec::encode_response(correlation_id),
                    ClientAddClusterViewListenerCodec::encode_members_view_event(
                        correlation_id,
                        1,
                        &[member],
                    ),
                    ClientAddClusterViewListenerCodec::encode_partitions_view_event(
                        correlation_id,
                        1,
                        &[(self.uuid, partitions)],
                    ),
                ]
            }
            Some(message_type) => {
                let seen = {
                    let mut requests = self.stats.data_requests.lock().unwrap();
                    requests.push(correlation_id);
                    requests.len()
                };
                if self.behavior.silent {
                    return Vec::new();
                }
                if seen <= self.behavior.fail_first {
                    let error = RemoteError::new(
                        RETRYABLE_ERROR_CODE,
                        "CallerNotMemberException",
                        Some("not a member yet".to_string()),
                    );
                    return vec![ErrorsCodec::encode(correlation_id, &[error])];
                }
                vec![ClientMessage::create_for_response(message_type + 1, correlation_id)]
            }
            None => Vec::new(),
        }
    }
}

/// A configuration pointing at `members` with short timings for tests.
pub fn config_for(members: &[&MockMember]) -> ClientConfig {
    let addresses: Vec<String> = members.iter().map(|member| member.address()).collect();
    builder_for(&addresses, Duration::from_secs(2)).build().unwrap()
}

/// Short timings, addresses tried in the given order.
pub fn builder_for(addresses: &[String], cluster_connect_timeout: Duration) -> ClientConfigBuilder {
    let mut builder = ClientConfig::builder().cluster_name("dev");
    for address in addresses {
        builder = builder.add_address(address.clone());
    }
    builder
        .connection_strategy(|s| {
            s.retry(|r| {
                r.initial_backoff(Duration::from_millis(50))
                    .max_backoff(Duration::from_millis(200))
                    .cluster_connect_timeout(cluster_connect_timeout)
            })
        })
        .properties(|p| {
            p.invocation_timeout(Duration::from_secs(5))
                .invocation_retry_pause(Duration::from_millis(20))
                .shuffle_member_list(false)
        })
}

/// An address nothing listens on.
pub async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Waits up to five seconds for `check` to hold.
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within five seconds");
}
