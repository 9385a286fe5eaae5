//! Cluster membership view.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::listener::{Member, MemberEvent};

/// Member list version before the first members view event arrives.
pub const INITIAL_MEMBER_LIST_VERSION: i32 = -1;

const MEMBER_EVENT_CAPACITY: usize = 64;

/// Information about the local client instance.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    uuid: Uuid,
    name: String,
    labels: Vec<String>,
}

impl ClientInfo {
    /// Creates a new client info instance.
    pub fn new(uuid: Uuid, name: String, labels: Vec<String>) -> Self {
        Self { uuid, name, labels }
    }

    /// Returns the unique identifier of this client instance.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the name of this client instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the labels associated with this client.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl std::fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientInfo[uuid={}, name={}]", self.uuid, self.name)
    }
}

#[derive(Debug)]
struct MemberListSnapshot {
    version: i32,
    members: Vec<Member>,
}

/// Holds the member list pushed by the cluster.
///
/// The list is replaced wholesale by members view events carrying a newer
/// version; members are never edited in place. Joins and departures are
/// published to subscribers as [`MemberEvent`]s.
#[derive(Debug)]
pub struct ClusterService {
    client: ClientInfo,
    snapshot: RwLock<MemberListSnapshot>,
    events: broadcast::Sender<MemberEvent>,
    initial_list: watch::Sender<bool>,
}

impl ClusterService {
    /// Creates a service with an empty member list.
    pub fn new(client: ClientInfo) -> Self {
        let (events, _) = broadcast::channel(MEMBER_EVENT_CAPACITY);
        let (initial_list, _) = watch::channel(false);
        Self {
            client,
            snapshot: RwLock::new(MemberListSnapshot {
                version: INITIAL_MEMBER_LIST_VERSION,
                members: Vec::new(),
            }),
            events,
            initial_list,
        }
    }

    /// Returns information about the local client instance.
    pub fn local_client(&self) -> &ClientInfo {
        &self.client
    }

    /// Returns the current member list.
    pub fn members(&self) -> Vec<Member> {
        self.read().members.clone()
    }

    /// Returns the member with `uuid`, if known.
    pub fn member(&self, uuid: &Uuid) -> Option<Member> {
        self.read().members.iter().find(|m| m.uuid() == *uuid).cloned()
    }

    /// Returns the number of known members.
    pub fn member_count(&self) -> usize {
        self.read().members.len()
    }

    /// Returns the version of the current member list.
    pub fn member_list_version(&self) -> i32 {
        self.read().version
    }

    /// Subscribes to member added/removed events.
    pub fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.events.subscribe()
    }

    /// Applies a members view event.
    ///
    /// The view is replaced only when `version` is newer than the current
    /// one. Returns the members that left, so their connections can be
    /// closed.
    pub fn handle_members_view_event(&self, version: i32, members: Vec<Member>) -> Vec<Member> {
        let (removed, added) = {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            if version <= snapshot.version {
                tracing::debug!(
                    version,
                    current = snapshot.version,
                    "ignoring stale members view"
                );
                return Vec::new();
            }

            let new_uuids: HashSet<Uuid> = members.iter().map(Member::uuid).collect();
            let old_uuids: HashSet<Uuid> = snapshot.members.iter().map(Member::uuid).collect();
            let removed: Vec<Member> = snapshot
                .members
                .iter()
                .filter(|m| !new_uuids.contains(&m.uuid()))
                .cloned()
                .collect();
            let added: Vec<Member> = members
                .iter()
                .filter(|m| !old_uuids.contains(&m.uuid()))
                .cloned()
                .collect();

            snapshot.version = version;
            snapshot.members = members;
            (removed, added)
        };

        tracing::info!(
            version,
            added = added.len(),
            removed = removed.len(),
            members = self.member_count(),
            "members view updated"
        );
        for member in &removed {
            let _ = self.events.send(MemberEvent::member_removed(member.clone()));
        }
        for member in added {
            let _ = self.events.send(MemberEvent::member_added(member));
        }
        self.initial_list.send_replace(true);
        removed
    }

    /// Waits until the first member list has arrived.
    ///
    /// Gives up after `timeout` with a warning; invocations can still
    /// proceed over the connections that exist.
    pub async fn wait_initial_member_list(&self, timeout: Duration) {
        let mut receiver = self.initial_list.subscribe();
        let arrived = tokio::time::timeout(timeout, receiver.wait_for(|received| *received)).await;
        if arrived.is_err() {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "initial member list not received in time"
            );
        }
    }

    /// Prepares for a new cluster: the next members view replaces the
    /// current one whatever its version.
    ///
    /// The old members stay visible until then so that the next event
    /// reports them as removed.
    pub fn reset(&self) {
        self.snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .version = INITIAL_MEMBER_LIST_VERSION;
        self.initial_list.send_replace(false);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemberListSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }
}
