//! Cluster view listener registration and its member/partition events.

use bytes::BufMut;
use uuid::Uuid;

use memgrid_core::protocol::builtin::{
    fixed, next_frame, EntryListUuidListIntegerCodec, ListMultiFrameCodec,
};
use memgrid_core::protocol::{
    ClientMessage, CLIENT_ADD_CLUSTER_VIEW_LISTENER, CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE,
    CLIENT_MEMBERS_VIEW_EVENT, CLIENT_PARTITIONS_VIEW_EVENT, EVENT_HEADER_SIZE,
};
use memgrid_core::{GridError, Result};

use super::custom::MemberInfoCodec;
use crate::listener::Member;

const EVENT_VERSION_OFFSET: usize = EVENT_HEADER_SIZE;

/// An event pushed to the cluster view listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterViewEvent {
    /// The full member list.
    Members {
        /// Member list version.
        version: i32,
        /// Every member of the cluster.
        members: Vec<Member>,
    },
    /// The full partition owner table.
    Partitions {
        /// Partition table version.
        version: i32,
        /// Owner UUID with the partitions it owns.
        partitions: Vec<(Uuid, Vec<i32>)>,
    },
}

/// Codec for the cluster view listener.
pub struct ClientAddClusterViewListenerCodec;

impl ClientAddClusterViewListenerCodec {
    /// Encodes the listener registration.
    pub fn encode_request() -> ClientMessage {
        ClientMessage::create_for_encode_any_partition(CLIENT_ADD_CLUSTER_VIEW_LISTENER)
    }

    /// Encodes the registration acknowledgement.
    pub fn encode_response(correlation_id: i64) -> ClientMessage {
        ClientMessage::create_for_response(CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE, correlation_id)
    }

    /// Encodes a members view event for the registration `correlation_id`.
    pub fn encode_members_view_event(
        correlation_id: i64,
        version: i32,
        members: &[Member],
    ) -> ClientMessage {
        let mut message = ClientMessage::create_for_event(CLIENT_MEMBERS_VIEW_EVENT, correlation_id);
        if let Some(initial) = message.initial_frame_mut() {
            initial.content.put_i32_le(version);
        }
        ListMultiFrameCodec::encode(&mut message, members, MemberInfoCodec::encode);
        message
    }

    /// Encodes a partitions view event for the registration `correlation_id`.
    pub fn encode_partitions_view_event(
        correlation_id: i64,
        version: i32,
        partitions: &[(Uuid, Vec<i32>)],
    ) -> ClientMessage {
        let mut message =
            ClientMessage::create_for_event(CLIENT_PARTITIONS_VIEW_EVENT, correlation_id);
        if let Some(initial) = message.initial_frame_mut() {
            initial.content.put_i32_le(version);
        }
        EntryListUuidListIntegerCodec::encode(&mut message, partitions);
        message
    }

    /// Decodes an event message. Returns `None` for event types this
    /// listener does not handle.
    pub fn decode_event(message: &ClientMessage) -> Result<Option<ClusterViewEvent>> {
        let message_type = message.message_type();
        if message_type != Some(CLIENT_MEMBERS_VIEW_EVENT)
            && message_type != Some(CLIENT_PARTITIONS_VIEW_EVENT)
        {
            return Ok(None);
        }

        let mut iter = message.frame_iter();
        let initial = next_frame(&mut iter, "cluster view event")?;
        let version = fixed::read_i32(&initial.content, EVENT_VERSION_OFFSET)?;

        let event = if message_type == Some(CLIENT_MEMBERS_VIEW_EVENT) {
            ClusterViewEvent::Members {
                version,
                members: ListMultiFrameCodec::decode(&mut iter, MemberInfoCodec::decode)?,
            }
        } else {
            ClusterViewEvent::Partitions {
                version,
                partitions: EntryListUuidListIntegerCodec::decode(&mut iter)?,
            }
        };
        if iter.has_next() {
            return Err(GridError::Protocol(
                "trailing frames after cluster view event".to_string(),
            ));
        }
        Ok(Some(event))
    }
}
