//! Heartbeat ping.

use memgrid_core::protocol::{ClientMessage, CLIENT_PING, CLIENT_PING_RESPONSE};

/// Codec for the ping message; both directions carry only a header.
pub struct ClientPingCodec;

impl ClientPingCodec {
    /// Encodes a ping request.
    pub fn encode_request() -> ClientMessage {
        let mut message = ClientMessage::create_for_encode_any_partition(CLIENT_PING);
        message.set_retryable(true);
        message
    }

    /// Encodes the response to the ping with `correlation_id`.
    pub fn encode_response(correlation_id: i64) -> ClientMessage {
        ClientMessage::create_for_response(CLIENT_PING_RESPONSE, correlation_id)
    }
}
