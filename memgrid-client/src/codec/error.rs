//! Exception responses.

use memgrid_core::protocol::builtin::{next_frame, ListMultiFrameCodec};
use memgrid_core::protocol::{ClientMessage, EXCEPTION_MESSAGE_TYPE};
use memgrid_core::{GridError, RemoteError, Result};

use super::custom::ErrorHolderCodec;

/// Codec for exception responses: the error and its causes, outermost first.
pub struct ErrorsCodec;

impl ErrorsCodec {
    /// Encodes an exception response carrying `errors`.
    pub fn encode(correlation_id: i64, errors: &[RemoteError]) -> ClientMessage {
        let mut message = ClientMessage::create_for_response(EXCEPTION_MESSAGE_TYPE, correlation_id);
        ListMultiFrameCodec::encode(&mut message, errors, ErrorHolderCodec::encode);
        message
    }

    /// Decodes the outermost error of an exception response.
    pub fn decode(message: &ClientMessage) -> Result<RemoteError> {
        let mut iter = message.frame_iter();
        next_frame(&mut iter, "exception response")?;
        ListMultiFrameCodec::decode(&mut iter, ErrorHolderCodec::decode)?
            .into_iter()
            .next()
            .ok_or_else(|| GridError::Protocol("exception response without errors".to_string()))
    }
}
