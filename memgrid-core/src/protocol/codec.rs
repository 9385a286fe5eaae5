//! Codec implementation for encoding/decoding client messages on a byte stream.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::frame::Frame;
use super::ClientMessage;
use crate::error::{GridError, Result};

/// Reassembles fragmented messages keyed by fragmentation id.
#[derive(Debug, Default)]
pub struct FragmentedMessageHandler {
    fragmented_messages: HashMap<i64, ClientMessage>,
}

impl FragmentedMessageHandler {
    /// Creates an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment; returns the assembled message once its last
    /// fragment arrives. Continuations without a begin are dropped.
    pub fn handle_fragment(&mut self, mut fragment: ClientMessage) -> Option<ClientMessage> {
        let (is_begin, is_end) = match fragment.initial_frame() {
            Some(frame) => (frame.is_begin_fragment(), frame.is_end_fragment()),
            None => return None,
        };
        let fragmentation_id = fragment.fragmentation_id()?;
        fragment.drop_fragmentation_frame();

        if is_begin {
            self.fragmented_messages.insert(fragmentation_id, fragment);
            return None;
        }

        let Some(existing) = self.fragmented_messages.get_mut(&fragmentation_id) else {
            debug!(
                fragmentation_id,
                "dropping fragment received without its begin part"
            );
            return None;
        };
        existing.merge(fragment);

        if is_end {
            self.fragmented_messages.remove(&fragmentation_id)
        } else {
            None
        }
    }

    /// Number of messages currently being assembled.
    pub fn pending(&self) -> usize {
        self.fragmented_messages.len()
    }
}

/// Codec for encoding and decoding client messages.
///
/// Decoding accumulates frames across arbitrary chunk boundaries until a
/// frame flagged FINAL completes a message, then reassembles fragments
/// before yielding. Implements the `tokio_util::codec::{Encoder, Decoder}`
/// traits for use with tokio's framed I/O.
#[derive(Debug, Default)]
pub struct ClientMessageCodec {
    pending_frames: Vec<Frame>,
    fragments: FragmentedMessageHandler,
}

impl ClientMessageCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_message(&mut self, src: &mut BytesMut) -> Result<Option<ClientMessage>> {
        while let Some(frame) = Frame::read_from(src)? {
            let is_final = frame.is_final_frame();
            self.pending_frames.push(frame);
            if is_final {
                let frames = std::mem::take(&mut self.pending_frames);
                return Ok(Some(ClientMessage::from_frames(frames)));
            }
        }
        Ok(None)
    }
}

impl Encoder<ClientMessage> for ClientMessageCodec {
    type Error = GridError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<()> {
        if item.is_empty() {
            return Err(GridError::Protocol(
                "cannot encode empty message".to_string(),
            ));
        }

        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for ClientMessageCodec {
    type Item = ClientMessage;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(message) = self.read_message(src)? {
            if message.is_unfragmented() {
                return Ok(Some(message));
            }
            if let Some(assembled) = self.fragments.handle_fragment(message) {
                return Ok(Some(assembled));
            }
        }
        Ok(None)
    }
}
