//! ClientMessage type for multi-frame protocol messages.

use bytes::{BufMut, BytesMut};

use super::constants::*;
use super::frame::Frame;

/// A client message composed of one or more frames.
///
/// The first frame is the "initial frame" containing the message header
/// (type, correlation ID, partition ID for requests). Additional frames
/// contain the message payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientMessage {
    frames: Vec<Frame>,
    retryable: bool,
}

impl ClientMessage {
    /// Creates a new empty client message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request message with the given type and partition ID.
    ///
    /// The correlation ID is left at zero; it is assigned when the message
    /// is sent.
    pub fn create_for_encode(message_type: i32, partition_id: i32) -> Self {
        let mut initial_frame = Frame::with_capacity(REQUEST_HEADER_SIZE, UNFRAGMENTED_MESSAGE);
        initial_frame.content.put_i32_le(message_type);
        initial_frame.content.put_i64_le(0);
        initial_frame.content.put_i32_le(partition_id);

        Self::from_frames(vec![initial_frame])
    }

    /// Creates a request message targeting any partition.
    pub fn create_for_encode_any_partition(message_type: i32) -> Self {
        Self::create_for_encode(message_type, PARTITION_ID_ANY)
    }

    /// Creates a response message header with zero backup acks.
    pub fn create_for_response(message_type: i32, correlation_id: i64) -> Self {
        let mut initial_frame = Frame::with_capacity(RESPONSE_HEADER_SIZE, UNFRAGMENTED_MESSAGE);
        initial_frame.content.put_i32_le(message_type);
        initial_frame.content.put_i64_le(correlation_id);
        initial_frame.content.put_u8(0);

        Self::from_frames(vec![initial_frame])
    }

    /// Creates an event message header.
    pub fn create_for_event(message_type: i32, correlation_id: i64) -> Self {
        let mut initial_frame =
            Frame::with_capacity(EVENT_HEADER_SIZE, UNFRAGMENTED_MESSAGE | IS_EVENT_FLAG);
        initial_frame.content.put_i32_le(message_type);
        initial_frame.content.put_i64_le(correlation_id);
        initial_frame.content.put_i32_le(PARTITION_ID_ANY);

        Self::from_frames(vec![initial_frame])
    }

    /// Creates a client message from received frames.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            retryable: false,
        }
    }

    /// Returns the message type from the initial frame.
    ///
    /// Returns `None` if there is no initial frame or if the frame content
    /// is too short to contain a message type field.
    pub fn message_type(&self) -> Option<i32> {
        self.read_header(TYPE_FIELD_OFFSET)
            .map(|b: [u8; 4]| i32::from_le_bytes(b))
    }

    /// Returns the correlation ID from the initial frame.
    pub fn correlation_id(&self) -> Option<i64> {
        self.read_header(CORRELATION_ID_OFFSET)
            .map(|b: [u8; 8]| i64::from_le_bytes(b))
    }

    /// Sets the correlation ID in the initial frame.
    ///
    /// No-op when the initial frame is too short to hold the field.
    pub fn set_correlation_id(&mut self, correlation_id: i64) {
        self.write_header(CORRELATION_ID_OFFSET, &correlation_id.to_le_bytes());
    }

    /// Returns the partition ID from the initial frame (for requests).
    pub fn partition_id(&self) -> Option<i32> {
        self.read_header(PARTITION_ID_OFFSET)
            .map(|b: [u8; 4]| i32::from_le_bytes(b))
    }

    /// Sets the partition ID in the initial frame.
    pub fn set_partition_id(&mut self, partition_id: i32) {
        self.write_header(PARTITION_ID_OFFSET, &partition_id.to_le_bytes());
    }

    /// Number of backup acknowledgements the member expects (responses only).
    pub fn backup_acks(&self) -> Option<u8> {
        self.read_header(RESPONSE_BACKUP_ACKS_OFFSET)
            .map(|b: [u8; 1]| b[0])
    }

    fn read_header<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let frame = self.frames.first()?;
        let bytes = frame.content.get(offset..offset + N)?;
        bytes.try_into().ok()
    }

    fn write_header(&mut self, offset: usize, bytes: &[u8]) {
        if let Some(frame) = self.frames.first_mut() {
            if let Some(slot) = frame.content.get_mut(offset..offset + bytes.len()) {
                slot.copy_from_slice(bytes);
            }
        }
    }

    /// Marks whether the request is safe to resend after its connection closed.
    pub fn set_retryable(&mut self, retryable: bool) {
        self.retryable = retryable;
    }

    /// Returns `true` if the request is safe to resend after its connection closed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Adds a frame to the message.
    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Returns a reference to the initial (first) frame, if present.
    pub fn initial_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Returns a mutable reference to the initial frame, if present.
    pub fn initial_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.first_mut()
    }

    /// Returns a reference to all frames.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Returns a mutable reference to all frames.
    pub fn frames_mut(&mut self) -> &mut Vec<Frame> {
        &mut self.frames
    }

    /// Returns a forward iterator over the frames, used by decoders.
    pub fn frame_iter(&self) -> FrameIter<'_> {
        FrameIter {
            frames: &self.frames,
            position: 0,
        }
    }

    /// Returns the number of frames in the message.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the message has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Calculates the total size of the message on the wire.
    pub fn wire_size(&self) -> usize {
        self.frames.iter().map(Frame::wire_size).sum()
    }

    /// Writes all frames to the destination buffer.
    ///
    /// The last frame goes out with the FINAL flag set.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        let last = self.frames.len().saturating_sub(1);
        for (index, frame) in self.frames.iter().enumerate() {
            if index == last {
                frame.write_with_flags(dst, frame.flags | IS_FINAL_FLAG);
            } else {
                frame.write_to(dst);
            }
        }
    }

    /// Returns true if this message is flagged as an event.
    pub fn is_event(&self) -> bool {
        self.frames.first().is_some_and(Frame::is_event_frame)
    }

    /// Returns true if this message is a backup acknowledgement event.
    pub fn is_backup_event(&self) -> bool {
        self.frames.first().is_some_and(Frame::is_backup_event_frame)
    }

    /// Returns true if this message is an exception response.
    pub fn is_exception(&self) -> bool {
        self.message_type() == Some(EXCEPTION_MESSAGE_TYPE)
    }

    /// Returns true if the message was sent in a single fragment.
    pub fn is_unfragmented(&self) -> bool {
        self.frames.first().is_some_and(Frame::is_unfragmented)
    }

    /// Reads the fragmentation id carried by the first frame of a fragment.
    pub fn fragmentation_id(&self) -> Option<i64> {
        self.read_header(FRAGMENTATION_ID_OFFSET)
            .map(|b: [u8; 8]| i64::from_le_bytes(b))
    }

    /// Removes the leading fragmentation frame of a fragment.
    pub fn drop_fragmentation_frame(&mut self) {
        if !self.frames.is_empty() {
            self.frames.remove(0);
        }
    }

    /// Appends the payload frames of a later fragment (its fragmentation
    /// frame already dropped) to this partially assembled message.
    pub fn merge(&mut self, fragment: ClientMessage) {
        if let Some(last) = self.frames.last_mut() {
            last.flags &= !IS_FINAL_FLAG;
        }
        self.frames.extend(fragment.frames);
    }

    /// Splits the message into wire fragments no larger than
    /// `max_frame_size` bytes each (a single oversized frame becomes its own
    /// fragment). Messages that already fit are returned unchanged.
    ///
    /// Every fragment starts with a frame carrying `fragmentation_id`; the
    /// first fragment is flagged BEGIN_FRAGMENT and the last END_FRAGMENT.
    pub fn split_into_fragments(&self, max_frame_size: usize, fragmentation_id: i64) -> Vec<ClientMessage> {
        if self.wire_size() <= max_frame_size {
            return vec![self.clone()];
        }

        let header_size = FRAME_HEADER_SIZE + LONG_SIZE;
        let mut fragments = Vec::new();
        let mut current: Option<ClientMessage> = None;
        let mut length = header_size;

        for frame in &self.frames {
            let size = frame.wire_size();
            if current.is_some() && length + size > max_frame_size {
                fragments.extend(current.take());
                length = header_size;
            }
            current
                .get_or_insert_with(|| Self::fragment_start(fragmentation_id))
                .add_frame(frame.clone());
            length += size;
        }
        fragments.extend(current);

        if fragments.len() < 2 {
            return vec![self.clone()];
        }
        if let Some(first) = fragments.first_mut().and_then(ClientMessage::initial_frame_mut) {
            first.flags |= BEGIN_FRAGMENT_FLAG;
        }
        if let Some(last) = fragments.last_mut().and_then(ClientMessage::initial_frame_mut) {
            last.flags |= END_FRAGMENT_FLAG;
        }
        fragments
    }

    fn fragment_start(fragmentation_id: i64) -> ClientMessage {
        let mut frame = Frame::with_capacity(LONG_SIZE, DEFAULT_FLAGS);
        frame.content.put_i64_le(fragmentation_id);
        ClientMessage::from_frames(vec![frame])
    }
}

/// Forward-only cursor over the frames of a message.
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    frames: &'a [Frame],
    position: usize,
}

impl<'a> FrameIter<'a> {
    /// Returns the next frame without consuming it.
    pub fn peek(&self) -> Option<&'a Frame> {
        self.frames.get(self.position)
    }

    /// Returns true if frames remain.
    pub fn has_next(&self) -> bool {
        self.position < self.frames.len()
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frames.get(self.position)?;
        self.position += 1;
        Some(frame)
    }
}

/// Computes a partition hash for the given key data.
///
/// Murmur3 x86 32-bit with the seed used by cluster members.
pub fn compute_partition_hash(key: &[u8]) -> i32 {
    murmur_hash3_x86_32(key, 0x01000193)
}

fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mix = |k1: u32| k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 ^= mix(k1);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, byte)| acc ^ ((*byte as u32) << (8 * i)));
        h1 ^= mix(k1);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}
