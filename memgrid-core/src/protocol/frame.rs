//! Frame type for the client binary protocol.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::*;
use crate::error::{GridError, Result};

/// A single frame of a client message.
///
/// Each frame consists of:
/// - A 4-byte length field (little-endian) counting the whole frame
/// - A 2-byte flags field (little-endian)
/// - Variable-length content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame content (payload after flags).
    pub content: BytesMut,
    /// Frame flags indicating frame type and properties.
    pub flags: u16,
}

impl Frame {
    /// Creates a new frame with the given content and flags.
    pub fn new(content: BytesMut, flags: u16) -> Self {
        Self { content, flags }
    }

    /// Creates a new frame with content and default flags.
    pub fn with_content(content: BytesMut) -> Self {
        Self::new(content, DEFAULT_FLAGS)
    }

    /// Creates a new empty frame with the given flags.
    pub fn with_flags(flags: u16) -> Self {
        Self::new(BytesMut::new(), flags)
    }

    /// Creates a new frame with the given capacity and flags.
    pub fn with_capacity(capacity: usize, flags: u16) -> Self {
        Self::new(BytesMut::with_capacity(capacity), flags)
    }

    /// Creates a frame holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::with_content(BytesMut::from(data))
    }

    /// Opens a nested data structure.
    pub fn new_begin_frame() -> Self {
        Self::with_flags(BEGIN_DATA_STRUCTURE_FLAG)
    }

    /// Closes a nested data structure.
    pub fn new_end_frame() -> Self {
        Self::with_flags(END_DATA_STRUCTURE_FLAG)
    }

    /// Creates a null frame (represents a null value).
    pub fn new_null_frame() -> Self {
        Self::with_flags(IS_NULL_FLAG)
    }

    /// Returns true if this frame has the BEGIN_FRAGMENT flag set.
    pub fn is_begin_fragment(&self) -> bool {
        self.flags & BEGIN_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame has the END_FRAGMENT flag set.
    pub fn is_end_fragment(&self) -> bool {
        self.flags & END_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame carries both fragment flags.
    pub fn is_unfragmented(&self) -> bool {
        self.flags & UNFRAGMENTED_MESSAGE == UNFRAGMENTED_MESSAGE
    }

    /// Returns true if this frame opens a nested data structure.
    pub fn is_begin_frame(&self) -> bool {
        self.flags & BEGIN_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame closes a nested data structure.
    pub fn is_end_frame(&self) -> bool {
        self.flags & END_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame has the NULL flag set.
    pub fn is_null_frame(&self) -> bool {
        self.flags & IS_NULL_FLAG != 0
    }

    /// Returns true if this frame has the FINAL flag set.
    pub fn is_final_frame(&self) -> bool {
        self.flags & IS_FINAL_FLAG != 0
    }

    /// Returns true if this frame has the EVENT flag set.
    pub fn is_event_frame(&self) -> bool {
        self.flags & IS_EVENT_FLAG != 0
    }

    /// Returns true if this frame has the BACKUP_EVENT flag set.
    pub fn is_backup_event_frame(&self) -> bool {
        self.flags & BACKUP_EVENT_FLAG != 0
    }

    /// Returns the size of this frame on the wire.
    ///
    /// This is also the value written in the length field.
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.content.len()
    }

    /// Writes this frame to the given buffer using its own flags.
    pub fn write_to(&self, dst: &mut BytesMut) {
        self.write_with_flags(dst, self.flags);
    }

    /// Writes this frame with `flags` in place of the stored flags.
    pub fn write_with_flags(&self, dst: &mut BytesMut, flags: u16) {
        dst.reserve(self.wire_size());
        dst.put_u32_le(self.wire_size() as u32);
        dst.put_u16_le(flags);
        dst.put_slice(&self.content);
    }

    /// Reads a frame from the given buffer.
    ///
    /// Returns `Ok(None)` if there isn't enough data to read a complete
    /// frame; the buffer is left untouched in that case. A length field
    /// smaller than the frame header is a protocol error.
    pub fn read_from(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < SIZE_OF_FRAME_LENGTH_FIELD {
            return Ok(None);
        }

        let frame_length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_length < FRAME_HEADER_SIZE {
            return Err(GridError::Protocol(format!(
                "frame length {} is smaller than the frame header",
                frame_length
            )));
        }

        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        src.advance(SIZE_OF_FRAME_LENGTH_FIELD);
        let flags = src.get_u16_le();
        let content = src.split_to(frame_length - FRAME_HEADER_SIZE);

        Ok(Some(Self::new(content, flags)))
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::with_flags(DEFAULT_FLAGS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_flags() {
        let begin = Frame::new_begin_frame();
        assert!(begin.is_begin_frame());
        assert!(!begin.is_end_frame());

        let end = Frame::new_end_frame();
        assert!(!end.is_begin_frame());
        assert!(end.is_end_frame());

        let null = Frame::new_null_frame();
        assert!(null.is_null_frame());

        let final_frame = Frame::with_flags(IS_FINAL_FLAG);
        assert!(final_frame.is_final_frame());

        let event = Frame::with_flags(IS_EVENT_FLAG);
        assert!(event.is_event_frame());

        let backup = Frame::with_flags(BACKUP_EVENT_FLAG);
        assert!(backup.is_backup_event_frame());

        let whole = Frame::with_flags(UNFRAGMENTED_MESSAGE);
        assert!(whole.is_begin_fragment());
        assert!(whole.is_end_fragment());
        assert!(whole.is_unfragmented());
        assert!(!Frame::with_flags(BEGIN_FRAGMENT_FLAG).is_unfragmented());
    }

    #[test]
    fn test_wire_size_counts_header() {
        assert_eq!(Frame::default().wire_size(), 6);
        assert_eq!(Frame::from_slice(&[1, 2, 3, 4, 5]).wire_size(), 11);
    }

    #[test]
    fn test_write_and_read_frame() {
        let original = Frame::new(BytesMut::from(&[0xDE, 0xAD, 0xBE, 0xEF][..]), IS_FINAL_FLAG);
        let mut buf = BytesMut::new();
        original.write_to(&mut buf);

        assert_eq!(&buf[..4], &10u32.to_le_bytes());
        assert_eq!(buf.len(), original.wire_size());

        let decoded = Frame::read_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_with_flags_leaves_frame_untouched() {
        let frame = Frame::from_slice(&[7]);
        let mut buf = BytesMut::new();
        frame.write_with_flags(&mut buf, IS_FINAL_FLAG);

        assert_eq!(frame.flags, DEFAULT_FLAGS);
        let decoded = Frame::read_from(&mut buf).unwrap().unwrap();
        assert!(decoded.is_final_frame());
    }

    #[test]
    fn test_read_incomplete_length() {
        let mut buf = BytesMut::from(&[0x01, 0x02][..]);
        assert!(Frame::read_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_read_incomplete_content() {
        let mut buf = BytesMut::from(
            &[
                0x0A, 0x00, 0x00, 0x00, // length = 10 (header + 4 bytes content)
                0x00, 0x20, // flags
                0x01, 0x02, // only 2 bytes of content
            ][..],
        );
        assert!(Frame::read_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_read_empty_frame() {
        let mut buf = BytesMut::from(
            &[
                0x06, 0x00, 0x00, 0x00, // length = 6 (just the header)
                0x00, 0x08, // END_DATA_STRUCTURE
            ][..],
        );

        let frame = Frame::read_from(&mut buf).unwrap().unwrap();
        assert!(frame.is_end_frame());
        assert!(frame.content.is_empty());
    }

    #[test]
    fn test_read_rejects_short_length() {
        let mut buf = BytesMut::from(&[0x03, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            Frame::read_from(&mut buf),
            Err(GridError::Protocol(_))
        ));
    }

    #[test]
    fn test_read_large_frame() {
        let content: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        let original = Frame::from_slice(&content);

        let mut buf = BytesMut::new();
        original.write_to(&mut buf);

        let decoded = Frame::read_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.content.len(), 1000);
        assert_eq!(&decoded.content[..], &content[..]);
    }

    #[test]
    fn test_default_frame_properties() {
        let frame = Frame::default();

        assert!(!frame.is_begin_frame());
        assert!(!frame.is_end_frame());
        assert!(!frame.is_null_frame());
        assert!(!frame.is_final_frame());
        assert!(!frame.is_event_frame());
        assert!(!frame.is_backup_event_frame());
        assert!(frame.content.is_empty());
    }
}
