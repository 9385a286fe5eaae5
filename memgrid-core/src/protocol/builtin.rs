//! Encoders and decoders for the field types shared by all message codecs.
//!
//! Fixed-size fields live in the initial frame at known offsets; variable
//! sized values take one frame each, and composite values are bracketed by
//! begin/end data-structure frames.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::client_message::{ClientMessage, FrameIter};
use super::constants::*;
use super::frame::Frame;
use crate::error::{GridError, Result};

fn truncated(what: &str) -> GridError {
    GridError::Protocol(format!("message truncated while decoding {}", what))
}

/// Returns the next frame or a protocol error.
pub fn next_frame<'a>(iter: &mut FrameIter<'a>, what: &str) -> Result<&'a Frame> {
    iter.next().ok_or_else(|| truncated(what))
}

/// Skips frames until the end of the current data structure.
pub fn fast_forward_to_end_frame(iter: &mut FrameIter<'_>) -> Result<()> {
    let mut depth = 1usize;
    while depth > 0 {
        let frame = next_frame(iter, "data structure")?;
        if frame.is_end_frame() {
            depth -= 1;
        } else if frame.is_begin_frame() {
            depth += 1;
        }
    }
    Ok(())
}

/// Consumes the next frame if it is a null frame.
pub fn next_is_null(iter: &mut FrameIter<'_>) -> bool {
    if iter.peek().is_some_and(Frame::is_null_frame) {
        iter.next();
        true
    } else {
        false
    }
}

/// Fixed-size field access inside a frame's content.
pub mod fixed {
    use super::*;

    fn slice<const N: usize>(content: &[u8], offset: usize) -> Result<[u8; N]> {
        content
            .get(offset..offset + N)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| truncated("fixed-size field"))
    }

    /// Reads a `u8` at `offset`.
    pub fn read_u8(content: &[u8], offset: usize) -> Result<u8> {
        slice::<1>(content, offset).map(|b| b[0])
    }

    /// Reads a boolean at `offset`.
    pub fn read_bool(content: &[u8], offset: usize) -> Result<bool> {
        read_u8(content, offset).map(|b| b != 0)
    }

    /// Reads a little-endian `i32` at `offset`.
    pub fn read_i32(content: &[u8], offset: usize) -> Result<i32> {
        slice::<4>(content, offset).map(i32::from_le_bytes)
    }

    /// Reads a little-endian `i64` at `offset`.
    pub fn read_i64(content: &[u8], offset: usize) -> Result<i64> {
        slice::<8>(content, offset).map(i64::from_le_bytes)
    }

    /// Reads a nullable UUID (null marker, most and least significant bits).
    pub fn read_uuid(content: &[u8], offset: usize) -> Result<Option<Uuid>> {
        if read_bool(content, offset)? {
            return Ok(None);
        }
        let msb = read_i64(content, offset + BOOLEAN_SIZE)? as u64;
        let lsb = read_i64(content, offset + BOOLEAN_SIZE + LONG_SIZE)? as u64;
        Ok(Some(Uuid::from_u64_pair(msb, lsb)))
    }

    /// Appends a boolean.
    pub fn put_bool(buf: &mut BytesMut, value: bool) {
        buf.put_u8(u8::from(value));
    }

    /// Appends a nullable UUID.
    pub fn put_uuid(buf: &mut BytesMut, value: Option<Uuid>) {
        match value {
            Some(uuid) => {
                let (msb, lsb) = uuid.as_u64_pair();
                put_bool(buf, false);
                buf.put_i64_le(msb as i64);
                buf.put_i64_le(lsb as i64);
            }
            None => {
                put_bool(buf, true);
                buf.put_i64_le(0);
                buf.put_i64_le(0);
            }
        }
    }
}

/// UTF-8 string in its own frame.
pub struct StringCodec;

impl StringCodec {
    /// Appends `value` as a frame.
    pub fn encode(message: &mut ClientMessage, value: &str) {
        message.add_frame(Frame::from_slice(value.as_bytes()));
    }

    /// Decodes the next frame as a string.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<String> {
        let frame = next_frame(iter, "string")?;
        String::from_utf8(frame.content.to_vec())
            .map_err(|e| GridError::Protocol(format!("invalid UTF-8 string: {}", e)))
    }
}

/// Raw bytes in their own frame.
pub struct ByteArrayCodec;

impl ByteArrayCodec {
    /// Appends `value` as a frame.
    pub fn encode(message: &mut ClientMessage, value: &[u8]) {
        message.add_frame(Frame::from_slice(value));
    }

    /// Decodes the next frame as bytes.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<u8>> {
        next_frame(iter, "byte array").map(|f| f.content.to_vec())
    }
}

/// Wraps another codec so that `None` travels as a null frame.
pub struct NullableCodec;

impl NullableCodec {
    /// Appends `value` with `encode`, or a null frame.
    pub fn encode<T: ?Sized>(
        message: &mut ClientMessage,
        value: Option<&T>,
        encode: impl FnOnce(&mut ClientMessage, &T),
    ) {
        match value {
            Some(value) => encode(message, value),
            None => message.add_frame(Frame::new_null_frame()),
        }
    }

    /// Decodes with `decode` unless the next frame is a null frame.
    pub fn decode<'a, T>(
        iter: &mut FrameIter<'a>,
        decode: impl FnOnce(&mut FrameIter<'a>) -> Result<T>,
    ) -> Result<Option<T>> {
        if next_is_null(iter) {
            Ok(None)
        } else {
            decode(iter).map(Some)
        }
    }
}

/// A list of variable-size items bracketed by begin/end frames.
pub struct ListMultiFrameCodec;

impl ListMultiFrameCodec {
    /// Appends every item with `encode`.
    pub fn encode<T>(
        message: &mut ClientMessage,
        items: impl IntoIterator<Item = T>,
        mut encode: impl FnMut(&mut ClientMessage, T),
    ) {
        message.add_frame(Frame::new_begin_frame());
        for item in items {
            encode(message, item);
        }
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes items with `decode` until the closing end frame.
    pub fn decode<'a, T>(
        iter: &mut FrameIter<'a>,
        mut decode: impl FnMut(&mut FrameIter<'a>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let begin = next_frame(iter, "list")?;
        if !begin.is_begin_frame() {
            return Err(GridError::Protocol("list does not start with a begin frame".into()));
        }
        let mut items = Vec::new();
        loop {
            match iter.peek() {
                Some(frame) if frame.is_end_frame() => {
                    iter.next();
                    return Ok(items);
                }
                Some(_) => items.push(decode(iter)?),
                None => return Err(truncated("list")),
            }
        }
    }
}

/// Alternating key/value entries bracketed by begin/end frames.
pub struct MapCodec;

impl MapCodec {
    /// Appends entries with the given key and value encoders.
    pub fn encode<K, V>(
        message: &mut ClientMessage,
        entries: impl IntoIterator<Item = (K, V)>,
        mut encode_key: impl FnMut(&mut ClientMessage, K),
        mut encode_value: impl FnMut(&mut ClientMessage, V),
    ) {
        message.add_frame(Frame::new_begin_frame());
        for (key, value) in entries {
            encode_key(message, key);
            encode_value(message, value);
        }
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes entries with the given key and value decoders.
    pub fn decode<'a, K, V>(
        iter: &mut FrameIter<'a>,
        mut decode_key: impl FnMut(&mut FrameIter<'a>) -> Result<K>,
        mut decode_value: impl FnMut(&mut FrameIter<'a>) -> Result<V>,
    ) -> Result<Vec<(K, V)>> {
        ListMultiFrameCodec::decode(iter, |iter| {
            let key = decode_key(iter)?;
            let value = decode_value(iter)?;
            Ok((key, value))
        })
    }
}

/// A list of `i32` packed into a single frame.
pub struct ListIntegerCodec;

impl ListIntegerCodec {
    /// Appends the packed list.
    pub fn encode(message: &mut ClientMessage, values: &[i32]) {
        let mut content = BytesMut::with_capacity(values.len() * INT_SIZE);
        for value in values {
            content.put_i32_le(*value);
        }
        message.add_frame(Frame::with_content(content));
    }

    /// Decodes the packed list.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<i32>> {
        let frame = next_frame(iter, "integer list")?;
        (0..frame.content.len() / INT_SIZE)
            .map(|i| fixed::read_i32(&frame.content, i * INT_SIZE))
            .collect()
    }
}

/// A list of UUIDs packed into a single frame.
pub struct ListUuidCodec;

impl ListUuidCodec {
    /// Appends the packed list.
    pub fn encode(message: &mut ClientMessage, values: &[Uuid]) {
        let mut content = BytesMut::with_capacity(values.len() * UUID_SIZE);
        for value in values {
            fixed::put_uuid(&mut content, Some(*value));
        }
        message.add_frame(Frame::with_content(content));
    }

    /// Decodes the packed list; null entries are rejected.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<Uuid>> {
        let frame = next_frame(iter, "uuid list")?;
        (0..frame.content.len() / UUID_SIZE)
            .map(|i| {
                fixed::read_uuid(&frame.content, i * UUID_SIZE)?
                    .ok_or_else(|| GridError::Protocol("null uuid in uuid list".into()))
            })
            .collect()
    }
}

/// Entries of `UUID -> [i32]`, as used by the partition table.
pub struct EntryListUuidListIntegerCodec;

impl EntryListUuidListIntegerCodec {
    /// Appends the value lists followed by the packed key list.
    pub fn encode(message: &mut ClientMessage, entries: &[(Uuid, Vec<i32>)]) {
        ListMultiFrameCodec::encode(message, entries, |message, (_, values)| {
            ListIntegerCodec::encode(message, values)
        });
        let keys: Vec<Uuid> = entries.iter().map(|(key, _)| *key).collect();
        ListUuidCodec::encode(message, &keys);
    }

    /// Decodes the entries.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<(Uuid, Vec<i32>)>> {
        let values = ListMultiFrameCodec::decode(iter, ListIntegerCodec::decode)?;
        let keys = ListUuidCodec::decode(iter)?;
        if keys.len() != values.len() {
            return Err(GridError::Protocol(format!(
                "entry list has {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        Ok(keys.into_iter().zip(values).collect())
    }
}
