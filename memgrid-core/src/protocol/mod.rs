//! Client binary protocol implementation.
//!
//! This module provides the frame and message types, the stream codec that
//! reassembles fragmented messages, and the field codecs shared by every
//! message encoder.

pub mod builtin;
mod client_message;
mod codec;
pub mod constants;
mod frame;

pub use client_message::{compute_partition_hash, ClientMessage, FrameIter};
pub use codec::{ClientMessageCodec, FragmentedMessageHandler};
pub use constants::*;
pub use frame::Frame;
