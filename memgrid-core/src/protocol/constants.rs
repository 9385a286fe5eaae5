//! Protocol constants for the client binary protocol.

/// Size of the frame length field in bytes.
pub const SIZE_OF_FRAME_LENGTH_FIELD: usize = 4;

/// Size of the frame flags field in bytes.
pub const SIZE_OF_FRAME_FLAGS_FIELD: usize = 2;

/// Total frame header size (length + flags).
pub const FRAME_HEADER_SIZE: usize = SIZE_OF_FRAME_LENGTH_FIELD + SIZE_OF_FRAME_FLAGS_FIELD;

/// First fragment of a message.
pub const BEGIN_FRAGMENT_FLAG: u16 = 1 << 15;

/// Last fragment of a message.
pub const END_FRAGMENT_FLAG: u16 = 1 << 14;

/// Last frame of a message (or of one fragment).
pub const IS_FINAL_FLAG: u16 = 1 << 13;

/// Opens a nested data structure inside a message.
pub const BEGIN_DATA_STRUCTURE_FLAG: u16 = 1 << 12;

/// Closes a nested data structure inside a message.
pub const END_DATA_STRUCTURE_FLAG: u16 = 1 << 11;

/// Null frame flag - indicates a null value.
pub const IS_NULL_FLAG: u16 = 1 << 10;

/// Event flag - the message is a listener notification.
pub const IS_EVENT_FLAG: u16 = 1 << 9;

/// The request expects backup acknowledgements.
pub const BACKUP_AWARE_FLAG: u16 = 1 << 8;

/// Backup acknowledgement event.
pub const BACKUP_EVENT_FLAG: u16 = 1 << 7;

/// Default frame flags (no special flags set).
pub const DEFAULT_FLAGS: u16 = 0;

/// Flags of the initial frame of a message that fits in one fragment.
pub const UNFRAGMENTED_MESSAGE: u16 = BEGIN_FRAGMENT_FLAG | END_FRAGMENT_FLAG;

/// Offset of message type in initial frame content.
pub const TYPE_FIELD_OFFSET: usize = 0;

/// Offset of correlation ID in initial frame content.
pub const CORRELATION_ID_OFFSET: usize = TYPE_FIELD_OFFSET + 4;

/// Offset of partition ID in request initial frame.
pub const PARTITION_ID_OFFSET: usize = CORRELATION_ID_OFFSET + 8;

/// Size of the request initial frame header.
pub const REQUEST_HEADER_SIZE: usize = PARTITION_ID_OFFSET + 4;

/// Offset of backup acks count in response initial frame.
pub const RESPONSE_BACKUP_ACKS_OFFSET: usize = CORRELATION_ID_OFFSET + 8;

/// Size of the response initial frame header.
pub const RESPONSE_HEADER_SIZE: usize = RESPONSE_BACKUP_ACKS_OFFSET + 1;

/// Size of the event initial frame header.
pub const EVENT_HEADER_SIZE: usize = PARTITION_ID_OFFSET + 4;

/// Offset of the fragmentation id in the first frame of a fragment.
pub const FRAGMENTATION_ID_OFFSET: usize = 0;

/// Partition ID indicating no specific partition (-1).
pub const PARTITION_ID_ANY: i32 = -1;

/// Bytes sent right after connecting, before any framed message.
pub const CLIENT_PROTOCOL_PREAMBLE: &[u8; 3] = b"CP2";

/// Encoded sizes of fixed-width fields.
pub const BYTE_SIZE: usize = 1;
/// Size of a boolean field.
pub const BOOLEAN_SIZE: usize = 1;
/// Size of an `i32` field.
pub const INT_SIZE: usize = 4;
/// Size of an `i64` field.
pub const LONG_SIZE: usize = 8;
/// Size of a nullable UUID field (null marker + two longs).
pub const UUID_SIZE: usize = BOOLEAN_SIZE + 2 * LONG_SIZE;

// Message types used by the connection core.

/// Exception response.
pub const EXCEPTION_MESSAGE_TYPE: i32 = 0;

/// Client authentication request.
pub const CLIENT_AUTHENTICATION: i32 = 0x000100;

/// Client authentication response.
pub const CLIENT_AUTHENTICATION_RESPONSE: i32 = 0x000101;

/// Client authentication with custom credentials request.
pub const CLIENT_AUTHENTICATION_CUSTOM: i32 = 0x000200;

/// Client authentication with custom credentials response.
pub const CLIENT_AUTHENTICATION_CUSTOM_RESPONSE: i32 = 0x000201;

/// Cluster view listener registration request.
pub const CLIENT_ADD_CLUSTER_VIEW_LISTENER: i32 = 0x000300;

/// Cluster view listener registration response.
pub const CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE: i32 = 0x000301;

/// Members view event.
pub const CLIENT_MEMBERS_VIEW_EVENT: i32 = 0x000302;

/// Partitions view event.
pub const CLIENT_PARTITIONS_VIEW_EVENT: i32 = 0x000303;

/// Ping request.
pub const CLIENT_PING: i32 = 0x000B00;

/// Ping response.
pub const CLIENT_PING_RESPONSE: i32 = 0x000B01;
