//! Wire-protocol constants for the Gateway Exchange Protocol

// Command frame marker (subscriber -> publisher)
pub const PAYLOAD_MARKER: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

// Framing sizes
pub const PAYLOAD_HEADER_SIZE: usize = 8; // marker/reserved (4) + packet size (4)
pub const PACKET_SIZE_OFFSET: usize = 4; // little-endian i32 inside the payload header
pub const RESPONSE_HEADER_SIZE: usize = 6; // response code + command code + 4 reserved

/// Largest datagram accepted on the UDP data channel
pub const MAX_UDP_PACKET_SIZE: usize = 32_768;

/// Framing desync guard: a command-channel packet size beyond this is
/// treated as a fatal protocol error rather than an allocation request.
pub const MAX_COMMAND_PACKET_SIZE: usize = 32 * 1024 * 1024;

// Server commands (subscriber -> publisher)
pub const CMD_AUTHENTICATE: u8 = 0x04; // Carry authentication blob to publisher
pub const CMD_METADATA_REFRESH: u8 = 0x05; // Request metadata; response delivers the blob
pub const CMD_DEFINE_OPERATIONAL_MODES: u8 = 0x06; // Negotiate encoding/serialization/compression
pub const CMD_SUBSCRIBE: u8 = 0x07; // Start a subscription (connection-string payload)
pub const CMD_UNSUBSCRIBE: u8 = 0x08; // Stop the active subscription
pub const CMD_ROTATE_CIPHER_KEYS: u8 = 0x09; // Request cipher key rotation

// Server responses (publisher -> subscriber)
pub const RESPONSE_SUCCEEDED: u8 = 0x80;
pub const RESPONSE_FAILED: u8 = 0x81;
pub const RESPONSE_DATA_PACKET: u8 = 0x82;
pub const RESPONSE_UPDATE_SIGNAL_INDEX_CACHE: u8 = 0x83;
pub const RESPONSE_UPDATE_BASE_TIMES: u8 = 0x84;
pub const RESPONSE_DATA_START_TIME: u8 = 0x86;
pub const RESPONSE_PROCESSING_COMPLETE: u8 = 0x87;

// Data-packet flags byte
pub const DATA_PACKET_SYNCHRONIZED: u8 = 0x01; // Frame-level timestamp follows the count
pub const DATA_PACKET_COMPACT: u8 = 0x02; // Compact measurement encoding (set on subscribe)

// Compact measurement quality flags
pub const COMPACT_DATA_RANGE: u8 = 0x01;
pub const COMPACT_DATA_QUALITY: u8 = 0x02;
pub const COMPACT_TIME_QUALITY: u8 = 0x04;
pub const COMPACT_SYSTEM_ISSUE: u8 = 0x08;
pub const COMPACT_CALCULATED_VALUE: u8 = 0x10;
pub const COMPACT_DISCARDED_VALUE: u8 = 0x20;

// Operational modes mask (big-endian u32 sent with CMD_DEFINE_OPERATIONAL_MODES).
// The character-encoding field value for UTF-8 is zero; it is the only
// encoding this subscriber emits.
pub const OP_ENCODING_UTF8: u32 = 0x0000_0000;
pub const OP_MODE_COMMON_SERIALIZATION: u32 = 0x0000_0002;
pub const OP_MODE_COMPRESS_METADATA: u32 = 0x0000_0004;
