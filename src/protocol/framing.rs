//! Command framing for the TCP command channel.
//!
//! # Wire Format
//!
//! Every command from subscriber to publisher is one frame:
//!
//! ```text
//! ┌─────────────────────┬────────────────────────┬─────────────────────────┐
//! │ Marker AA BB CC DD  │ Payload size (4 bytes) │ Payload (variable)      │
//! │                     │ Little-endian i32      │ command code + data     │
//! └─────────────────────┴────────────────────────┴─────────────────────────┘
//! ```
//!
//! Responses from the publisher use the same 8-byte prefix shape (4 reserved
//! bytes + little-endian packet size); the helpers here decode that prefix
//! for the command-channel reader.

use crate::protocol::constants::{PACKET_SIZE_OFFSET, PAYLOAD_HEADER_SIZE, PAYLOAD_MARKER};
use crate::protocol::endian::read_i32_le;

/// Build a framed command packet: marker, little-endian payload size,
/// command code, command data.
pub fn frame_command(command: u8, data: &[u8]) -> Vec<u8> {
    let payload_size = 1 + data.len();
    let mut packet = Vec::with_capacity(PAYLOAD_HEADER_SIZE + payload_size);
    packet.extend_from_slice(&PAYLOAD_MARKER);
    packet.extend_from_slice(&(payload_size as i32).to_le_bytes());
    packet.push(command);
    packet.extend_from_slice(data);
    packet
}

/// Extract the packet size from an 8-byte payload header.
///
/// Returns `None` for a short header or a negative size field.
pub fn packet_size(header: &[u8]) -> Option<usize> {
    let size = read_i32_le(header, PACKET_SIZE_OFFSET)?;
    usize::try_from(size).ok()
}
