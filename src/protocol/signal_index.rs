//! Signal index cache: maps 16-bit runtime signal indices to signal
//! identity.
//!
//! The publisher assigns each subscribed signal a short index so compact
//! measurements do not need to carry full 16-byte GUIDs. An
//! `UpdateSignalIndexCache` response replaces the whole mapping; the
//! subscriber parses the body into a fresh cache and swaps it in as an
//! immutable snapshot so parsers running on other threads always observe a
//! consistent view.

use crate::error::{Error, Result};
use crate::protocol::endian::{read_i32_be, read_u16_be, read_u32_be};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of one subscribed signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalIndexEntry {
    /// Globally unique signal identifier
    pub signal_id: Uuid,
    /// Source (measurement key) string, UTF-8 on the wire
    pub source: String,
    /// Numeric point identifier within the source
    pub id: u32,
}

/// Immutable mapping from runtime signal index to signal identity.
#[derive(Debug, Clone, Default)]
pub struct SignalIndexCache {
    entries: HashMap<u16, SignalIndexEntry>,
}

impl SignalIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `UpdateSignalIndexCache` response body into a new cache.
    ///
    /// Body layout: 4-byte length, 16-byte subscriber GUID (both ignored),
    /// big-endian i32 entry count, then per entry: big-endian u16 signal
    /// index, 16-byte signal GUID, big-endian i32 source byte length, the
    /// UTF-8 source bytes, big-endian u32 numeric id. Bytes after the last
    /// entry describe unauthorized signals and are not parsed.
    pub fn from_response_body(body: &[u8]) -> Result<Self> {
        // Skip the 4-byte length and 16-byte subscriber GUID
        let mut offset = 20;
        let count = read_i32_be(body, offset)
            .ok_or_else(|| Error::Protocol("signal index cache body truncated".into()))?;
        offset += 4;

        if count < 0 {
            return Err(Error::Protocol(format!(
                "signal index cache reports negative entry count {count}"
            )));
        }

        // Capacity bounded by what the body could actually hold (each
        // entry is at least 26 bytes) so a bogus count cannot force a
        // huge allocation up front
        let mut entries = HashMap::with_capacity((count as usize).min(body.len() / 26 + 1));

        for _ in 0..count {
            let truncated =
                || Error::Protocol("signal index cache entry truncated".to_string());

            let signal_index = read_u16_be(body, offset).ok_or_else(truncated)?;
            offset += 2;

            let guid_bytes = body.get(offset..offset + 16).ok_or_else(truncated)?;
            let mut guid = [0u8; 16];
            guid.copy_from_slice(guid_bytes);
            let signal_id = Uuid::from_bytes(guid);
            offset += 16;

            let source_len = read_i32_be(body, offset).ok_or_else(truncated)?;
            offset += 4;
            let source_len = usize::try_from(source_len).map_err(|_| {
                Error::Protocol(format!("negative source string length {source_len}"))
            })?;

            let source_bytes = body.get(offset..offset + source_len).ok_or_else(truncated)?;
            let source = String::from_utf8_lossy(source_bytes).into_owned();
            offset += source_len;

            let id = read_u32_be(body, offset).ok_or_else(truncated)?;
            offset += 4;

            entries.insert(signal_index, SignalIndexEntry { signal_id, source, id });
        }

        if offset < body.len() {
            // Unauthorized-signal region; format reserved by the publisher
            log::trace!(
                "Ignoring {} trailing bytes after signal index cache entries",
                body.len() - offset
            );
        }

        Ok(Self { entries })
    }

    pub fn contains(&self, signal_index: u16) -> bool {
        self.entries.contains_key(&signal_index)
    }

    pub fn entry(&self, signal_index: u16) -> Option<&SignalIndexEntry> {
        self.entries.get(&signal_index)
    }

    pub fn signal_id(&self, signal_index: u16) -> Option<Uuid> {
        self.entries.get(&signal_index).map(|entry| entry.signal_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
