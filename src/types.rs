//! Core data types shared between the socket threads and user callbacks.
//!
//! Key types for API users:
//! - [`Measurement`]: one decoded time-series sample
//! - Callback type aliases for the seven registration slots on
//!   [`crate::DataSubscriber`]

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Number of 100-nanosecond ticks per millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// A single decoded measurement sample.
///
/// Timestamps are in ticks (100 ns units since the publisher's epoch); the
/// value arrives as a 32-bit float on the wire and is widened to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Globally unique identifier of the signal this sample belongs to
    pub signal_id: Uuid,
    /// Timestamp in ticks
    pub timestamp: i64,
    /// Sample value
    pub value: f64,
    /// Compact quality flags as received (see `protocol::constants`)
    pub flags: u8,
}

/// Current base-time offset table used to resolve compact timestamp deltas.
///
/// The publisher rotates between the two slots and announces the active one
/// via an `UpdateBaseTimes` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseTimeOffsets {
    /// Active slot index (0 or 1)
    pub time_index: usize,
    /// Offset table in ticks; an unset slot holds zero
    pub offsets: [i64; 2],
}

impl BaseTimeOffsets {
    /// Offset of the active slot, or `None` while unset.
    pub fn active_offset(&self) -> Option<i64> {
        let offset = self.offsets[self.time_index & 1];
        (offset != 0).then_some(offset)
    }
}

/// One framed command, marker and size prefix included, ready to write.
pub(crate) type CommandPacket = Vec<u8>;

/// Callback for human-readable status and error messages.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Callback for the data start time (ticks) reported at subscription start.
pub type DataStartTimeCallback = Arc<dyn Fn(i64) + Send + Sync>;
/// Callback receiving the metadata blob exactly as transmitted.
pub type MetadataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Callback receiving each decoded batch of measurements.
pub type NewMeasurementsCallback = Arc<dyn Fn(&[Measurement]) + Send + Sync>;
/// Callback invoked after the connection has been torn down.
pub type ConnectionTerminatedCallback = Arc<dyn Fn() + Send + Sync>;

/// Registered user callback slots.
///
/// Slots are cloned out of their mutex before invocation so user code may
/// re-register callbacks from within a callback.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub status_message: Mutex<Option<MessageCallback>>,
    pub error_message: Mutex<Option<MessageCallback>>,
    pub data_start_time: Mutex<Option<DataStartTimeCallback>>,
    pub metadata: Mutex<Option<MetadataCallback>>,
    pub new_measurements: Mutex<Option<NewMeasurementsCallback>>,
    pub processing_complete: Mutex<Option<MessageCallback>>,
    pub connection_terminated: Mutex<Option<ConnectionTerminatedCallback>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_offset_requires_nonzero_slot() {
        let mut base = BaseTimeOffsets::default();
        assert_eq!(base.active_offset(), None);

        base.offsets = [10_000, 20_000];
        base.time_index = 1;
        assert_eq!(base.active_offset(), Some(20_000));

        base.offsets[1] = 0;
        assert_eq!(base.active_offset(), None);
    }
}
