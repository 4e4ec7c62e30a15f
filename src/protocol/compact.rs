//! Compact measurement decoder.
//!
//! A compact measurement is `[flags u8][signal index u16 BE][value f32 BE]`
//! followed by a time field whose shape is fixed by the subscription:
//!
//! | Subscription | Time field |
//! |---|---|
//! | `include_time` | absolute timestamp, i64 BE ticks |
//! | compact, tick resolution | u32 BE tick delta against the active base offset |
//! | compact, ms resolution | u16 BE millisecond delta against the active base offset |
//!
//! The parser borrows an immutable signal-index-cache snapshot plus the
//! base-time offsets captured at packet start, so it never observes a
//! mid-update mapping regardless of which thread runs it.

use crate::protocol::endian::{read_f32_be, read_i64_be, read_u16_be, read_u32_be};
use crate::protocol::signal_index::SignalIndexCache;
use crate::types::{BaseTimeOffsets, Measurement, TICKS_PER_MILLISECOND};
use std::sync::Arc;

/// Stateless-per-measurement decoder over one data-packet body.
pub struct CompactMeasurementParser {
    cache: Arc<SignalIndexCache>,
    base_times: BaseTimeOffsets,
    include_time: bool,
    use_millisecond_resolution: bool,
    parsed: Option<Measurement>,
}

impl CompactMeasurementParser {
    pub fn new(
        cache: Arc<SignalIndexCache>,
        base_times: BaseTimeOffsets,
        include_time: bool,
        use_millisecond_resolution: bool,
    ) -> Self {
        Self {
            cache,
            base_times,
            include_time,
            use_millisecond_resolution,
            parsed: None,
        }
    }

    /// Encoded length of one measurement under the current subscription.
    pub fn measurement_byte_length(&self) -> usize {
        let time_length = if self.include_time {
            8
        } else if self.use_millisecond_resolution {
            2
        } else {
            4
        };
        1 + 2 + 4 + time_length
    }

    /// Decode one measurement at `*offset`, advancing the offset past the
    /// consumed bytes on success.
    ///
    /// Returns `false` without advancing when the buffer is too short, the
    /// signal index is not in the cache, or a compact delta arrives while
    /// the active base-time offset is still unset.
    pub fn try_parse(&mut self, buffer: &[u8], offset: &mut usize) -> bool {
        let start = *offset;

        if buffer.len().saturating_sub(start) < self.measurement_byte_length() {
            return false;
        }

        let flags = buffer[start];

        let Some(signal_index) = read_u16_be(buffer, start + 1) else {
            return false;
        };
        let Some(signal_id) = self.cache.signal_id(signal_index) else {
            return false;
        };

        let Some(value) = read_f32_be(buffer, start + 3) else {
            return false;
        };

        let time_offset = start + 7;
        let timestamp = if self.include_time {
            match read_i64_be(buffer, time_offset) {
                Some(ticks) => ticks,
                None => return false,
            }
        } else {
            let Some(base) = self.base_times.active_offset() else {
                return false;
            };
            if self.use_millisecond_resolution {
                match read_u16_be(buffer, time_offset) {
                    Some(delta) => base + i64::from(delta) * TICKS_PER_MILLISECOND,
                    None => return false,
                }
            } else {
                match read_u32_be(buffer, time_offset) {
                    Some(delta) => base + i64::from(delta),
                    None => return false,
                }
            }
        };

        *offset = start + self.measurement_byte_length();
        self.parsed = Some(Measurement {
            signal_id,
            timestamp,
            value: f64::from(value),
            flags,
        });
        true
    }

    /// The most recently parsed measurement.
    pub fn parsed_measurement(&self) -> Option<&Measurement> {
        self.parsed.as_ref()
    }
}
