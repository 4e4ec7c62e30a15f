//! Wire-protocol layer: constants, endian helpers, command framing, the
//! signal index cache, and the compact measurement decoder.

pub mod compact;
pub mod constants;
pub mod endian;
pub mod framing;
pub mod signal_index;

pub use compact::CompactMeasurementParser;
pub use signal_index::{SignalIndexCache, SignalIndexEntry};
