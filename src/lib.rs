//! Subscriber-side client for the Gateway Exchange Protocol (GEP).
//!
//! GEP transports time-series measurements (phasor samples and similar
//! telemetry) from a publisher to subscribers over a framed TCP command
//! channel, with an optional UDP side channel for data packets. This crate
//! implements the subscriber: it negotiates operational modes, issues
//! subscription requests, maintains the signal-index cache and base-time
//! offsets needed to decode compact measurements, and delivers decoded
//! batches to user callbacks from a dedicated dispatcher thread.
//!
//! Start with [`DataSubscriber`]; see [`SubscriptionInfo`] for the
//! subscription knobs.

mod dispatch;
pub mod error;
pub mod protocol;
mod streaming;
pub mod subscriber;
pub mod subscription;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use protocol::{CompactMeasurementParser, SignalIndexCache, SignalIndexEntry};
pub use subscriber::DataSubscriber;
pub use subscription::SubscriptionInfo;
pub use types::{BaseTimeOffsets, Measurement, TICKS_PER_MILLISECOND};
