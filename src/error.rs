//! Error types for the GEP subscriber
//!
//! # Error Recovery Strategies
//!
//! ## Synchronous errors (returned to the caller)
//!
//! - **`Io`**: Connection setup failed (resolution, TCP connect, UDP bind).
//!   The subscriber is left disconnected; fix the endpoint and retry.
//! - **`AlreadyConnected`**: `connect` was called on a connected subscriber.
//!   Call `disconnect` first.
//! - **`NotConnected`**: A command was issued with no open command channel.
//! - **`ThreadPanic`**: A background thread panicked and could not be joined.
//!
//! ## Asynchronous errors (error-message callback)
//!
//! Mid-stream socket failures, truncated response packets, malformed
//! measurements, and server-reported command failures never surface as
//! `Result` errors; they are delivered once through the registered
//! error-message callback and the originating packet is abandoned.

use thiserror::Error;

/// Errors that can occur in the GEP subscriber
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subscriber is already connected; disconnect first")]
    AlreadyConnected,

    #[error("Subscriber is not connected")]
    NotConnected,

    #[error("Thread panic")]
    ThreadPanic,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
