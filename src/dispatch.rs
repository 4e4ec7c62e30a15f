//! Response routing and the callback dispatch pipeline.
//!
//! Every inbound response packet is routed here by the socket readers. User
//! callbacks never run on a reader thread: the router copies each payload
//! into an owned buffer and enqueues a [`CallbackDispatch`] consumed by the
//! single callback-dispatcher thread. This keeps callback ordering equal to
//! response arrival order on the command channel and lets user code block
//! or call back into the subscriber without stalling socket I/O.
//!
//! The one exception is connection termination: the terminated dispatcher
//! must tear the subscriber down (joining the very threads that detected
//! the termination), so it runs on its own short-lived thread.

use crate::protocol::CompactMeasurementParser;
use crate::protocol::constants::{
    CMD_AUTHENTICATE, CMD_METADATA_REFRESH, CMD_ROTATE_CIPHER_KEYS, CMD_SUBSCRIBE,
    CMD_UNSUBSCRIBE, DATA_PACKET_SYNCHRONIZED, RESPONSE_DATA_PACKET, RESPONSE_DATA_START_TIME,
    RESPONSE_FAILED, RESPONSE_HEADER_SIZE, RESPONSE_PROCESSING_COMPLETE, RESPONSE_SUCCEEDED,
    RESPONSE_UPDATE_BASE_TIMES, RESPONSE_UPDATE_SIGNAL_INDEX_CACHE,
};
use crate::protocol::endian::{read_i32_be, read_i64_be};
use crate::protocol::signal_index::SignalIndexCache;
use crate::subscriber::SubscriberCore;
use crate::types::{BaseTimeOffsets, Measurement};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread;

/// Function run on the callback-dispatcher thread for one queued payload.
pub(crate) type DispatcherFn = fn(&SubscriberCore, &[u8]);

/// One queued callback invocation: the dispatcher function plus the owned
/// copy of the payload it decodes.
pub(crate) struct CallbackDispatch {
    pub function: DispatcherFn,
    pub data: Vec<u8>,
}

/// Callback-dispatcher thread body: drain the queue in arrival order until
/// it is released or the subscriber starts disconnecting.
pub(crate) fn run_callback_dispatcher(core: Arc<SubscriberCore>, queue: Receiver<CallbackDispatch>) {
    log::debug!("Callback dispatcher started");

    while let Ok(dispatch) = queue.recv() {
        if core.is_disconnecting() {
            break;
        }
        (dispatch.function)(&core, &dispatch.data);
    }

    log::debug!("Callback dispatcher stopped");
}

/// Run the connection-terminated dispatcher on a fresh thread.
///
/// A reader thread cannot disconnect the subscriber itself (disconnect
/// joins the reader), so termination is handed to a transient thread that
/// tears the connection down and then invokes the user callback, leaving
/// the callback free to reconnect. Latched so the callback fires at most
/// once per connection whatever the trigger (peer EOF on either read, or a
/// fatal read error).
pub(crate) fn dispatch_connection_terminated(core: &Arc<SubscriberCore>) {
    if !core.begin_termination() {
        return;
    }

    let core = Arc::clone(core);
    let spawned = thread::Builder::new()
        .name("gep-terminated".to_string())
        .spawn(move || {
            core.disconnect();
            core.invoke_connection_terminated();
        });

    if spawned.is_err() {
        log::error!("Failed to spawn connection-terminated dispatcher thread");
    }
}

/// Route one response packet (command-channel frame body or bare UDP
/// datagram) by its 6-byte header.
pub(crate) fn process_server_response(core: &Arc<SubscriberCore>, buffer: &[u8]) {
    if buffer.len() < RESPONSE_HEADER_SIZE {
        core.dispatch_error_message(format!(
            "Dropping truncated response packet ({} bytes)",
            buffer.len()
        ));
        return;
    }

    let response_code = buffer[0];
    let command_code = buffer[1];
    let body = &buffer[RESPONSE_HEADER_SIZE..];

    match response_code {
        RESPONSE_SUCCEEDED => handle_succeeded(core, command_code, body),
        RESPONSE_FAILED => core.dispatch_error_message(format!(
            "Received failure code from server command 0x{:02X}: {}",
            command_code,
            String::from_utf8_lossy(body)
        )),
        RESPONSE_DATA_PACKET => core.dispatch(new_measurements_dispatcher, body),
        RESPONSE_DATA_START_TIME => core.dispatch(data_start_time_dispatcher, body),
        RESPONSE_PROCESSING_COMPLETE => core.dispatch(processing_complete_dispatcher, body),
        RESPONSE_UPDATE_SIGNAL_INDEX_CACHE => handle_update_signal_index_cache(core, body),
        RESPONSE_UPDATE_BASE_TIMES => handle_update_base_times(core, body),
        other => {
            // Publisher extensions; dropped for forward compatibility
            log::debug!("Dropping response with unrecognized code 0x{other:02X}");
        }
    }
}

fn handle_succeeded(core: &Arc<SubscriberCore>, command_code: u8, body: &[u8]) {
    match command_code {
        // The metadata response carries the blob itself, not a message
        CMD_METADATA_REFRESH => core.dispatch(metadata_dispatcher, body),

        CMD_SUBSCRIBE | CMD_UNSUBSCRIBE => {
            core.set_subscribed(command_code == CMD_SUBSCRIBE);
            core.dispatch_status_message(success_message(command_code, body));
        }

        CMD_AUTHENTICATE | CMD_ROTATE_CIPHER_KEYS => {
            core.dispatch_status_message(success_message(command_code, body));
        }

        _ => core.dispatch_error_message(format!(
            "Received success code in response to unknown server command 0x{command_code:02X}"
        )),
    }
}

fn success_message(command_code: u8, body: &[u8]) -> String {
    format!(
        "Received success code in response to server command 0x{:02X}: {}",
        command_code,
        String::from_utf8_lossy(body)
    )
}

fn handle_update_signal_index_cache(core: &Arc<SubscriberCore>, body: &[u8]) {
    match SignalIndexCache::from_response_body(body) {
        Ok(cache) => {
            log::debug!("Signal index cache updated ({} entries)", cache.len());
            core.replace_signal_index_cache(cache);
        }
        Err(error) => {
            core.dispatch_error_message(format!("Error parsing signal index cache: {error}"));
        }
    }
}

fn handle_update_base_times(core: &Arc<SubscriberCore>, body: &[u8]) {
    let parsed = read_i32_be(body, 0).zip(read_i64_be(body, 4)).zip(read_i64_be(body, 12));

    match parsed {
        Some(((time_index, offset0), offset1)) => {
            let base = BaseTimeOffsets {
                time_index: (time_index as usize) & 1,
                offsets: [offset0, offset1],
            };
            log::debug!(
                "Base time offsets updated: index {} offsets {:?}",
                base.time_index,
                base.offsets
            );
            core.set_base_times(base);
        }
        None => core.dispatch_error_message("Dropping truncated base time update".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher functions (run on the callback-dispatcher thread)
// ---------------------------------------------------------------------------

pub(crate) fn status_message_dispatcher(core: &SubscriberCore, data: &[u8]) {
    let callback = core.callbacks.status_message.lock().clone();
    if let Some(callback) = callback {
        callback(&String::from_utf8_lossy(data));
    }
}

pub(crate) fn error_message_dispatcher(core: &SubscriberCore, data: &[u8]) {
    let callback = core.callbacks.error_message.lock().clone();
    if let Some(callback) = callback {
        callback(&String::from_utf8_lossy(data));
    }
}

pub(crate) fn metadata_dispatcher(core: &SubscriberCore, data: &[u8]) {
    let callback = core.callbacks.metadata.lock().clone();
    if let Some(callback) = callback {
        callback(data);
    }
}

pub(crate) fn data_start_time_dispatcher(core: &SubscriberCore, data: &[u8]) {
    match read_i64_be(data, 0) {
        Some(start_time) => {
            let callback = core.callbacks.data_start_time.lock().clone();
            if let Some(callback) = callback {
                callback(start_time);
            }
        }
        None => core.invoke_error_message("Dropping truncated data start time"),
    }
}

pub(crate) fn processing_complete_dispatcher(core: &SubscriberCore, data: &[u8]) {
    let callback = core.callbacks.processing_complete.lock().clone();
    if let Some(callback) = callback {
        callback(&String::from_utf8_lossy(data));
    }
}

/// Decode one data-packet body and deliver the batch.
///
/// Body: flags byte, big-endian i32 measurement count, optional big-endian
/// i64 frame-level timestamp when the synchronized flag is set, then
/// compact measurements until the body is exhausted. A malformed
/// measurement abandons the rest of the packet but the batch parsed so far
/// is still delivered.
pub(crate) fn new_measurements_dispatcher(core: &SubscriberCore, data: &[u8]) {
    if data.len() < 5 {
        core.invoke_error_message("Dropping truncated data packet");
        return;
    }

    let flags = data[0];
    let Some(count) = read_i32_be(data, 1) else {
        core.invoke_error_message("Dropping truncated data packet");
        return;
    };
    core.add_measurements_received(count.max(0) as u64);

    let mut offset = 5;
    let mut frame_timestamp = None;

    if flags & DATA_PACKET_SYNCHRONIZED != 0 {
        match read_i64_be(data, offset) {
            Some(timestamp) => {
                frame_timestamp = Some(timestamp);
                offset += 8;
            }
            None => {
                core.invoke_error_message("Dropping synchronized data packet without timestamp");
                return;
            }
        }
    }

    let callback = core.callbacks.new_measurements.lock().clone();
    let Some(callback) = callback else {
        return;
    };

    let (include_time, use_millisecond_resolution) = core.subscription_time_flags();
    let mut parser = CompactMeasurementParser::new(
        core.signal_index_cache(),
        core.base_time_offsets(),
        include_time,
        use_millisecond_resolution,
    );

    let mut measurements: Vec<Measurement> = Vec::new();

    while offset < data.len() {
        if !parser.try_parse(data, &mut offset) {
            core.invoke_error_message("Error parsing measurement");
            break;
        }

        if let Some(measurement) = parser.parsed_measurement() {
            let mut measurement = measurement.clone();
            if let Some(timestamp) = frame_timestamp {
                measurement.timestamp = timestamp;
            }
            measurements.push(measurement);
        }
    }

    callback(&measurements);
}
