//! GEP subscriber facade and connection lifecycle.
//!
//! [`DataSubscriber`] owns a shared [`SubscriberCore`] and up to four
//! background threads while connected:
//!
//! | Thread | Role |
//! |---|---|
//! | `gep-command-writer` | drains the bounded command queue onto the TCP socket |
//! | `gep-callback` | runs every user callback, in response-arrival order |
//! | `gep-command-reader` | framed exact-size reads, response routing |
//! | `gep-data-reader` | optional UDP datagram reads (per subscription) |
//!
//! Cancellation is cooperative: `disconnect` raises the disconnecting flag,
//! releases both queues, closes the sockets to unblock reads, and joins the
//! threads in order. A separate data-channel shutdown flag lets
//! `unsubscribe` stop only the UDP reader, so the command-channel threads
//! never observe a transient teardown signal.

use crate::dispatch::{self, CallbackDispatch, DispatcherFn};
use crate::error::{Error, Result};
use crate::protocol::constants::{
    CMD_DEFINE_OPERATIONAL_MODES, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE, DATA_PACKET_COMPACT,
    OP_ENCODING_UTF8, OP_MODE_COMMON_SERIALIZATION, OP_MODE_COMPRESS_METADATA,
};
use crate::protocol::framing;
use crate::protocol::signal_index::SignalIndexCache;
use crate::streaming::{CommandReader, CommandWriter, DataReader};
use crate::subscription::SubscriptionInfo;
use crate::types::{
    BaseTimeOffsets, Callbacks, CommandPacket, ConnectionTerminatedCallback,
    DataStartTimeCallback, Measurement, MessageCallback, MetadataCallback,
    NewMeasurementsCallback,
};
use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Outbound commands buffered between the caller and the writer thread
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// UDP read timeout so the data reader can observe shutdown flags
const UDP_READ_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Default)]
struct ThreadHandles {
    command_writer: Option<JoinHandle<()>>,
    callback_dispatcher: Option<JoinHandle<()>>,
    command_reader: Option<JoinHandle<()>>,
    data_reader: Option<JoinHandle<()>>,
}

/// Shared subscriber state: sockets, queues, protocol caches, counters,
/// flags, and callback slots. Reader threads and the facade hold it behind
/// one `Arc`.
pub(crate) struct SubscriberCore {
    // Transport
    command_socket: Mutex<Option<TcpStream>>,
    data_socket: Mutex<Option<Arc<UdpSocket>>>,
    remote_address: Mutex<Option<SocketAddr>>,

    // Queue senders; taking them releases the queues
    command_tx: Mutex<Option<Sender<CommandPacket>>>,
    callback_tx: Mutex<Option<Sender<CallbackDispatch>>>,

    // Protocol state written by the command reader, read by parsers
    signal_index_cache: RwLock<Arc<SignalIndexCache>>,
    base_times: RwLock<BaseTimeOffsets>,
    current_subscription: Mutex<SubscriptionInfo>,

    // Lifecycle flags
    connected: AtomicBool,
    subscribed: AtomicBool,
    disconnecting: AtomicBool,
    data_shutdown: AtomicBool,
    compress_metadata: AtomicBool,
    termination_dispatched: AtomicBool,

    // Counters; each is written from exactly one thread
    total_command_channel_bytes: AtomicU64,
    total_data_channel_bytes: AtomicU64,
    total_measurements: AtomicU64,

    pub(crate) callbacks: Callbacks,

    threads: Mutex<ThreadHandles>,
    // Serializes connect/disconnect/subscribe transitions
    lifecycle: Mutex<()>,
}

impl SubscriberCore {
    fn new() -> Self {
        Self {
            command_socket: Mutex::new(None),
            data_socket: Mutex::new(None),
            remote_address: Mutex::new(None),
            command_tx: Mutex::new(None),
            callback_tx: Mutex::new(None),
            signal_index_cache: RwLock::new(Arc::new(SignalIndexCache::new())),
            base_times: RwLock::new(BaseTimeOffsets::default()),
            current_subscription: Mutex::new(SubscriptionInfo::default()),
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            data_shutdown: AtomicBool::new(false),
            compress_metadata: AtomicBool::new(false),
            termination_dispatched: AtomicBool::new(false),
            total_command_channel_bytes: AtomicU64::new(0),
            total_data_channel_bytes: AtomicU64::new(0),
            total_measurements: AtomicU64::new(0),
            callbacks: Callbacks::default(),
            threads: Mutex::new(ThreadHandles::default()),
            lifecycle: Mutex::new(()),
        }
    }

    // === Flags and counters ===

    pub(crate) fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Relaxed)
    }

    pub(crate) fn is_data_shutdown(&self) -> bool {
        self.data_shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }

    pub(crate) fn add_command_bytes(&self, count: u64) {
        self.total_command_channel_bytes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_data_bytes(&self, count: u64) {
        self.total_data_channel_bytes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_measurements_received(&self, count: u64) {
        self.total_measurements.fetch_add(count, Ordering::Relaxed);
    }

    /// First caller wins the right to run the terminated dispatcher.
    pub(crate) fn begin_termination(&self) -> bool {
        !self.termination_dispatched.swap(true, Ordering::SeqCst)
    }

    // === Protocol state ===

    pub(crate) fn signal_index_cache(&self) -> Arc<SignalIndexCache> {
        Arc::clone(&self.signal_index_cache.read())
    }

    pub(crate) fn replace_signal_index_cache(&self, cache: SignalIndexCache) {
        *self.signal_index_cache.write() = Arc::new(cache);
    }

    pub(crate) fn base_time_offsets(&self) -> BaseTimeOffsets {
        *self.base_times.read()
    }

    pub(crate) fn set_base_times(&self, base: BaseTimeOffsets) {
        *self.base_times.write() = base;
    }

    pub(crate) fn subscription_time_flags(&self) -> (bool, bool) {
        let info = self.current_subscription.lock();
        (info.include_time, info.use_millisecond_resolution)
    }

    // === Command and callback queues ===

    pub(crate) fn send_server_command(&self, command: u8, data: &[u8]) -> Result<()> {
        let sender = self.command_tx.lock().clone();
        let Some(sender) = sender else {
            return Err(Error::NotConnected);
        };

        log::trace!("Queueing command 0x{command:02X} ({} data bytes)", data.len());
        sender
            .send(framing::frame_command(command, data))
            .map_err(|_| Error::NotConnected)
    }

    pub(crate) fn send_operational_modes(&self) -> Result<()> {
        let mut modes = OP_ENCODING_UTF8 | OP_MODE_COMMON_SERIALIZATION;
        if self.compress_metadata.load(Ordering::Relaxed) {
            modes |= OP_MODE_COMPRESS_METADATA;
        }
        self.send_server_command(CMD_DEFINE_OPERATIONAL_MODES, &modes.to_be_bytes())
    }

    /// Copy a payload and queue it for the callback-dispatcher thread.
    pub(crate) fn dispatch(&self, function: DispatcherFn, data: &[u8]) {
        let sender = self.callback_tx.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(CallbackDispatch { function, data: data.to_vec() });
        }
    }

    pub(crate) fn dispatch_status_message(&self, message: String) {
        self.dispatch(dispatch::status_message_dispatcher, message.as_bytes());
    }

    pub(crate) fn dispatch_error_message(&self, message: String) {
        log::warn!("{message}");
        self.dispatch(dispatch::error_message_dispatcher, message.as_bytes());
    }

    /// Invoke the error callback directly; used from the dispatcher thread
    /// where queueing would reorder the error behind the batch it concerns.
    pub(crate) fn invoke_error_message(&self, message: &str) {
        log::warn!("{message}");
        let callback = self.callbacks.error_message.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    pub(crate) fn invoke_connection_terminated(&self) {
        let callback = self.callbacks.connection_terminated.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    // === Lifecycle ===

    /// Tear down the connection. No-op when already disconnected; blocks
    /// until every background thread has joined otherwise.
    pub(crate) fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }

        log::info!("Disconnecting from publisher");
        self.teardown();
        log::info!("Disconnect complete");
    }

    /// Shared teardown path for `disconnect` and a failed `connect`.
    /// Caller holds the lifecycle lock.
    fn teardown(&self) {
        self.disconnecting.store(true, Ordering::SeqCst);
        self.data_shutdown.store(true, Ordering::SeqCst);

        // Release the queues so blocked threads wake
        self.command_tx.lock().take();
        self.callback_tx.lock().take();

        // Close sockets to unblock reads
        if let Some(socket) = self.command_socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.data_socket.lock().take();

        let handles = {
            let mut threads = self.threads.lock();
            std::mem::take(&mut *threads)
        };
        for handle in [
            handles.command_writer,
            handles.callback_dispatcher,
            handles.command_reader,
            handles.data_reader,
        ]
        .into_iter()
        .flatten()
        {
            if handle.join().is_err() {
                log::error!("Subscriber thread panicked during shutdown");
            }
        }

        self.subscribed.store(false, Ordering::SeqCst);
        self.disconnecting.store(false, Ordering::SeqCst);
        self.data_shutdown.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Stop the UDP data channel only, leaving the command channel alive.
    fn shutdown_data_channel(&self) {
        self.data_shutdown.store(true, Ordering::SeqCst);
        self.data_socket.lock().take();

        let handle = self.threads.lock().data_reader.take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::error!("Data channel reader panicked during shutdown");
        }

        self.data_shutdown.store(false, Ordering::SeqCst);
    }

    pub(crate) fn unsubscribe(&self) -> Result<()> {
        self.shutdown_data_channel();
        self.send_server_command(CMD_UNSUBSCRIBE, &[])
    }
}

/// Subscriber-side endpoint of the Gateway Exchange Protocol.
///
/// Reusable across connect/disconnect cycles. All user callbacks run on a
/// single dedicated dispatcher thread in response-arrival order; the
/// connection-terminated callback runs on its own transient thread after
/// teardown, so it may reconnect directly.
///
/// # Examples
///
/// ```no_run
/// use gep_subscriber::{DataSubscriber, SubscriptionInfo};
///
/// # fn main() -> gep_subscriber::Result<()> {
/// let subscriber = DataSubscriber::new();
///
/// subscriber.register_status_message_callback(|message| println!("{message}"));
/// subscriber.register_new_measurements_callback(|measurements| {
///     for m in measurements {
///         println!("{} = {} @ {}", m.signal_id, m.value, m.timestamp);
///     }
/// });
///
/// subscriber.connect("localhost", 6165)?;
/// subscriber.subscribe(SubscriptionInfo {
///     filter_expression: "FILTER ActiveMeasurements WHERE SignalType = 'FREQ'".into(),
///     ..Default::default()
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct DataSubscriber {
    core: Arc<SubscriberCore>,
}

impl DataSubscriber {
    pub fn new() -> Self {
        Self { core: Arc::new(SubscriberCore::new()) }
    }

    // === Connection lifecycle ===

    /// Resolve and connect to the publisher, start the background threads,
    /// and negotiate operational modes.
    ///
    /// Fails fast when already connected; a setup failure leaves the
    /// subscriber disconnected.
    pub fn connect(&self, hostname: &str, port: u16) -> Result<()> {
        let lifecycle = self.core.lifecycle.lock();
        if self.core.connected.load(Ordering::SeqCst) {
            return Err(Error::AlreadyConnected);
        }

        log::info!("Connecting to publisher at {hostname}:{port}");
        let stream = TcpStream::connect((hostname, port))?;
        let remote = stream.peer_addr()?;
        *self.core.remote_address.lock() = Some(remote);

        self.core.total_command_channel_bytes.store(0, Ordering::SeqCst);
        self.core.total_data_channel_bytes.store(0, Ordering::SeqCst);
        self.core.total_measurements.store(0, Ordering::SeqCst);
        self.core.termination_dispatched.store(false, Ordering::SeqCst);
        self.core.disconnecting.store(false, Ordering::SeqCst);
        self.core.data_shutdown.store(false, Ordering::SeqCst);

        let (command_tx, command_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (callback_tx, callback_rx) = unbounded();
        *self.core.command_tx.lock() = Some(command_tx);
        *self.core.callback_tx.lock() = Some(callback_tx);

        let result = (|| -> Result<()> {
            let writer_stream = stream.try_clone()?;
            let reader_stream = stream.try_clone()?;
            *self.core.command_socket.lock() = Some(stream);

            let writer = CommandWriter::new(writer_stream, command_rx, Arc::clone(&self.core));
            self.core.threads.lock().command_writer = Some(
                thread::Builder::new()
                    .name("gep-command-writer".to_string())
                    .spawn(move || writer.run())?,
            );

            let dispatcher_core = Arc::clone(&self.core);
            self.core.threads.lock().callback_dispatcher = Some(
                thread::Builder::new()
                    .name("gep-callback".to_string())
                    .spawn(move || dispatch::run_callback_dispatcher(dispatcher_core, callback_rx))?,
            );

            let reader = CommandReader::new(reader_stream, Arc::clone(&self.core));
            self.core.threads.lock().command_reader = Some(
                thread::Builder::new()
                    .name("gep-command-reader".to_string())
                    .spawn(move || reader.run())?,
            );

            self.core.send_operational_modes()
        })();

        if let Err(error) = result {
            self.core.teardown();
            return Err(error);
        }

        self.core.connected.store(true, Ordering::SeqCst);
        drop(lifecycle);

        log::info!("Connected to publisher at {remote}");
        Ok(())
    }

    /// Disconnect and join all background threads. No-op when already
    /// disconnected.
    pub fn disconnect(&self) {
        self.core.disconnect();
    }

    // === Subscription ===

    /// Request delivery of the signals described by `info`.
    ///
    /// An active subscription is unsubscribed first, so at most one is ever
    /// live. When `info` requests a UDP data channel, a local socket is
    /// bound (address family matching the publisher) and its reader thread
    /// started before the Subscribe command is queued.
    pub fn subscribe(&self, info: SubscriptionInfo) -> Result<()> {
        let _lifecycle = self.core.lifecycle.lock();
        if !self.core.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        if self.core.subscribed.load(Ordering::SeqCst) {
            self.core.unsubscribe()?;
        }
        // No data channel may outlive the subscription that requested it
        self.core.shutdown_data_channel();

        *self.core.current_subscription.lock() = info.clone();
        self.core.total_measurements.store(0, Ordering::SeqCst);

        let connection_string = info.to_connection_string();
        log::debug!("Subscribing with connection string: {connection_string}");

        if info.udp_data_channel {
            let remote = (*self.core.remote_address.lock()).ok_or(Error::NotConnected)?;
            let bind_address: SocketAddr = match remote.ip() {
                IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, info.data_channel_local_port).into(),
                IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, info.data_channel_local_port).into(),
            };

            let socket = UdpSocket::bind(bind_address)?;
            socket.set_read_timeout(Some(UDP_READ_TIMEOUT))?;
            let socket = Arc::new(socket);
            *self.core.data_socket.lock() = Some(Arc::clone(&socket));

            let reader = DataReader::new(socket, Arc::clone(&self.core));
            self.core.threads.lock().data_reader = Some(
                thread::Builder::new()
                    .name("gep-data-reader".to_string())
                    .spawn(move || reader.run())?,
            );

            log::info!("Data channel listening on UDP port {}", info.data_channel_local_port);
        }

        let string_bytes = connection_string.as_bytes();
        let mut payload = Vec::with_capacity(5 + string_bytes.len());
        payload.push(DATA_PACKET_COMPACT);
        payload.extend_from_slice(&(string_bytes.len() as u32).to_be_bytes());
        payload.extend_from_slice(string_bytes);

        self.core.send_server_command(CMD_SUBSCRIBE, &payload)
    }

    /// Stop the active subscription: tear down the UDP data channel, then
    /// send the Unsubscribe command. The subscribed flag clears when the
    /// publisher acknowledges.
    pub fn unsubscribe(&self) -> Result<()> {
        let _lifecycle = self.core.lifecycle.lock();
        self.core.unsubscribe()
    }

    /// Queue a raw server command with optional data.
    pub fn send_server_command(&self, command: u8, data: &[u8]) -> Result<()> {
        self.core.send_server_command(command, data)
    }

    // === Operational modes ===

    pub fn is_metadata_compressed(&self) -> bool {
        self.core.compress_metadata.load(Ordering::Relaxed)
    }

    /// Toggle metadata compression; re-negotiates operational modes
    /// immediately when connected.
    pub fn set_metadata_compressed(&self, compressed: bool) -> Result<()> {
        self.core.compress_metadata.store(compressed, Ordering::SeqCst);
        if self.core.connected.load(Ordering::SeqCst) {
            self.core.send_operational_modes()
        } else {
            Ok(())
        }
    }

    // === Callback registration ===

    pub fn register_status_message_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        *self.core.callbacks.status_message.lock() = Some(callback);
    }

    pub fn register_error_message_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        *self.core.callbacks.error_message.lock() = Some(callback);
    }

    pub fn register_data_start_time_callback<F>(&self, callback: F)
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        let callback: DataStartTimeCallback = Arc::new(callback);
        *self.core.callbacks.data_start_time.lock() = Some(callback);
    }

    pub fn register_metadata_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let callback: MetadataCallback = Arc::new(callback);
        *self.core.callbacks.metadata.lock() = Some(callback);
    }

    pub fn register_new_measurements_callback<F>(&self, callback: F)
    where
        F: Fn(&[Measurement]) + Send + Sync + 'static,
    {
        let callback: NewMeasurementsCallback = Arc::new(callback);
        *self.core.callbacks.new_measurements.lock() = Some(callback);
    }

    pub fn register_processing_complete_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        *self.core.callbacks.processing_complete.lock() = Some(callback);
    }

    pub fn register_connection_terminated_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: ConnectionTerminatedCallback = Arc::new(callback);
        *self.core.callbacks.connection_terminated.lock() = Some(callback);
    }

    // === State and statistics ===

    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.core.subscribed.load(Ordering::SeqCst)
    }

    /// Bytes received on the command channel since the last connect.
    pub fn total_command_channel_bytes_received(&self) -> u64 {
        self.core.total_command_channel_bytes.load(Ordering::Relaxed)
    }

    /// Bytes received on the UDP data channel since the last connect.
    pub fn total_data_channel_bytes_received(&self) -> u64 {
        self.core.total_data_channel_bytes.load(Ordering::Relaxed)
    }

    /// Measurements received since the last subscribe.
    pub fn total_measurements_received(&self) -> u64 {
        self.core.total_measurements.load(Ordering::Relaxed)
    }

    /// The most recent subscription parameters.
    pub fn current_subscription(&self) -> SubscriptionInfo {
        self.core.current_subscription.lock().clone()
    }
}

impl Default for DataSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DataSubscriber {
    fn drop(&mut self) {
        self.core.disconnect();
    }
}
