//! In-process mock publisher for integration tests.
//!
//! Listens on an ephemeral localhost port, reads framed subscriber
//! commands, and writes framed responses, so tests can drive the real
//! subscriber end-to-end over actual sockets.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::Once;
use std::sync::mpsc::Receiver;
use std::time::Duration;

pub const MARKER: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub struct MockPublisher {
    listener: TcpListener,
    port: u16,
}

impl MockPublisher {
    pub fn start() -> Self {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock publisher");
        let port = listener.local_addr().expect("local addr").port();
        Self { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block until the subscriber connects.
    pub fn accept(&self) -> PublisherConnection {
        let (stream, _) = self.listener.accept().expect("accept subscriber");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set read timeout");
        PublisherConnection { stream }
    }
}

pub struct PublisherConnection {
    stream: TcpStream,
}

impl PublisherConnection {
    /// Read one framed command; returns `(command code, command data)`.
    pub fn read_command(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header).expect("read command header");
        assert_eq!(&header[..4], &MARKER, "command frame missing marker");

        let size = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        assert!(size >= 1, "command frame without command code");

        let mut payload = vec![0u8; size as usize];
        self.stream.read_exact(&mut payload).expect("read command payload");
        (payload[0], payload[1..].to_vec())
    }

    /// Read one framed command and return the raw payload bytes.
    pub fn read_command_payload(&mut self) -> Vec<u8> {
        let (code, data) = self.read_command();
        let mut payload = vec![code];
        payload.extend_from_slice(&data);
        payload
    }

    /// Write one framed response packet.
    pub fn send_response(&mut self, response_code: u8, command_code: u8, body: &[u8]) {
        let packet_size = (6 + body.len()) as i32;
        let mut frame = Vec::with_capacity(8 + 6 + body.len());
        frame.extend_from_slice(&[0u8; 4]);
        frame.extend_from_slice(&packet_size.to_le_bytes());
        frame.push(response_code);
        frame.push(command_code);
        frame.extend_from_slice(&[0u8; 4]);
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).expect("write response frame");
    }

    /// Returns true once the subscriber has closed its end.
    pub fn subscriber_closed(&mut self) -> bool {
        let mut probe = [0u8; 1];
        matches!(self.stream.read(&mut probe), Ok(0))
    }

    pub fn close(self) {
        drop(self.stream);
    }
}

/// Response packet bytes (6-byte header + body) without TCP framing, as
/// carried in one UDP datagram.
pub fn response_packet(response_code: u8, command_code: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + body.len());
    packet.push(response_code);
    packet.push(command_code);
    packet.extend_from_slice(&[0u8; 4]);
    packet.extend_from_slice(body);
    packet
}

/// Send one datagram to the subscriber's UDP data channel.
pub fn send_datagram(port: u16, packet: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind datagram source");
    socket.send_to(packet, ("127.0.0.1", port)).expect("send datagram");
}

// === Response body builders ===

/// `UpdateSignalIndexCache` body for the given entries.
pub fn signal_index_cache_body(entries: &[(u16, [u8; 16], &str, u32)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0, 0, 0, 4]); // length field
    body.extend_from_slice(&[0u8; 16]); // subscriber GUID
    body.extend_from_slice(&(entries.len() as i32).to_be_bytes());
    for (index, guid, source, id) in entries {
        body.extend_from_slice(&index.to_be_bytes());
        body.extend_from_slice(guid);
        body.extend_from_slice(&(source.len() as i32).to_be_bytes());
        body.extend_from_slice(source.as_bytes());
        body.extend_from_slice(&id.to_be_bytes());
    }
    body
}

/// `UpdateBaseTimes` body.
pub fn base_times_body(time_index: i32, offsets: [i64; 2]) -> Vec<u8> {
    let mut body = Vec::with_capacity(20);
    body.extend_from_slice(&time_index.to_be_bytes());
    body.extend_from_slice(&offsets[0].to_be_bytes());
    body.extend_from_slice(&offsets[1].to_be_bytes());
    body
}

/// One compact measurement with an absolute timestamp (includeTime=true).
pub fn measurement_with_time(signal_index: u16, value: f32, timestamp: i64) -> Vec<u8> {
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(&signal_index.to_be_bytes());
    bytes.extend_from_slice(&value.to_be_bytes());
    bytes.extend_from_slice(&timestamp.to_be_bytes());
    bytes
}

/// One compact measurement with a u32 tick delta (includeTime=false).
pub fn measurement_with_tick_delta(signal_index: u16, value: f32, delta: u32) -> Vec<u8> {
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(&signal_index.to_be_bytes());
    bytes.extend_from_slice(&value.to_be_bytes());
    bytes.extend_from_slice(&delta.to_be_bytes());
    bytes
}

/// `DataPacket` body wrapping the given measurement bytes.
pub fn data_packet_body(flags: u8, count: i32, frame_timestamp: Option<i64>, measurements: &[u8]) -> Vec<u8> {
    let mut body = vec![flags];
    body.extend_from_slice(&count.to_be_bytes());
    if let Some(timestamp) = frame_timestamp {
        body.extend_from_slice(&timestamp.to_be_bytes());
    }
    body.extend_from_slice(measurements);
    body
}

/// Wait on a test channel with a deadline, panicking with `what` on timeout.
pub fn recv_within<T>(receiver: &Receiver<T>, what: &str) -> T {
    receiver
        .recv_timeout(Duration::from_secs(5))
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
