//! Command-channel threads: the frame writer and the response reader.
//!
//! The writer owns the sending half of the TCP stream and drains the
//! bounded command queue, writing each framed packet whole. The reader owns
//! the receiving half and performs exact-size reads: an 8-byte payload
//! header, then the packet it announces. Both exit cooperatively when the
//! subscriber starts disconnecting; the reader additionally hands peer-
//! initiated termination to a transient dispatcher thread because it cannot
//! join itself.

use crate::dispatch::{dispatch_connection_terminated, process_server_response};
use crate::protocol::constants::{MAX_COMMAND_PACKET_SIZE, PAYLOAD_HEADER_SIZE};
use crate::protocol::framing;
use crate::subscriber::SubscriberCore;
use crate::types::CommandPacket;
use crossbeam_channel::Receiver;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

/// Writer thread: blocks on the command queue and writes frames in full.
pub(crate) struct CommandWriter {
    stream: TcpStream,
    queue: Receiver<CommandPacket>,
    core: Arc<SubscriberCore>,
}

impl CommandWriter {
    pub fn new(stream: TcpStream, queue: Receiver<CommandPacket>, core: Arc<SubscriberCore>) -> Self {
        Self { stream, queue, core }
    }

    pub fn run(mut self) {
        log::debug!("Command writer started");

        // recv() wakes on a new packet or on queue release (sender dropped)
        while let Ok(packet) = self.queue.recv() {
            if self.core.is_disconnecting() {
                break;
            }

            if let Err(error) = self.stream.write_all(&packet) {
                if !self.core.is_disconnecting() {
                    self.core
                        .dispatch_error_message(format!("Error writing to command channel: {error}"));
                }
                break;
            }

            log::trace!("Wrote {}-byte command frame", packet.len());
        }

        log::debug!("Command writer stopped");
    }
}

/// Reader thread: exact-size framed reads feeding the response router.
pub(crate) struct CommandReader {
    stream: TcpStream,
    core: Arc<SubscriberCore>,
}

enum ReadOutcome {
    Packet,
    Stop,
}

impl CommandReader {
    pub fn new(stream: TcpStream, core: Arc<SubscriberCore>) -> Self {
        Self { stream, core }
    }

    pub fn run(mut self) {
        log::debug!("Command channel reader started");

        let mut header = [0u8; PAYLOAD_HEADER_SIZE];
        let mut buffer: Vec<u8> = Vec::with_capacity(4096);

        loop {
            match self.read_exact(&mut header) {
                ReadOutcome::Packet => {}
                ReadOutcome::Stop => break,
            }
            if self.core.is_disconnecting() {
                break;
            }
            self.core.add_command_bytes(PAYLOAD_HEADER_SIZE as u64);

            let Some(packet_size) = framing::packet_size(&header) else {
                self.fail_fatal("Invalid packet size on command channel");
                break;
            };
            if packet_size > MAX_COMMAND_PACKET_SIZE {
                // Framing desync guard
                self.fail_fatal(&format!(
                    "Command channel packet size {packet_size} exceeds limit"
                ));
                break;
            }

            buffer.resize(packet_size, 0);
            match self.read_exact(&mut buffer) {
                ReadOutcome::Packet => {}
                ReadOutcome::Stop => break,
            }
            if self.core.is_disconnecting() {
                break;
            }
            self.core.add_command_bytes(packet_size as u64);

            process_server_response(&self.core, &buffer);
        }

        log::debug!("Command channel reader stopped");
    }

    /// Read exactly `buffer.len()` bytes, classifying failures.
    ///
    /// Local disconnects exit silently; peer EOF triggers the terminated
    /// dispatcher; any other failure reports once through the error
    /// callback and then terminates the connection the same way.
    fn read_exact(&mut self, buffer: &mut [u8]) -> ReadOutcome {
        match self.stream.read_exact(buffer) {
            Ok(()) => ReadOutcome::Packet,
            Err(error) => {
                if self.core.is_disconnecting() {
                    return ReadOutcome::Stop;
                }

                match error.kind() {
                    ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted => {
                        log::info!("Connection closed by publisher");
                        dispatch_connection_terminated(&self.core);
                    }
                    _ => {
                        self.core.dispatch_error_message(format!(
                            "Error reading from command channel: {error}"
                        ));
                        dispatch_connection_terminated(&self.core);
                    }
                }
                ReadOutcome::Stop
            }
        }
    }

    fn fail_fatal(&self, message: &str) {
        self.core.dispatch_error_message(message.to_string());
        dispatch_connection_terminated(&self.core);
    }
}
