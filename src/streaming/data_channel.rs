//! UDP data-channel reader.
//!
//! Each datagram is a self-contained response packet (no 8-byte framing
//! prefix) and is handed to the same router the command channel uses. The
//! socket carries a short read timeout so the loop can observe the data
//! channel's own shutdown signal as well as a whole-subscriber disconnect;
//! `unsubscribe` tears this channel down without disturbing the command
//! channel threads.

use crate::dispatch::process_server_response;
use crate::protocol::constants::MAX_UDP_PACKET_SIZE;
use crate::subscriber::SubscriberCore;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;

pub(crate) struct DataReader {
    socket: Arc<UdpSocket>,
    core: Arc<SubscriberCore>,
}

impl DataReader {
    pub fn new(socket: Arc<UdpSocket>, core: Arc<SubscriberCore>) -> Self {
        Self { socket, core }
    }

    fn should_stop(&self) -> bool {
        self.core.is_data_shutdown() || self.core.is_disconnecting()
    }

    pub fn run(self) {
        log::debug!("Data channel reader started");

        let mut buffer = vec![0u8; MAX_UDP_PACKET_SIZE];

        loop {
            if self.should_stop() {
                break;
            }

            match self.socket.recv_from(&mut buffer) {
                Ok((length, _)) => {
                    if self.should_stop() {
                        break;
                    }
                    self.core.add_data_bytes(length as u64);
                    process_server_response(&self.core, &buffer[..length]);
                }
                // Read timeout; loop around to re-check the shutdown flags
                Err(error)
                    if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(error) => {
                    if !self.should_stop() {
                        self.core
                            .dispatch_error_message(format!("Error reading from data channel: {error}"));
                    }
                    break;
                }
            }
        }

        log::debug!("Data channel reader stopped");
    }
}
