//! UDP data-channel tests: subscription with a side channel, datagram
//! decoding, and unsubscribe tearing down only the data path.

mod common;

use common::{
    MockPublisher, data_packet_body, measurement_with_time, recv_within, response_packet,
    send_datagram, signal_index_cache_body,
};
use gep_subscriber::protocol::constants::{
    CMD_SUBSCRIBE, CMD_UNSUBSCRIBE, RESPONSE_DATA_PACKET, RESPONSE_SUCCEEDED,
    RESPONSE_UPDATE_SIGNAL_INDEX_CACHE,
};
use gep_subscriber::{DataSubscriber, SubscriptionInfo};
use std::net::UdpSocket;
use std::sync::mpsc;
use std::time::Duration;
use uuid::Uuid;

const GUID: [u8; 16] = [0x42; 16];

/// Reserve a free local UDP port for the data channel.
fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("probe port");
    socket.local_addr().expect("local addr").port()
}

#[test]
fn datagrams_are_decoded_like_command_channel_data_packets() {
    let publisher = MockPublisher::start();
    let subscriber = DataSubscriber::new();

    let (batch_tx, batch_rx) = mpsc::channel();
    subscriber.register_new_measurements_callback(move |measurements| {
        batch_tx.send(measurements.to_vec()).expect("report batch");
    });
    let (status_tx, status_rx) = mpsc::channel();
    subscriber.register_status_message_callback(move |message| {
        status_tx.send(message.to_string()).expect("report status");
    });

    subscriber.connect("127.0.0.1", publisher.port()).expect("connect");
    let mut connection = publisher.accept();
    connection.read_command(); // operational modes

    let udp_port = free_udp_port();
    let info = SubscriptionInfo {
        udp_data_channel: true,
        data_channel_local_port: udp_port,
        ..Default::default()
    };
    subscriber.subscribe(info).expect("subscribe");

    let (command, data) = connection.read_command();
    assert_eq!(command, CMD_SUBSCRIBE);
    let connection_string = String::from_utf8(data[5..].to_vec()).expect("utf-8");
    assert!(connection_string.contains(&format!("dataChannel={{localport={udp_port}}};")));

    // Identity arrives on the command channel, data on the side channel.
    // The subscribe acknowledgement behind the cache update confirms the
    // cache has been applied before any datagram is sent.
    connection.send_response(
        RESPONSE_UPDATE_SIGNAL_INDEX_CACHE,
        0,
        &signal_index_cache_body(&[(7, GUID, "PPA", 3)]),
    );
    connection.send_response(RESPONSE_SUCCEEDED, CMD_SUBSCRIBE, b"OK");
    recv_within(&status_rx, "subscribe status");

    let packet = response_packet(
        RESPONSE_DATA_PACKET,
        0,
        &data_packet_body(0, 1, None, &measurement_with_time(7, 60.0, 12_345)),
    );
    send_datagram(udp_port, &packet);

    let batch = recv_within(&batch_rx, "datagram batch");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].signal_id, Uuid::from_bytes(GUID));
    assert_eq!(batch[0].value, 60.0);
    assert_eq!(batch[0].timestamp, 12_345);

    assert_eq!(
        subscriber.total_data_channel_bytes_received(),
        packet.len() as u64
    );
    assert!(subscriber.total_command_channel_bytes_received() > 0);

    subscriber.disconnect();
}

#[test]
fn unsubscribe_stops_the_data_channel_but_keeps_the_connection() {
    let publisher = MockPublisher::start();
    let subscriber = DataSubscriber::new();

    let (batch_tx, batch_rx) = mpsc::channel();
    subscriber.register_new_measurements_callback(move |measurements| {
        batch_tx.send(measurements.to_vec()).expect("report batch");
    });
    let (status_tx, status_rx) = mpsc::channel();
    subscriber.register_status_message_callback(move |message| {
        status_tx.send(message.to_string()).expect("report status");
    });

    subscriber.connect("127.0.0.1", publisher.port()).expect("connect");
    let mut connection = publisher.accept();
    connection.read_command(); // operational modes

    let udp_port = free_udp_port();
    let info = SubscriptionInfo {
        udp_data_channel: true,
        data_channel_local_port: udp_port,
        ..Default::default()
    };
    subscriber.subscribe(info).expect("subscribe");
    connection.read_command(); // subscribe

    connection.send_response(RESPONSE_SUCCEEDED, CMD_SUBSCRIBE, b"OK");
    recv_within(&status_rx, "subscribe status");
    assert!(subscriber.is_subscribed());

    connection.send_response(
        RESPONSE_UPDATE_SIGNAL_INDEX_CACHE,
        0,
        &signal_index_cache_body(&[(7, GUID, "PPA", 3)]),
    );

    subscriber.unsubscribe().expect("unsubscribe");

    let (command, _) = connection.read_command();
    assert_eq!(command, CMD_UNSUBSCRIBE);
    connection.send_response(RESPONSE_SUCCEEDED, CMD_UNSUBSCRIBE, b"");
    recv_within(&status_rx, "unsubscribe status");
    assert!(!subscriber.is_subscribed());
    assert!(subscriber.is_connected());

    // The data socket is gone; datagrams are no longer delivered
    let packet = response_packet(
        RESPONSE_DATA_PACKET,
        0,
        &data_packet_body(0, 1, None, &measurement_with_time(7, 1.0, 0)),
    );
    send_datagram(udp_port, &packet);
    assert!(batch_rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(subscriber.total_data_channel_bytes_received(), 0);

    subscriber.disconnect();
}

#[test]
fn resubscribing_replaces_the_active_subscription() {
    let publisher = MockPublisher::start();
    let subscriber = DataSubscriber::new();

    let (status_tx, status_rx) = mpsc::channel();
    subscriber.register_status_message_callback(move |message| {
        status_tx.send(message.to_string()).expect("report status");
    });

    subscriber.connect("127.0.0.1", publisher.port()).expect("connect");
    let mut connection = publisher.accept();
    connection.read_command(); // operational modes

    subscriber
        .subscribe(SubscriptionInfo {
            filter_expression: "first".into(),
            ..Default::default()
        })
        .expect("first subscribe");
    connection.read_command();
    connection.send_response(RESPONSE_SUCCEEDED, CMD_SUBSCRIBE, b"OK");
    recv_within(&status_rx, "first subscribe status");
    assert!(subscriber.is_subscribed());

    // Subscribing while subscribed unsubscribes first
    subscriber
        .subscribe(SubscriptionInfo {
            filter_expression: "second".into(),
            ..Default::default()
        })
        .expect("second subscribe");

    let (command, _) = connection.read_command();
    assert_eq!(command, CMD_UNSUBSCRIBE);
    let (command, data) = connection.read_command();
    assert_eq!(command, CMD_SUBSCRIBE);
    let connection_string = String::from_utf8(data[5..].to_vec()).expect("utf-8");
    assert!(connection_string.contains("inputMeasurementKeys={second};"));

    assert_eq!(
        subscriber.current_subscription().filter_expression,
        "second"
    );

    subscriber.disconnect();
}
