//! End-to-end tests driving the server over a real TCP loopback socket, acting as a bare-bones
//! client (the `client` crate duplicates this as a reusable driver).
use core_proto::{value_names, EndpointConfig, SessionType, CONFIRM_CONNECTION, REQUEST_CONNECTION};
use flux::logging::{self, LoggingConfig};
use server::{Callbacks, Server, ServerConfig};
use slog::o;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wire::frame::fields::BinaryPayload;
use wire::{Container, DataMode, Frame, FrameReader, NamedValue, Value};

fn start_server(config: ServerConfig, callbacks: Callbacks) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let logger = logging::init(&LoggingConfig::default()).new(o!("test" => true));
    let server = Arc::new(Server::new(config, callbacks, logger));
    std::thread::spawn(move || {
        let _ = server.serve(listener);
    });
    addr
}

fn request_connection_frame(connection_key: &str, session_type: SessionType, source_id: &str) -> Vec<u8> {
    let request = Container::new_container(
        source_id,
        "client:0",
        "test-server",
        "",
        REQUEST_CONNECTION,
        vec![
            NamedValue::new(value_names::CONNECTION_KEY, Value::String(connection_key.to_string())),
            NamedValue::new(value_names::AUTO_ECHO, Value::Bool(false)),
            NamedValue::new(value_names::AUTO_ECHO_INTERVAL_SECONDS, Value::UInt(0)),
            NamedValue::new(value_names::SESSION_TYPE, Value::Int(session_type.as_i16())),
            NamedValue::new(value_names::BRIDGE_MODE, Value::Bool(false)),
        ],
    );
    Frame::new(DataMode::Packet, request.serialize()).encode()
}

fn read_one_frame(stream: &mut TcpStream) -> Frame {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 1024];
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    loop {
        let n = stream.read(&mut buf).expect("read reply");
        assert!(n > 0, "connection closed before a frame arrived");
        let frames = reader.push(&buf[..n]).expect("well-formed frames");
        if let Some(frame) = frames.into_iter().next() {
            return frame;
        }
    }
}

fn endpoint_config(connection_key: &str) -> EndpointConfig {
    EndpointConfig {
        source_id: "test-server".into(),
        connection_key: connection_key.into(),
        encrypt_mode: false,
        compress_mode: false,
        high_priority_workers: 2,
        normal_priority_workers: 2,
        low_priority_workers: 2,
        session_limit_count: 0,
        possible_session_types: vec![SessionType::MessageLine, SessionType::BinaryLine, SessionType::FileLine],
        ignore_snipping_targets: Vec::new(),
    }
}

#[test]
fn handshake_succeeds_and_confirms_with_matching_key() {
    let config = ServerConfig {
        port: 0,
        endpoint: endpoint_config("correct-horse"),
    };
    let callbacks = Callbacks {
        on_message: Arc::new(|_| {}),
        on_connect: Arc::new(|_, _| {}),
        on_disconnect: Arc::new(|_| {}),
    };
    let addr = start_server(config, callbacks);

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .write_all(&request_connection_frame("correct-horse", SessionType::MessageLine, "client-a"))
        .expect("send request_connection");

    let reply_frame = read_one_frame(&mut stream);
    let reply = Container::deserialize(&reply_frame.payload).expect("parse confirm_connection");
    assert_eq!(reply.header.message_type, CONFIRM_CONNECTION);
    assert_eq!(reply.get_value(value_names::CONFIRM, 0), Some(&Value::Bool(true)));
}

#[test]
fn wrong_key_is_rejected_with_confirm_false() {
    let config = ServerConfig {
        port: 0,
        endpoint: endpoint_config("correct-horse"),
    };
    let callbacks = Callbacks {
        on_message: Arc::new(|_| {}),
        on_connect: Arc::new(|_, _| {}),
        on_disconnect: Arc::new(|_| {}),
    };
    let addr = start_server(config, callbacks);

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .write_all(&request_connection_frame("wrong-key", SessionType::MessageLine, "client-a"))
        .expect("send request_connection");

    let reply_frame = read_one_frame(&mut stream);
    let reply = Container::deserialize(&reply_frame.payload).expect("parse confirm_connection");
    assert_eq!(reply.header.message_type, CONFIRM_CONNECTION);
    assert_eq!(reply.get_value(value_names::CONFIRM, 0), Some(&Value::Bool(false)));
}

#[test]
fn binary_payload_is_relayed_to_its_target_session() {
    let config = ServerConfig {
        port: 0,
        endpoint: endpoint_config("key"),
    };
    let callbacks = Callbacks {
        on_message: Arc::new(|_| {}),
        on_connect: Arc::new(|_, _| {}),
        on_disconnect: Arc::new(|_| {}),
    };
    let addr = start_server(config, callbacks);

    let mut sender = TcpStream::connect(addr).expect("connect sender");
    sender
        .write_all(&request_connection_frame("key", SessionType::BinaryLine, "sender"))
        .expect("sender handshake");
    read_one_frame(&mut sender);

    let mut receiver = TcpStream::connect(addr).expect("connect receiver");
    receiver
        .write_all(&request_connection_frame("key", SessionType::BinaryLine, "receiver"))
        .expect("receiver handshake");
    read_one_frame(&mut receiver);

    let payload = BinaryPayload {
        source_id: "sender".into(),
        source_sub_id: String::new(),
        target_id: "receiver".into(),
        target_sub_id: String::new(),
        data: b"payload bytes".to_vec(),
    };
    sender
        .write_all(&Frame::new(DataMode::Binary, payload.encode()).encode())
        .expect("send binary frame");

    let relayed = read_one_frame(&mut receiver);
    assert_eq!(relayed.mode, DataMode::Binary);
    let decoded = BinaryPayload::decode(&relayed.payload).expect("decode relayed binary payload");
    assert_eq!(decoded.data, b"payload bytes");
}

#[test]
fn broadcast_send_reaches_every_confirmed_session_exactly_once() {
    let config = ServerConfig {
        port: 0,
        endpoint: endpoint_config("key"),
    };
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let received_for_cb = Arc::clone(&received);
    let callbacks = Callbacks {
        on_message: Arc::new(|_| {}),
        on_connect: Arc::new(move |source_id, confirmed| {
            if confirmed {
                received_for_cb.lock().unwrap().push(source_id.to_string());
            }
        }),
        on_disconnect: Arc::new(|_| {}),
    };
    let addr = start_server(config, callbacks);

    let mut client_a = TcpStream::connect(addr).expect("connect a");
    client_a
        .write_all(&request_connection_frame("key", SessionType::MessageLine, "a"))
        .expect("a handshake");
    read_one_frame(&mut client_a);

    let mut client_b = TcpStream::connect(addr).expect("connect b");
    client_b
        .write_all(&request_connection_frame("key", SessionType::MessageLine, "b"))
        .expect("b handshake");
    read_one_frame(&mut client_b);

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(received.lock().unwrap().len(), 2);
}
