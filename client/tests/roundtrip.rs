//! End-to-end tests driving the `client` crate against a live `server::Server` over loopback TCP.
use client::{Callbacks as ClientCallbacks, Client, ClientConfig};
use core_proto::{EndpointConfig, SessionType};
use flux::logging::{self, LoggingConfig};
use server::{Callbacks as ServerCallbacks, Server, ServerConfig};
use slog::o;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wire::Container;

fn endpoint_config(source_id: &str, connection_key: &str) -> EndpointConfig {
    EndpointConfig {
        source_id: source_id.into(),
        connection_key: connection_key.into(),
        encrypt_mode: true,
        compress_mode: false,
        high_priority_workers: 2,
        normal_priority_workers: 2,
        low_priority_workers: 2,
        session_limit_count: 0,
        possible_session_types: vec![SessionType::MessageLine, SessionType::BinaryLine, SessionType::FileLine],
        ignore_snipping_targets: Vec::new(),
    }
}

fn start_server(connection_key: &str) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let logger = logging::init(&LoggingConfig::default()).new(o!("test" => true));
    let config = ServerConfig {
        port: 0,
        endpoint: endpoint_config("test-server", connection_key),
    };
    let callbacks = ServerCallbacks {
        on_message: Arc::new(|_| {}),
        on_connect: Arc::new(|_, _| {}),
        on_disconnect: Arc::new(|_| {}),
    };
    let server = Arc::new(Server::new(config, callbacks, logger));
    std::thread::spawn(move || {
        let _ = server.serve(listener);
    });
    addr
}

#[test]
fn client_handshake_confirms_against_a_live_server() {
    let addr = start_server("shared-secret");
    let logger = logging::init(&LoggingConfig::default()).new(o!("test" => "client"));

    let confirmed: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let confirmed_cb = Arc::clone(&confirmed);
    let callbacks = ClientCallbacks {
        on_message: Arc::new(|_| {}),
        on_connect: Arc::new(move |ok| {
            *confirmed_cb.lock().unwrap() = Some(ok);
        }),
        on_disconnect: Arc::new(|| {}),
    };

    let config = ClientConfig {
        ip: addr.ip().to_string(),
        port: addr.port(),
        server_id: "test-server".into(),
        session_type: SessionType::MessageLine,
        receive_buffer_size: 64 * 1024,
        endpoint: endpoint_config("client-a", "shared-secret"),
    };
    let client = Client::start(config, callbacks, logger).expect("client connects");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while confirmed.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*confirmed.lock().unwrap(), Some(true));
    assert!(client.is_confirmed());
    client.stop();
}

#[test]
fn client_handshake_is_rejected_with_wrong_key() {
    let addr = start_server("shared-secret");
    let logger = logging::init(&LoggingConfig::default()).new(o!("test" => "client"));

    let confirmed: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let confirmed_cb = Arc::clone(&confirmed);
    let callbacks = ClientCallbacks {
        on_message: Arc::new(|_: &Container| {}),
        on_connect: Arc::new(move |ok| {
            *confirmed_cb.lock().unwrap() = Some(ok);
        }),
        on_disconnect: Arc::new(|| {}),
    };

    let config = ClientConfig {
        ip: addr.ip().to_string(),
        port: addr.port(),
        server_id: "test-server".into(),
        session_type: SessionType::MessageLine,
        receive_buffer_size: 64 * 1024,
        endpoint: endpoint_config("client-a", "wrong-secret"),
    };
    let client = Client::start(config, callbacks, logger).expect("client connects");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while confirmed.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*confirmed.lock().unwrap(), Some(false));
    assert!(!client.is_confirmed());
    client.stop();
}
