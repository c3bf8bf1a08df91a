use clap::{App, Arg};
use client::{Callbacks, Client, ClientConfig};
use flux::logging::{self, LoggingConfig};
use slog::{info, o};
use std::sync::Arc;

fn main() {
    let matches = App::new("Messaging Client")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Connects to a messaging server and prints inbound traffic.")
        .arg(
            Arg::with_name("CONFIG")
                .help("Path to a TOML client config file; falls back to built-in defaults")
                .required(false),
        )
        .get_matches();

    let config = match matches.value_of("CONFIG") {
        Some(path) => ClientConfig::load(path).expect("failed to load client config"),
        None => ClientConfig::default(),
    };

    let logger = logging::init(&LoggingConfig::default());
    let root = logger.new(o!("component" => "client"));

    let callbacks = Callbacks {
        on_message: Arc::new(|container| {
            println!("message from {}: {}", container.header.source_id, container.header.message_type);
        }),
        on_connect: Arc::new(|confirmed| {
            println!("handshake confirmed={}", confirmed);
        }),
        on_disconnect: Arc::new(|| {
            println!("disconnected");
        }),
    };

    info!(root, "connecting"; "ip" => &config.ip, "port" => config.port);
    let _client = Client::start(config, callbacks, root).expect("failed to start client");
    loop {
        std::thread::park();
    }
}
