use clap::{App, Arg};
use flux::logging::{self, LoggingConfig};
use server::{Callbacks, Server, ServerConfig};
use slog::{info, o};
use std::sync::Arc;

fn main() {
    let matches = App::new("Messaging Server")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the session/pipeline messaging substrate server.")
        .arg(
            Arg::with_name("CONFIG")
                .help("Path to a TOML server config file; falls back to built-in defaults")
                .required(false),
        )
        .get_matches();

    let config = match matches.value_of("CONFIG") {
        Some(path) => ServerConfig::load(path).expect("failed to load server config"),
        None => ServerConfig::default(),
    };

    let logger = logging::init(&LoggingConfig::default());
    let root = logger.new(o!("component" => "server"));

    let callbacks = Callbacks {
        on_message: Arc::new(|container| {
            println!("message from {}: {}", container.header.source_id, container.header.message_type);
        }),
        on_connect: Arc::new(|source_id, confirmed| {
            println!("connect {} confirmed={}", source_id, confirmed);
        }),
        on_disconnect: Arc::new(|target_id| {
            println!("disconnect {}", target_id);
        }),
    };

    info!(root, "starting server"; "port" => config.port);
    let server = Arc::new(Server::new(config, callbacks, root));
    server.run().expect("server loop exited with an error");
}
