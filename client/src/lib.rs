//! The client driver: a single session, its own priority pool, and the socket read loop that
//! negotiates the handshake and dispatches inbound frames (C7).
pub mod config;
pub mod driver;

pub use config::ClientConfig;
pub use driver::{Callbacks, Client};
