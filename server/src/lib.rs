//! The server acceptor: binds a listener, negotiates sessions, and dispatches frames through the
//! pipeline/pool to user callbacks (C6).
pub mod acceptor;
pub mod config;
pub mod registry;
pub mod session_handle;

pub use acceptor::{Callbacks, Server};
pub use config::ServerConfig;
pub use registry::Registry;
pub use session_handle::SessionHandle;
