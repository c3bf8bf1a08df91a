//! Client-side configuration: the shared endpoint shape (§6) plus the server's address.
use core_proto::{EndpointConfig, SessionType};
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub ip: String,
    pub port: u16,
    /// The server's own `source_id`, addressed as this session's `target_id`.
    pub server_id: String,
    /// The single session type this client negotiates (§4.1: a session has exactly one type).
    pub session_type: SessionType,
    /// Socket receive buffer size set via `SO_RCVBUF` on connect (§4.7).
    pub receive_buffer_size: usize,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            ip: "127.0.0.1".into(),
            port: 7600,
            server_id: String::new(),
            session_type: SessionType::MessageLine,
            receive_buffer_size: 64 * 1024,
            endpoint: EndpointConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &str) -> flux::error::Result<ClientConfig> {
        serdeconv::from_toml_file(path).map_err(|e| flux::error::Error::FileIo(e.to_string()))
    }
}
