//! Server-side configuration: the shared endpoint shape (§6) plus the bind port.
use core_proto::EndpointConfig;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 7600,
            endpoint: EndpointConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> flux::error::Result<ServerConfig> {
        serdeconv::from_toml_file(path).map_err(|e| flux::error::Error::FileIo(e.to_string()))
    }
}
