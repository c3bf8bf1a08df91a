//! The configuration shape shared by both endpoints (§6). The server crate adds `port`; the
//! client crate adds `ip`/`port`; both embed this struct via `#[serde(flatten)]`.
use pipeline::PoolConfig;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub source_id: String,
    pub connection_key: String,
    pub encrypt_mode: bool,
    pub compress_mode: bool,
    pub high_priority_workers: usize,
    pub normal_priority_workers: usize,
    pub low_priority_workers: usize,
    /// 0 means unlimited (§4.6 step 2).
    pub session_limit_count: usize,
    pub possible_session_types: Vec<crate::message::SessionType>,
    pub ignore_snipping_targets: Vec<String>,
}

impl EndpointConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            high_priority_workers: self.high_priority_workers,
            normal_priority_workers: self.normal_priority_workers,
            low_priority_workers: self.low_priority_workers,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        EndpointConfig {
            source_id: String::new(),
            connection_key: String::new(),
            encrypt_mode: true,
            compress_mode: false,
            high_priority_workers: defaults.high_priority_workers,
            normal_priority_workers: defaults.normal_priority_workers,
            low_priority_workers: defaults.low_priority_workers,
            session_limit_count: 0,
            possible_session_types: vec![
                crate::message::SessionType::MessageLine,
                crate::message::SessionType::BinaryLine,
                crate::message::SessionType::FileLine,
            ],
            ignore_snipping_targets: Vec::new(),
        }
    }
}
