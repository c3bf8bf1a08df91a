//! Reserved message types and value names used by the handshake and auto-echo exchanges (§6).
//! These are the only `message_type`s the session dispatcher handles internally; everything else
//! reaches the user-supplied callback.
pub const REQUEST_CONNECTION: &str = "request_connection";
pub const CONFIRM_CONNECTION: &str = "confirm_connection";
pub const ECHO: &str = "echo";
pub const REQUEST_FILE: &str = "request_file";

use serde_derive::{Deserialize, Serialize};

pub mod value_names {
    pub const CONNECTION_KEY: &str = "connection_key";
    pub const AUTO_ECHO: &str = "auto_echo";
    pub const AUTO_ECHO_INTERVAL_SECONDS: &str = "auto_echo_interval_seconds";
    pub const SESSION_TYPE: &str = "session_type";
    pub const BRIDGE_MODE: &str = "bridge_mode";
    pub const SNIPPING_TARGETS: &str = "snipping_targets";
    pub const CONFIRM: &str = "confirm";
    pub const KEY: &str = "key";
    pub const IV: &str = "iv";
    pub const ENCRYPT_MODE: &str = "encrypt_mode";
    pub const RESPONSE: &str = "response";
}

/// `session_type` wire encoding (i16; see `request_connection`'s `session_type` value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    MessageLine = 1,
    BinaryLine = 2,
    FileLine = 3,
}

impl SessionType {
    pub fn from_i16(v: i16) -> Option<SessionType> {
        match v {
            1 => Some(SessionType::MessageLine),
            2 => Some(SessionType::BinaryLine),
            3 => Some(SessionType::FileLine),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Whether this session type permits emitting/accepting `mode` frames, per the invariant
    /// that a session's type restricts which of {packet, binary, file} are legal in either
    /// direction. `packet` (container messages) is always legal; the others are exclusive.
    pub fn allows(self, mode: wire::DataMode) -> bool {
        match mode {
            wire::DataMode::Packet => true,
            wire::DataMode::Binary => self == SessionType::BinaryLine,
            wire::DataMode::File => self == SessionType::FileLine,
        }
    }
}
