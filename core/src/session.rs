//! The session state machine (C5): handshake validation/construction, auto-echo bookkeeping, and
//! the confirmed/snipping checks that gate message dispatch. This module is pure data plus pure
//! transitions; the socket I/O and worker-pool wiring that drive it live in the server/client
//! crates (C6/C7).
use crate::crypto;
use crate::message::{value_names, SessionType, CONFIRM_CONNECTION, ECHO, REQUEST_CONNECTION};
use flux::error::{Error, Result};
use flux::time::timestamp_secs;
use wire::{Container, NamedValue, Value};

/// The handshake/lifecycle state. `Terminating` subsumes the data model's `rejected` outcome: a
/// rejected handshake and an explicit stop both end up here, distinguished only by the reason
/// recorded in the session's last-close log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    AwaitingConfirm,
    Confirmed,
    Terminating,
    Expired,
}

/// Negotiated symmetric key material, present once the handshake completes.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub key: [u8; crypto::KEY_SIZE],
    pub iv: Vec<u8>,
}

/// The mutable per-connection record described in the data model.
pub struct Session {
    pub state: State,
    pub source_id: String,
    pub source_sub_id: String,
    pub target_id: String,
    pub target_sub_id: String,
    pub session_type: SessionType,
    pub compress: bool,
    pub encrypt: bool,
    pub key_material: Option<KeyMaterial>,
    pub snipping_targets: Vec<String>,
    pub auto_echo: bool,
    pub auto_echo_interval_seconds: u16,
    pub bridge_mode: bool,
    pub created_at: u64,
    outbound_sequence: u64,
    inbound_sequence: u64,
}

impl Session {
    /// Builds a session in `connecting` state, as the client driver does before it has sent
    /// `request_connection`.
    pub fn new_connecting(
        source_id: impl Into<String>,
        source_sub_id: impl Into<String>,
        target_id: impl Into<String>,
        session_type: SessionType,
    ) -> Session {
        Session {
            state: State::Connecting,
            source_id: source_id.into(),
            source_sub_id: source_sub_id.into(),
            target_id: target_id.into(),
            target_sub_id: String::new(),
            session_type,
            compress: false,
            encrypt: false,
            key_material: None,
            snipping_targets: Vec::new(),
            auto_echo: false,
            auto_echo_interval_seconds: 0,
            bridge_mode: false,
            created_at: timestamp_secs(),
            outbound_sequence: 0,
            inbound_sequence: 0,
        }
    }

    /// Builds a session in `awaiting_confirm` state, as the server does immediately on accept
    /// (before the client's `request_connection` has been read).
    pub fn new_awaiting_confirm(source_id: impl Into<String>, source_sub_id: impl Into<String>) -> Session {
        Session {
            state: State::AwaitingConfirm,
            source_id: source_id.into(),
            source_sub_id: source_sub_id.into(),
            target_id: String::new(),
            target_sub_id: String::new(),
            session_type: SessionType::MessageLine,
            compress: false,
            encrypt: false,
            key_material: None,
            snipping_targets: Vec::new(),
            auto_echo: false,
            auto_echo_interval_seconds: 0,
            bridge_mode: false,
            created_at: timestamp_secs(),
            outbound_sequence: 0,
            inbound_sequence: 0,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == State::Confirmed
    }

    /// The next outbound AEAD nonce, distinct from every prior one on this session.
    pub fn next_outbound_nonce(&mut self) -> u64 {
        let nonce = self.outbound_sequence;
        self.outbound_sequence += 1;
        nonce
    }

    /// The next expected inbound AEAD nonce, consumed in lockstep with the peer's sequence.
    pub fn next_inbound_nonce(&mut self) -> u64 {
        let nonce = self.inbound_sequence;
        self.inbound_sequence += 1;
        nonce
    }

    /// Builds the `request_connection` container the client sends as the first handshake step.
    pub fn build_request_connection(&self) -> Container {
        let mut values = vec![
            NamedValue::new(value_names::CONNECTION_KEY, Value::String(String::new())),
            NamedValue::new(value_names::AUTO_ECHO, Value::Bool(self.auto_echo)),
            NamedValue::new(
                value_names::AUTO_ECHO_INTERVAL_SECONDS,
                Value::UInt(self.auto_echo_interval_seconds),
            ),
            NamedValue::new(value_names::SESSION_TYPE, Value::Int(self.session_type.as_i16())),
            NamedValue::new(value_names::BRIDGE_MODE, Value::Bool(self.bridge_mode)),
        ];
        values.push(NamedValue::new(
            value_names::SNIPPING_TARGETS,
            Value::container(
                self.snipping_targets
                    .iter()
                    .map(|t| NamedValue::new("target", Value::String(t.clone())))
                    .collect(),
            ),
        ));

        Container::new_container(
            self.source_id.clone(),
            self.source_sub_id.clone(),
            self.target_id.clone(),
            self.target_sub_id.clone(),
            REQUEST_CONNECTION,
            values,
        )
    }

    /// Sets `connection_key` on a `request_connection` container built by `build_request_connection`.
    pub fn with_connection_key(mut container: Container, connection_key: &str) -> Container {
        container.remove(value_names::CONNECTION_KEY);
        container.add(NamedValue::new(
            value_names::CONNECTION_KEY,
            Value::String(connection_key.to_string()),
        ));
        container
    }

    /// Server-side handshake validation (§4.5 step 2-3). On success, mutates `self` into
    /// `confirmed` with fresh key material and returns the `confirm_connection` reply to send.
    /// On key mismatch or a session type outside `possible_session_types`, mutates `self` into
    /// `terminating` and returns a `confirm=false` reply (§7: "session-type not permitted").
    pub fn handle_request_connection(
        &mut self,
        request: &Container,
        expected_connection_key: &str,
        server_encrypt_mode: bool,
        server_compress_mode: bool,
        possible_session_types: &[SessionType],
    ) -> Result<Container> {
        if request.header.message_type != REQUEST_CONNECTION {
            return Err(Error::HandshakeRejected(format!(
                "expected {}, got {}",
                REQUEST_CONNECTION, request.header.message_type
            )));
        }

        let supplied_key = string_value(request, value_names::CONNECTION_KEY).unwrap_or_default();

        self.target_id = request.header.source_id.clone();
        self.target_sub_id = request.header.source_sub_id.clone();

        if supplied_key != expected_connection_key {
            self.state = State::Terminating;
            return Ok(self.build_confirm_connection(false, server_encrypt_mode));
        }

        if let Some(Value::Int(raw)) = request.get_value(value_names::SESSION_TYPE, 0) {
            if let Some(session_type) = SessionType::from_i16(*raw) {
                self.session_type = session_type;
            }
        }

        if !possible_session_types.contains(&self.session_type) {
            self.state = State::Terminating;
            return Ok(self.build_confirm_connection(false, server_encrypt_mode));
        }

        if let Some(Value::Bool(auto_echo)) = request.get_value(value_names::AUTO_ECHO, 0) {
            self.auto_echo = *auto_echo;
        }
        if let Some(Value::UInt(interval)) = request.get_value(value_names::AUTO_ECHO_INTERVAL_SECONDS, 0) {
            self.auto_echo_interval_seconds = *interval;
        }
        if let Some(Value::Bool(bridge_mode)) = request.get_value(value_names::BRIDGE_MODE, 0) {
            self.bridge_mode = *bridge_mode;
        }
        if let Some(Value::Container(children)) = request.get_value(value_names::SNIPPING_TARGETS, 0) {
            self.snipping_targets = children
                .iter()
                .filter_map(|nv| match &nv.value {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect();
        }

        let mut key = [0u8; crypto::KEY_SIZE];
        crypto::random_bytes(&mut key);
        let mut iv = vec![0u8; crypto::NONCE_SIZE];
        crypto::random_bytes(&mut iv);

        self.key_material = Some(KeyMaterial { key, iv });
        self.compress = server_compress_mode;
        self.encrypt = server_encrypt_mode;
        self.state = State::Confirmed;

        Ok(self.build_confirm_connection(true, server_encrypt_mode))
    }

    fn build_confirm_connection(&self, confirm: bool, encrypt_mode: bool) -> Container {
        let mut values = vec![NamedValue::new(value_names::CONFIRM, Value::Bool(confirm))];
        if confirm {
            let km = self.key_material.as_ref().expect("key material set on confirm");
            values.push(NamedValue::new(
                value_names::KEY,
                Value::String(flux::encoding::base64::encode(&km.key)),
            ));
            values.push(NamedValue::new(
                value_names::IV,
                Value::String(flux::encoding::base64::encode(&km.iv)),
            ));
            values.push(NamedValue::new(value_names::ENCRYPT_MODE, Value::Bool(encrypt_mode)));
            values.push(NamedValue::new(
                value_names::SNIPPING_TARGETS,
                Value::container(
                    self.snipping_targets
                        .iter()
                        .map(|t| NamedValue::new("target", Value::String(t.clone())))
                        .collect(),
                ),
            ));
        }

        Container::new_container(
            self.source_id.clone(),
            self.source_sub_id.clone(),
            self.target_id.clone(),
            self.target_sub_id.clone(),
            CONFIRM_CONNECTION,
            values,
        )
    }

    /// Client-side handshake completion (§4.5 step 4): caches `(key, iv)` and transitions to
    /// `confirmed`, or to `terminating` if the server rejected the connection key.
    pub fn handle_confirm_connection(&mut self, reply: &Container) -> Result<()> {
        if reply.header.message_type != CONFIRM_CONNECTION {
            return Err(Error::HandshakeRejected(format!(
                "expected {}, got {}",
                CONFIRM_CONNECTION, reply.header.message_type
            )));
        }

        let confirmed = matches!(reply.get_value(value_names::CONFIRM, 0), Some(Value::Bool(true)));
        if !confirmed {
            self.state = State::Terminating;
            return Err(Error::HandshakeRejected("server rejected connection key".into()));
        }

        let key_str = string_value(reply, value_names::KEY)
            .ok_or_else(|| Error::HandshakeRejected("missing key in confirm_connection".into()))?;
        let iv_str = string_value(reply, value_names::IV)
            .ok_or_else(|| Error::HandshakeRejected("missing iv in confirm_connection".into()))?;
        let key_bytes = flux::encoding::base64::decode(&key_str)
            .map_err(|e| Error::HandshakeRejected(format!("malformed key: {}", e)))?;
        if key_bytes.len() != crypto::KEY_SIZE {
            return Err(Error::HandshakeRejected("key has unexpected length".into()));
        }
        let mut key = [0u8; crypto::KEY_SIZE];
        key.copy_from_slice(&key_bytes);
        let iv = flux::encoding::base64::decode(&iv_str)
            .map_err(|e| Error::HandshakeRejected(format!("malformed iv: {}", e)))?;

        self.encrypt = matches!(reply.get_value(value_names::ENCRYPT_MODE, 0), Some(Value::Bool(true)));
        self.key_material = Some(KeyMaterial { key, iv });
        self.state = State::Confirmed;
        Ok(())
    }

    /// Marks the session `expired`, as the handshake watchdog does one second after accept if
    /// still `awaiting_confirm`.
    pub fn expire(&mut self) {
        if self.state == State::AwaitingConfirm {
            self.state = State::Expired;
        }
    }

    /// Builds the `confirm_connection{confirm=false}` frame the server writes before closing a
    /// session whose handshake watchdog fired (§12.2): the peer never completed
    /// `request_connection` in time, so no key material or negotiated target exists to echo back.
    pub fn build_timeout_rejection(&self) -> Container {
        self.build_confirm_connection(false, false)
    }

    /// Builds the periodic `echo` message sent while `auto_echo` is enabled and confirmed.
    pub fn build_echo(&self) -> Container {
        Container::new_container(
            self.source_id.clone(),
            self.source_sub_id.clone(),
            self.target_id.clone(),
            self.target_sub_id.clone(),
            ECHO,
            Vec::new(),
        )
    }

    /// Builds the `response=true` reply to an incoming `echo`, header swapped so it routes back
    /// to the sender.
    pub fn build_echo_reply(echo: &Container) -> Container {
        let mut reply = echo.copy(false);
        reply.swap_header();
        reply.add(NamedValue::new(value_names::RESPONSE, Value::Bool(true)));
        reply
    }

    /// Whether an `echo` container is a completed round trip rather than one to re-echo.
    pub fn is_echo_response(echo: &Container) -> bool {
        matches!(echo.get_value(value_names::RESPONSE, 0), Some(Value::Bool(true)))
    }

    /// A message is dropped at dispatch if the session is not confirmed and the type is not one
    /// of the handshake types, or if the envelope's source matches an ignored snipping target.
    pub fn should_deliver(&self, container: &Container, ignore_snipping_targets: &[String]) -> bool {
        let is_handshake_type =
            matches!(container.header.message_type.as_str(), REQUEST_CONNECTION | CONFIRM_CONNECTION);
        if !self.is_confirmed() && !is_handshake_type {
            return false;
        }
        let source = &container.header.source_id;
        !ignore_snipping_targets.iter().any(|ignored| ignored == source)
            && !self.snipping_targets.iter().any(|snipped| snipped == source)
    }
}

fn string_value(container: &Container, name: &str) -> Option<String> {
    match container.get_value(name, 0) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}
