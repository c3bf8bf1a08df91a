//! A registered session: the state machine (`core_proto::Session`) plus the TCP stream and frame
//! reassembly state that drive it. Owned by the `Registry`; looked up and cloned out (as an
//! `Arc`) under the registry lock, then used without holding that lock (§5 shared-resource
//! policy).
use core_proto::crypto::KEY_SIZE;
use core_proto::Session;
use flux::error::{Error, Result};
use pipeline::{stage_fn, submit_chain, Direction, Stage, WorkerPool};
use slog::{warn, Logger};
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use wire::{Container, DataMode, Frame, FrameReader};

pub struct SessionHandle {
    pub id: u64,
    pub session: Mutex<Session>,
    write_stream: Mutex<TcpStream>,
    pub reader: Mutex<FrameReader>,
    pub kill_on_handshake: bool,
    disconnected: AtomicBool,
}

impl SessionHandle {
    pub fn new(id: u64, session: Session, stream: TcpStream, kill_on_handshake: bool) -> Result<SessionHandle> {
        let write_stream = stream.try_clone().map_err(Error::Io)?;
        Ok(SessionHandle {
            id,
            session: Mutex::new(session),
            write_stream: Mutex::new(write_stream),
            reader: Mutex::new(FrameReader::new()),
            kill_on_handshake,
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Hands the read loop its own clone of the socket, independent of the write half held for
    /// outbound framing.
    pub fn try_clone_for_read(&self) -> Option<TcpStream> {
        self.write_stream.lock().expect("write stream lock poisoned").try_clone().ok()
    }

    /// Compresses then encrypts (whichever are enabled) and frames a container, writing it to the
    /// socket directly rather than through the pool: handshake/control/echo replies must go out
    /// immediately regardless of priority scheduling, but still follow the same
    /// compress-then-encrypt order as the pooled path.
    pub fn send_container(&self, container: &Container) -> Result<()> {
        let plain = container.serialize();
        let compressed = self.maybe_compress(&plain)?;
        let payload = self.maybe_encrypt(&compressed, DataMode::Packet)?;
        self.write_frame(Frame::new(DataMode::Packet, payload))
    }

    pub fn send_frame(&self, mode: DataMode, plain: &[u8]) -> Result<()> {
        let compressed = self.maybe_compress(plain)?;
        let payload = self.maybe_encrypt(&compressed, mode)?;
        self.write_frame(Frame::new(mode, payload))
    }

    fn maybe_compress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let compress = self.session.lock().expect("session lock poisoned").compress;
        if compress {
            core_proto::compression::compress(plain)
        } else {
            Ok(plain.to_vec())
        }
    }

    fn maybe_encrypt(&self, plain: &[u8], mode: DataMode) -> Result<Vec<u8>> {
        let mut session = self.session.lock().expect("session lock poisoned");
        if !session.encrypt {
            return Ok(plain.to_vec());
        }
        let key_material = session
            .key_material
            .clone()
            .ok_or_else(|| Error::Crypto("encrypt_mode set without key material".into()))?;
        let nonce = session.next_outbound_nonce();
        let aad = [mode.as_byte()];
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&key_material.key);
        core_proto::crypto::encrypt(plain, &aad, nonce, &key)
    }

    pub fn maybe_decrypt(&self, cipher: &[u8], mode: DataMode) -> Result<Vec<u8>> {
        let mut session = self.session.lock().expect("session lock poisoned");
        if !session.encrypt {
            return Ok(cipher.to_vec());
        }
        let key_material = session
            .key_material
            .clone()
            .ok_or_else(|| Error::Crypto("encrypt_mode set without key material".into()))?;
        let nonce = session.next_inbound_nonce();
        let aad = [mode.as_byte()];
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&key_material.key);
        core_proto::crypto::decrypt(cipher, &aad, nonce, &key)
    }

    pub fn maybe_decompress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let compress = self.session.lock().expect("session lock poisoned").compress;
        if compress {
            core_proto::compression::decompress(plain)
        } else {
            Ok(plain.to_vec())
        }
    }

    /// Schedules a `binary`/`file` send on the priority pool instead of running compress/encrypt
    /// inline: `receive_payload` is a no-op here since the payload is already built, compress and
    /// encrypt run at the priority the stage table assigns `mode`, and the final `send` stage
    /// writes the frame from whichever worker reaches it. Failures are logged rather than
    /// returned, since the caller has already moved on by the time a background stage could fail.
    pub fn send_via_pipeline(self: &Arc<Self>, pool: &Arc<WorkerPool>, mode: DataMode, payload: Vec<u8>, log: Logger) {
        let (compress_on, encrypt_on) = {
            let session = self.session.lock().expect("session lock poisoned");
            (session.compress, session.encrypt)
        };
        let pipeline_mode = match mode {
            DataMode::Packet => pipeline::DataMode::Packet,
            DataMode::Binary => pipeline::DataMode::Binary,
            DataMode::File => pipeline::DataMode::File,
        };

        let encrypt_handle = Arc::clone(self);
        let encrypt: pipeline::StageFn = stage_fn(move |bytes| encrypt_handle.maybe_encrypt(bytes, mode));
        let send_handle = Arc::clone(self);
        let send: pipeline::StageFn = stage_fn(move |bytes| {
            send_handle.write_frame(Frame::new(mode, bytes.to_vec()))?;
            Ok(Vec::new())
        });
        let identity: pipeline::StageFn = stage_fn(|bytes: &[u8]| Ok(bytes.to_vec()));

        let chain: Vec<Stage> = pipeline::build_chain(
            Direction::Outbound,
            pipeline_mode,
            compress_on,
            encrypt_on,
            stage_fn(core_proto::compression::compress),
            identity.clone(),
            encrypt,
            identity.clone(),
            send,
            identity,
        );

        let on_error: Arc<dyn Fn(flux::error::Error) + Send + Sync> = Arc::new(move |e| {
            warn!(log, "pipeline send failed"; "error" => %e);
        });
        submit_chain(Arc::clone(pool), chain, payload, on_error);
    }

    fn write_frame(&self, frame: Frame) -> Result<()> {
        let bytes = frame.encode();
        let mut stream = self.write_stream.lock().expect("write stream lock poisoned");
        stream.write_all(&bytes).map_err(Error::Io)
    }
}
