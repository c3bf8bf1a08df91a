//! The client driver (C7): owns a single session, its own priority pool, and the socket read loop
//! that drives the handshake and subsequent message dispatch.
use crate::config::ClientConfig;
use core_proto::crypto::KEY_SIZE;
use core_proto::{message, Session};
use flux::error::{Error, Result};
use pipeline::{stage_fn, submit_chain, Direction, Stage, WorkerPool};
use slog::{debug, warn, Logger};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wire::frame::fields::{BinaryPayload, FileNotifyPayload, FileUploadPayload};
use wire::{Container, DataMode, Frame, FrameReader};

/// User-supplied callbacks the driver forwards to, mirroring the server's (§4.6/§4.7).
pub struct Callbacks {
    pub on_message: Arc<dyn Fn(&Container) + Send + Sync>,
    pub on_connect: Arc<dyn Fn(bool) + Send + Sync>,
    pub on_disconnect: Arc<dyn Fn() + Send + Sync>,
}

pub struct Client {
    config: ClientConfig,
    session: Mutex<Session>,
    write_stream: Mutex<TcpStream>,
    reader: Mutex<FrameReader>,
    pool: Arc<WorkerPool>,
    callbacks: Callbacks,
    logger: Logger,
    stopped: AtomicBool,
}

impl Client {
    /// Opens the socket, negotiates `TCP_NODELAY`/`SO_KEEPALIVE`/`SO_RCVBUF`, launches the worker
    /// pool and read loop, and sends `request_connection`. Returns once the request has been
    /// written; callers observe the confirm/reject outcome via `on_connect`.
    pub fn start(config: ClientConfig, callbacks: Callbacks, logger: Logger) -> Result<Arc<Client>> {
        let stream = TcpStream::connect((config.ip.as_str(), config.port)).map_err(Error::Io)?;
        stream.set_nodelay(true).map_err(Error::Io)?;

        let keepalive_socket = socket2::Socket::from(stream.try_clone().map_err(Error::Io)?);
        keepalive_socket
            .set_keepalive(Some(Duration::from_secs(30)))
            .map_err(Error::Io)?;
        keepalive_socket
            .set_recv_buffer_size(config.receive_buffer_size)
            .map_err(Error::Io)?;

        let source_sub_id = stream.local_addr().map_err(Error::Io)?.to_string();
        let target_sub_id = stream.peer_addr().map_err(Error::Io)?.to_string();

        let mut session = Session::new_connecting(
            config.endpoint.source_id.clone(),
            source_sub_id,
            config.server_id.clone(),
            config.session_type,
        );
        session.target_sub_id = target_sub_id;

        let pool = Arc::new(WorkerPool::new(config.endpoint.pool_config(), logger.clone()));
        let write_stream = stream.try_clone().map_err(Error::Io)?;

        let client = Arc::new(Client {
            config,
            session: Mutex::new(session),
            write_stream: Mutex::new(write_stream),
            reader: Mutex::new(FrameReader::new()),
            pool,
            callbacks,
            logger,
            stopped: AtomicBool::new(false),
        });

        let request = {
            let session = client.session.lock().expect("session lock poisoned");
            Session::with_connection_key(session.build_request_connection(), &client.config.endpoint.connection_key)
        };
        client.send_container(&request)?;

        let reader_client = Arc::clone(&client);
        std::thread::spawn(move || reader_client.read_loop(stream));

        Ok(client)
    }

    pub fn is_confirmed(&self) -> bool {
        self.session.lock().expect("session lock poisoned").is_confirmed()
    }

    /// Closes the socket (unblocking the read loop), stops the loop, and joins the pool.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let stream = self.write_stream.lock().expect("write stream lock poisoned");
        let _ = stream.shutdown(std::net::Shutdown::Both);
        self.pool.stop();
    }

    pub fn send_message(&self, container: &Container) -> Result<()> {
        self.send_container(container)
    }

    /// No-op (§3/§7) unless the handshake has confirmed and the negotiated session type allows
    /// `binary` mode.
    pub fn send_binary(&self, target_id: &str, target_sub_id: &str, data: Vec<u8>) {
        let (source_id, source_sub_id) = {
            let session = self.session.lock().expect("session lock poisoned");
            if !session.is_confirmed() || !session.session_type.allows(DataMode::Binary) {
                return;
            }
            (session.source_id.clone(), session.source_sub_id.clone())
        };
        let payload = BinaryPayload {
            source_id,
            source_sub_id,
            target_id: target_id.to_string(),
            target_sub_id: target_sub_id.to_string(),
            data,
        };
        self.send_via_pipeline(DataMode::Binary, payload.encode());
    }

    /// No-op (§3/§7) unless the handshake has confirmed and the negotiated session type allows
    /// `file` mode. Loads `source_path` off disk before building the upload payload, matching the
    /// outbound file chain's `load-file@low` first stage.
    pub fn send_file(
        &self,
        indication_id: &str,
        target_id: &str,
        target_sub_id: &str,
        source_path: &str,
        target_path: &str,
    ) -> Result<()> {
        let (source_id, source_sub_id) = {
            let session = self.session.lock().expect("session lock poisoned");
            if !session.is_confirmed() || !session.session_type.allows(DataMode::File) {
                return Ok(());
            }
            (session.source_id.clone(), session.source_sub_id.clone())
        };
        let file_bytes = core_proto::fileio::load_file(source_path)?;
        let payload = FileUploadPayload {
            indication_id: indication_id.to_string(),
            source_id,
            source_sub_id,
            target_id: target_id.to_string(),
            target_sub_id: target_sub_id.to_string(),
            source_path: source_path.to_string(),
            target_path: target_path.to_string(),
            file_bytes,
        };
        self.send_via_pipeline(DataMode::File, payload.encode());
        Ok(())
    }

    fn send_container(&self, container: &Container) -> Result<()> {
        let plain = container.serialize();
        let compressed = self.maybe_compress(&plain)?;
        let payload = self.maybe_encrypt(&compressed, DataMode::Packet)?;
        self.write_frame(Frame::new(DataMode::Packet, payload))
    }

    fn maybe_compress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let compress = self.session.lock().expect("session lock poisoned").compress;
        if compress {
            core_proto::compression::compress(plain)
        } else {
            Ok(plain.to_vec())
        }
    }

    fn maybe_decompress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let compress = self.session.lock().expect("session lock poisoned").compress;
        if compress {
            core_proto::compression::decompress(plain)
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

    fn maybe_decrypt(&self, cipher: &[u8], mode: DataMode) -> Result<Vec<u8>> {
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

    fn write_frame(&self, frame: Frame) -> Result<()> {
        let bytes = frame.encode();
        let mut stream = self.write_stream.lock().expect("write stream lock poisoned");
        stream.write_all(&bytes).map_err(Error::Io)
    }

    fn send_via_pipeline(self: &Arc<Self>, mode: DataMode, payload: Vec<u8>) {
        let (compress_on, encrypt_on) = {
            let session = self.session.lock().expect("session lock poisoned");
            (session.compress, session.encrypt)
        };
        let pipeline_mode = match mode {
            DataMode::Packet => pipeline::DataMode::Packet,
            DataMode::Binary => pipeline::DataMode::Binary,
            DataMode::File => pipeline::DataMode::File,
        };

        let encrypt_client = Arc::clone(self);
        let encrypt: pipeline::StageFn = stage_fn(move |bytes| encrypt_client.maybe_encrypt(bytes, mode));
        let send_client = Arc::clone(self);
        let send: pipeline::StageFn = stage_fn(move |bytes| {
            send_client.write_frame(Frame::new(mode, bytes.to_vec()))?;
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

        let log = self.logger.clone();
        let on_error: Arc<dyn Fn(flux::error::Error) + Send + Sync> = Arc::new(move |e| {
            warn!(log, "pipeline send failed"; "error" => %e);
        });
        submit_chain(Arc::clone(&self.pool), chain, payload, on_error);
    }

    fn read_loop(self: Arc<Self>, mut stream: TcpStream) {
        let mut buf = [0u8; 1024];
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => 0,
                Ok(n) => n,
            };
            if n == 0 {
                self.on_closed();
                return;
            }

            let frames = {
                let mut reader = self.reader.lock().expect("reader lock poisoned");
                match reader.push(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(self.logger, "frame codec failure, closing"; "error" => %e);
                        self.on_closed();
                        return;
                    }
                }
            };

            for frame in frames {
                let priority = match frame.mode {
                    DataMode::File => pipeline::Priority::Low,
                    _ => pipeline::Priority::High,
                };
                let client = Arc::clone(&self);
                self.pool.submit(
                    priority,
                    Box::new(move || client.dispatch_frame(frame.mode, frame.payload)),
                );
            }
        }
    }

    fn dispatch_frame(&self, mode: DataMode, payload: Vec<u8>) {
        let decrypted = match self.maybe_decrypt(&payload, mode) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                warn!(self.logger, "decrypt failed"; "error" => %e);
                return;
            }
        };
        let plain = match self.maybe_decompress(&decrypted) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(self.logger, "decompress failed"; "error" => %e);
                return;
            }
        };
        let result = match mode {
            DataMode::Packet => Container::deserialize(&plain).map(|c| self.dispatch_container(&c)),
            DataMode::Binary => BinaryPayload::decode(&plain).map(|payload| {
                (self.callbacks.on_message)(&binary_as_container(&payload));
            }),
            DataMode::File => FileNotifyPayload::decode(&plain).map(|notify| {
                debug!(self.logger, "file notify received"; "final_target_path" => &notify.final_target_path);
            }),
        };
        if let Err(e) = result {
            warn!(self.logger, "inbound frame parse failed"; "error" => %e);
        }
    }

    fn dispatch_container(&self, container: &Container) {
        match container.header.message_type.as_str() {
            message::CONFIRM_CONNECTION => {
                let outcome = {
                    let mut session = self.session.lock().expect("session lock poisoned");
                    session.handle_confirm_connection(container)
                };
                (self.callbacks.on_connect)(outcome.is_ok());
                if outcome.is_err() {
                    self.on_closed();
                }
            }
            message::ECHO => {
                if Session::is_echo_response(container) {
                    debug!(self.logger, "echo round trip completed");
                } else {
                    let reply = Session::build_echo_reply(container);
                    let _ = self.send_container(&reply);
                }
            }
            _ => {
                let deliver = {
                    let session = self.session.lock().expect("session lock poisoned");
                    session.should_deliver(container, &self.config.endpoint.ignore_snipping_targets)
                };
                if deliver {
                    (self.callbacks.on_message)(container);
                }
            }
        }
    }

    fn on_closed(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            (self.callbacks.on_disconnect)();
        }
    }
}

/// Wraps a relayed `binary` payload as a container so binary and packet traffic can share one
/// `on_message` callback; `data` is carried as a single `bytes` value.
fn binary_as_container(payload: &BinaryPayload) -> Container {
    let mut container = Container::new_container(
        payload.source_id.clone(),
        payload.source_sub_id.clone(),
        payload.target_id.clone(),
        payload.target_sub_id.clone(),
        "binary",
        Vec::new(),
    );
    container.add(wire::NamedValue::new("data", wire::Value::Bytes(Arc::new(payload.data.clone()))));
    container
}
