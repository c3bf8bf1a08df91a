//! Server acceptor & registry (C6): accepts connections, wires each into a registered session,
//! schedules its handshake watchdog, and dispatches inbound frames to the session state machine
//! or the user callback.
use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::session_handle::SessionHandle;
use core_proto::{fileio, message, Session};
use flux::error::Result;
use slog::{debug, error, info, o, warn, Logger};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wire::{Container, DataMode};
use wire::frame::fields::{BinaryPayload, FileNotifyPayload, FileUploadPayload};

/// User-supplied callbacks the server forwards to, as documented in §4.6.
pub struct Callbacks {
    pub on_message: Arc<dyn Fn(&Container) + Send + Sync>,
    pub on_connect: Arc<dyn Fn(&str, bool) + Send + Sync>,
    pub on_disconnect: Arc<dyn Fn(&str) + Send + Sync>,
}

pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    pool: Arc<pipeline::WorkerPool>,
    callbacks: Callbacks,
    logger: Logger,
    next_id: AtomicU64,
}

impl Server {
    pub fn new(config: ServerConfig, callbacks: Callbacks, logger: Logger) -> Server {
        let pool = Arc::new(pipeline::WorkerPool::new(config.endpoint.pool_config(), logger.clone()));
        Server {
            config,
            registry: Arc::new(Registry::new()),
            pool,
            callbacks,
            logger,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Binds the configured port and accepts connections until the listener errors. Each
    /// connection is handled on its own thread (§5: one I/O thread per endpoint connection);
    /// CPU-bound stage work still runs on the shared priority pool.
    pub fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).map_err(flux::error::Error::Io)?;
        self.serve(listener)
    }

    /// Accepts connections on an already-bound listener. Exposed separately so tests can bind an
    /// ephemeral port (`0`) and read back the assigned address before serving.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(self.logger, "server listening"; "addr" => ?listener.local_addr());

        for incoming in listener.incoming() {
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(self.logger, "accept failed"; "error" => %e);
                    continue;
                }
            };
            let server = Arc::clone(&self);
            std::thread::spawn(move || server.handle_connection(stream));
        }
        Ok(())
    }

    fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let log = self.logger.new(o!("session_id" => id, "peer" => peer.clone()));

        let kill_on_handshake =
            self.config.endpoint.session_limit_count > 0 && self.registry.len() >= self.config.endpoint.session_limit_count;

        let session = Session::new_awaiting_confirm(self.config.endpoint.source_id.clone(), peer.clone());
        let handle = match SessionHandle::new(id, session, stream, kill_on_handshake) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                error!(log, "failed to set up session"; "error" => %e);
                return;
            }
        };
        self.registry.insert(Arc::clone(&handle));
        self.spawn_watchdog(Arc::clone(&handle), log.clone());

        debug!(log, "session accepted");
        self.read_loop(handle, log);
    }

    fn spawn_watchdog(self: &Arc<Self>, handle: Arc<SessionHandle>, log: Logger) {
        let server = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(1));
            let rejection = {
                let mut session = handle.session.lock().expect("session lock poisoned");
                let was_awaiting = session.state == core_proto::State::AwaitingConfirm;
                session.expire();
                was_awaiting.then(|| session.build_timeout_rejection())
            };
            if let Some(rejection) = rejection {
                if !handle.is_disconnected() {
                    warn!(log, "handshake watchdog fired: session expired");
                    if let Err(e) = handle.send_container(&rejection) {
                        warn!(log, "failed to write timeout rejection"; "error" => %e);
                    }
                    handle.mark_disconnected();
                    server.registry.remove(handle.id);
                    server.notify_disconnect(&peer_target_id(&handle));
                }
            }
        });
    }

    fn read_loop(self: Arc<Self>, handle: Arc<SessionHandle>, log: Logger) {
        let mut socket = match handle.try_clone_for_read() {
            Some(s) => s,
            None => return,
        };

        let mut buf = [0u8; 1024];
        loop {
            use std::io::Read;
            let n = match socket.read(&mut buf) {
                Ok(0) => 0,
                Ok(n) => n,
                Err(_) => 0,
            };
            if n == 0 {
                self.disconnect(&handle, &log, "peer closed connection");
                return;
            }

            let frames = {
                let mut reader = handle.reader.lock().expect("reader lock poisoned");
                match reader.push(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(log, "frame codec failure, disconnecting"; "error" => %e);
                        self.disconnect(&handle, &log, "frame codec failure");
                        return;
                    }
                }
            };

            for frame in frames {
                // Parsing/delivery and user callbacks run on the priority pool, never on this I/O
                // thread (§5): packet/binary dispatch at `high`, file writes at `low`, matching
                // the inbound stage table's last-stage priority for each mode.
                let priority = match frame.mode {
                    DataMode::File => pipeline::Priority::Low,
                    _ => pipeline::Priority::High,
                };
                let server = Arc::clone(&self);
                let handle = Arc::clone(&handle);
                let log = log.clone();
                self.pool.submit(
                    priority,
                    Box::new(move || {
                        if let Err(e) = server.dispatch_frame(&handle, &log, frame.mode, frame.payload) {
                            warn!(log, "dispatch failed, disconnecting"; "error" => %e);
                            server.disconnect(&handle, &log, "dispatch failure");
                        }
                    }),
                );
            }
        }
    }

    /// Starts the per-session auto-echo ticker once the handshake has negotiated it on, sending
    /// `echo` every `auto_echo_interval_seconds` until the session disconnects or the interval is
    /// zero (disabled in all but name).
    fn spawn_auto_echo(&self, handle: Arc<SessionHandle>, log: Logger) {
        let interval_seconds = {
            let session = handle.session.lock().expect("session lock poisoned");
            if !session.auto_echo || session.auto_echo_interval_seconds == 0 {
                return;
            }
            session.auto_echo_interval_seconds
        };
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(u64::from(interval_seconds)));
            if handle.is_disconnected() {
                return;
            }
            let echo = {
                let session = handle.session.lock().expect("session lock poisoned");
                if !session.is_confirmed() {
                    return;
                }
                session.build_echo()
            };
            if let Err(e) = handle.send_container(&echo) {
                warn!(log, "auto-echo send failed"; "error" => %e);
                return;
            }
        });
    }

    /// Fans `container` out to every confirmed session (§4.6).
    pub fn send(&self, container: &Container) {
        self.registry.send(container);
    }

    /// Fans `container` out to every confirmed session whose negotiated type allows `file` mode.
    pub fn send_files(&self, container: &Container) {
        for handle in self.registry.confirmed_file_sessions() {
            let _ = handle.send_container(container);
        }
    }

    /// Fans a `binary` payload out to whichever confirmed session owns `target_id`.
    pub fn send_binary(&self, payload: &BinaryPayload) {
        self.registry
            .send_binary(&payload.target_id, DataMode::Binary, &payload.encode(), &self.pool, &self.logger);
    }

    /// Sends an `echo` to every confirmed, auto-echo-enabled session immediately, independent of
    /// each session's own ticker.
    pub fn echo(&self) {
        self.registry.echo();
    }

    fn dispatch_frame(&self, handle: &Arc<SessionHandle>, log: &Logger, mode: DataMode, payload: Vec<u8>) -> Result<()> {
        let decrypted = handle.maybe_decrypt(&payload, mode)?;
        let plain = handle.maybe_decompress(&decrypted)?;
        match mode {
            DataMode::Packet => self.dispatch_container(handle, log, &Container::deserialize(&plain)?),
            DataMode::Binary => self.dispatch_binary(handle, log, &BinaryPayload::decode(&plain)?),
            DataMode::File => self.dispatch_file(handle, log, &plain),
        }
    }

    fn dispatch_container(&self, handle: &Arc<SessionHandle>, log: &Logger, container: &Container) -> Result<()> {
        match container.header.message_type.as_str() {
            message::REQUEST_CONNECTION => {
                let reply = {
                    let mut session = handle.session.lock().expect("session lock poisoned");
                    let reply = session.handle_request_connection(
                        container,
                        &self.config.endpoint.connection_key,
                        self.config.endpoint.encrypt_mode,
                        self.config.endpoint.compress_mode,
                        &self.config.endpoint.possible_session_types,
                    )?;
                    if handle.kill_on_handshake {
                        session.state = core_proto::State::Terminating;
                    }
                    reply
                };
                handle.send_container(&reply)?;
                let confirmed = !handle.kill_on_handshake
                    && handle.session.lock().expect("session lock poisoned").is_confirmed();
                self.notify_connect(&container.header.source_id, confirmed);
                if confirmed {
                    self.spawn_auto_echo(Arc::clone(handle), log.clone());
                } else {
                    self.disconnect(handle, log, "handshake rejected");
                }
                Ok(())
            }
            message::ECHO => {
                if core_proto::Session::is_echo_response(container) {
                    debug!(log, "echo round trip completed");
                    Ok(())
                } else {
                    let reply = core_proto::Session::build_echo_reply(container);
                    handle.send_container(&reply)
                }
            }
            _ => {
                let deliver = {
                    let session = handle.session.lock().expect("session lock poisoned");
                    session.should_deliver(container, &self.config.endpoint.ignore_snipping_targets)
                };
                if deliver {
                    (self.callbacks.on_message)(container);
                }
                Ok(())
            }
        }
    }

    fn dispatch_binary(&self, handle: &Arc<SessionHandle>, log: &Logger, payload: &BinaryPayload) -> Result<()> {
        let session = handle.session.lock().expect("session lock poisoned");
        if !session.is_confirmed() || !session.session_type.allows(DataMode::Binary) {
            return Ok(());
        }
        drop(session);
        self.registry
            .send_binary(&payload.target_id, DataMode::Binary, &payload.encode(), &self.pool, log);
        Ok(())
    }

    fn dispatch_file(&self, handle: &Arc<SessionHandle>, log: &Logger, plain: &[u8]) -> Result<()> {
        let upload = FileUploadPayload::decode(plain)?;
        let save_result = fileio::save_file(&upload.target_path, &upload.file_bytes);
        let final_target_path = match &save_result {
            Ok(()) => upload.target_path.clone(),
            Err(e) => {
                warn!(log, "file save failed"; "error" => %e);
                String::new()
            }
        };

        let notify = FileNotifyPayload {
            indication_id: upload.indication_id,
            target_id: upload.source_id,
            target_sub_id: upload.source_sub_id,
            final_target_path,
        };
        handle.send_via_pipeline(&self.pool, DataMode::File, notify.encode(), log.clone());
        Ok(())
    }

    fn disconnect(&self, handle: &Arc<SessionHandle>, log: &Logger, reason: &str) {
        if handle.is_disconnected() {
            return;
        }
        handle.mark_disconnected();
        self.registry.remove(handle.id);
        debug!(log, "session removed"; "reason" => reason);
        self.notify_disconnect(&peer_target_id(handle));
    }

    /// Connection notifications run detached, off both the I/O thread and the pool, so a
    /// re-entrant user callback (one that calls back into the server) cannot deadlock either.
    fn notify_connect(&self, source_id: &str, confirmed: bool) {
        let on_connect = Arc::clone(&self.callbacks.on_connect);
        let source_id = source_id.to_string();
        std::thread::spawn(move || (on_connect)(&source_id, confirmed));
    }

    fn notify_disconnect(&self, target_id: &str) {
        let on_disconnect = Arc::clone(&self.callbacks.on_disconnect);
        let target_id = target_id.to_string();
        std::thread::spawn(move || (on_disconnect)(&target_id));
    }
}

fn peer_target_id(handle: &SessionHandle) -> String {
    handle.session.lock().expect("session lock poisoned").target_id.clone()
}
