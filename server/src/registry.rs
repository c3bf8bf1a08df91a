//! The session registry (§4.6): an ordered set of live sessions guarded by a mutex, with
//! broadcast helpers that copy callbacks/targets out under the lock and do the actual I/O after
//! release.
use crate::session_handle::SessionHandle;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wire::Container;

#[derive(Default)]
pub struct Registry {
    sessions: Mutex<BTreeMap<u64, Arc<SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.lock().expect("registry lock poisoned").insert(handle.id, handle);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().expect("registry lock poisoned").remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().expect("registry lock poisoned").get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().expect("registry lock poisoned").values().cloned().collect()
    }

    /// Fans a container out to every confirmed session.
    pub fn send(&self, container: &Container) {
        for handle in self.snapshot() {
            if handle.session.lock().expect("session lock poisoned").is_confirmed() {
                let _ = handle.send_container(container);
            }
        }
    }

    /// Every confirmed session whose negotiated type allows `file` mode, for `send_files`.
    pub fn confirmed_file_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.snapshot()
            .into_iter()
            .filter(|handle| {
                let session = handle.session.lock().expect("session lock poisoned");
                session.is_confirmed() && session.session_type.allows(wire::DataMode::File)
            })
            .collect()
    }

    /// Fans a binary/file payload out through the priority pool; each session independently
    /// filters on its own target id vs. `target_id`.
    pub fn send_binary(
        &self,
        target_id: &str,
        mode: wire::DataMode,
        payload: &[u8],
        pool: &Arc<pipeline::WorkerPool>,
        log: &Logger,
    ) {
        for handle in self.snapshot() {
            let matches_target = {
                let session = handle.session.lock().expect("session lock poisoned");
                session.is_confirmed() && session.target_id == target_id
            };
            if matches_target {
                handle.send_via_pipeline(pool, mode, payload.to_vec(), log.clone());
            }
        }
    }

    /// Fans an `echo` message out to every confirmed session with `auto_echo` enabled.
    pub fn echo(&self) {
        for handle in self.snapshot() {
            let echo = {
                let session = handle.session.lock().expect("session lock poisoned");
                if !session.is_confirmed() || !session.auto_echo {
                    continue;
                }
                session.build_echo()
            };
            let _ = handle.send_container(&echo);
        }
    }
}
