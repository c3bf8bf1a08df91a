//! The data-driven pipeline stage engine (C3): builds the fixed chain of compress/encrypt/send
//! (outbound) or decrypt/decompress/parse (inbound) stages for a given `(direction, data_mode,
//! compress_on, encrypt_on)` combination, each entry tagged with the priority it runs at.
use crate::pool::{Priority, WorkerPool};
use flux::error::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Packet,
    Binary,
    File,
}

/// A `bytes -> bytes` transform plus the priority it is scheduled at. Boxed (rather than a bare
/// `fn` pointer) so stages like encrypt/decrypt can close over per-session key material. An empty
/// input buffer aborts the chain for that item (the engine surfaces this as an error to the
/// caller rather than invoking later stages).
pub type StageFn = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

#[derive(Clone)]
pub struct Stage {
    pub priority: Priority,
    pub run: StageFn,
}

/// Wraps a plain function or non-capturing closure as a `StageFn`.
pub fn stage_fn<F>(f: F) -> StageFn
where
    F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn identity(bytes: &[u8]) -> Result<Vec<u8>> {
    Ok(bytes.to_vec())
}

/// Builds the stage chain for one `(direction, mode, compress_on, encrypt_on)` combination.
/// Skipped transforms are represented as an `identity` stage at the priority the real transform
/// would have run at, so the schedule shape stays fixed regardless of which flags are set.
pub fn build_chain(
    direction: Direction,
    mode: DataMode,
    compress_on: bool,
    encrypt_on: bool,
    compress: StageFn,
    decompress: StageFn,
    encrypt: StageFn,
    decrypt: StageFn,
    send: StageFn,
    receive_payload: StageFn,
) -> Vec<Stage> {
    let compress_priority = match mode {
        DataMode::Packet => Priority::High,
        _ => Priority::Normal,
    };
    match direction {
        Direction::Outbound => {
            let first_priority = match mode {
                DataMode::Packet => Priority::High,
                DataMode::Binary => Priority::Normal,
                DataMode::File => Priority::Low,
            };
            vec![
                Stage {
                    priority: first_priority,
                    run: receive_payload,
                },
                Stage {
                    priority: compress_priority,
                    run: if compress_on { compress } else { stage_fn(identity) },
                },
                Stage {
                    priority: Priority::Normal,
                    run: if encrypt_on { encrypt } else { stage_fn(identity) },
                },
                Stage {
                    priority: Priority::Top,
                    run: send,
                },
            ]
        }
        Direction::Inbound => {
            let last_priority = match mode {
                DataMode::File => Priority::Low,
                _ => Priority::High,
            };
            vec![
                Stage {
                    priority: Priority::Normal,
                    run: if encrypt_on { decrypt } else { stage_fn(identity) },
                },
                Stage {
                    priority: compress_priority,
                    run: if compress_on { decompress } else { stage_fn(identity) },
                },
                Stage {
                    priority: last_priority,
                    run: receive_payload,
                },
            ]
        }
    }
}

/// Runs a built chain synchronously against `input`, returning the final output or the first
/// stage error. Callers that want pool-scheduled execution submit each stage's `run` as a job at
/// its declared priority instead of calling this directly; this helper exists for tests and for
/// code paths (e.g. tiny control messages) that do not need to cross the pool.
pub fn run_chain(chain: &[Stage], input: &[u8]) -> Result<Vec<u8>> {
    let mut bytes = input.to_vec();
    for stage in chain {
        if bytes.is_empty() {
            return Err(flux::error::Error::IllegalOperation(
                "pipeline stage received an empty buffer".into(),
            ));
        }
        bytes = (stage.run)(&bytes)?;
    }
    Ok(bytes)
}

/// Schedules `chain` on `pool`, one stage per job, each continuation submitted at its own
/// stage's declared priority rather than run synchronously on the submitting thread. `on_error`
/// is invoked (off the caller's thread, from whichever worker hit the failure) if any stage
/// returns an error or an empty buffer reaches a non-final stage.
pub fn submit_chain(
    pool: Arc<WorkerPool>,
    chain: Vec<Stage>,
    input: Vec<u8>,
    on_error: Arc<dyn Fn(flux::error::Error) + Send + Sync>,
) {
    submit_from(pool, Arc::new(chain), 0, input, on_error);
}

fn submit_from(
    pool: Arc<WorkerPool>,
    chain: Arc<Vec<Stage>>,
    index: usize,
    input: Vec<u8>,
    on_error: Arc<dyn Fn(flux::error::Error) + Send + Sync>,
) {
    let stage = match chain.get(index) {
        Some(stage) => stage.clone(),
        None => return,
    };
    pool.submit(
        stage.priority,
        Box::new(move || {
            if input.is_empty() {
                on_error(flux::error::Error::IllegalOperation(
                    "pipeline stage received an empty buffer".into(),
                ));
                return;
            }
            match (stage.run)(&input) {
                Ok(output) => submit_from(pool, chain, index + 1, output, on_error),
                Err(e) => on_error(e),
            }
        }),
    );
}
