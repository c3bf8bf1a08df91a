//! The fixed-priority multi-queue worker pool (C4): each worker owns one priority queue and
//! drains a static fallback list when its own queue is empty, blocking on a shared condvar-backed
//! channel wake-up when every queue it covers is empty.
use crossbeam_channel::{unbounded, Receiver, Sender};
use slog::{error, Logger};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Scheduling priority. Jobs of the same priority run in strict enqueue order; across priorities
/// there is no ordering guarantee beyond each worker preferring its own queue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Top,
    High,
    Normal,
    Low,
}

impl Priority {
    const ALL: [Priority; 4] = [Priority::Top, Priority::High, Priority::Normal, Priority::Low];

    fn index(self) -> usize {
        match self {
            Priority::Top => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// A unit of CPU-bound work submitted to the pool. `Job` is consumed exactly once by whichever
/// worker pops it.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Number of workers to spawn per priority (besides the single fixed `top` worker).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub high_priority_workers: usize,
    pub normal_priority_workers: usize,
    pub low_priority_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            high_priority_workers: 8,
            normal_priority_workers: 8,
            low_priority_workers: 8,
        }
    }
}

struct Queues {
    senders: [Sender<Job>; 4],
    receivers: [Receiver<Job>; 4],
}

impl Queues {
    fn new() -> Queues {
        let (ts, tr) = unbounded();
        let (hs, hr) = unbounded();
        let (ns, nr) = unbounded();
        let (ls, lr) = unbounded();
        Queues {
            senders: [ts, hs, ns, ls],
            receivers: [tr, hr, nr, lr],
        }
    }
}

/// The priority-scheduled worker pool. One `top` worker is always present; `high`/`normal`/`low`
/// worker counts come from `PoolConfig`. A `high` worker also drains `normal` and `low` when its
/// own queue is empty, and so on down the fallback chain — see `fallback_list`.
pub struct WorkerPool {
    queues: Arc<Queues>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    logger: Logger,
}

/// The declared cross-priority stealing order for a worker owning `priority`. Static for the
/// life of the pool.
fn fallback_list(priority: Priority) -> &'static [Priority] {
    match priority {
        Priority::Top => &[Priority::High, Priority::Normal, Priority::Low],
        Priority::High => &[Priority::Normal, Priority::Low, Priority::Top],
        Priority::Normal => &[Priority::Low, Priority::High, Priority::Top],
        Priority::Low => &[Priority::Normal, Priority::High, Priority::Top],
    }
}

impl WorkerPool {
    pub fn new(config: PoolConfig, logger: Logger) -> WorkerPool {
        let queues = Arc::new(Queues::new());
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut handles = Vec::new();

        let counts = [
            (Priority::Top, 1),
            (Priority::High, config.high_priority_workers),
            (Priority::Normal, config.normal_priority_workers),
            (Priority::Low, config.low_priority_workers),
        ];

        for (priority, count) in counts {
            for worker_idx in 0..count {
                handles.push(spawn_worker(
                    priority,
                    worker_idx,
                    Arc::clone(&queues),
                    Arc::clone(&stopped),
                    logger.clone(),
                ));
            }
        }

        WorkerPool {
            queues,
            handles: Mutex::new(handles),
            stopped,
            logger,
        }
    }

    /// Enqueues `job` at `priority`. A no-op if the pool has already been stopped.
    pub fn submit(&self, priority: Priority, job: Job) {
        if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        if self.queues.senders[priority.index()].send(job).is_err() {
            error!(self.logger, "worker pool queue closed"; "priority" => ?priority);
        }
    }

    /// Refuses new enqueues and joins all worker threads. Workers notice the stop flag within
    /// one `WAKE_INTERVAL` of blocking, so shutdown completes in bounded time. Pending jobs still
    /// sitting in a queue at shutdown are discarded, not executed.
    pub fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut handles = self.handles.lock().expect("pool handle lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Upper bound on how long a blocked worker can go without re-checking the stop flag.
const WAKE_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

fn spawn_worker(
    owned: Priority,
    worker_idx: usize,
    queues: Arc<Queues>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    logger: Logger,
) -> JoinHandle<()> {
    let fallback = fallback_list(owned);
    thread::Builder::new()
        .name(format!("pool-{:?}-{}", owned, worker_idx))
        .spawn(move || {
            let mut order = Vec::with_capacity(Priority::ALL.len());
            order.push(owned);
            order.extend_from_slice(fallback);

            loop {
                if stopped.load(std::sync::atomic::Ordering::SeqCst) {
                    return;
                }
                // Try the owned queue, then each fallback, without blocking, before falling
                // back to a blocking select across all of them.
                let mut ran = false;
                for priority in &order {
                    if let Ok(job) = queues.receivers[priority.index()].try_recv() {
                        job();
                        ran = true;
                        break;
                    }
                }
                if ran {
                    continue;
                }

                let mut select = crossbeam_channel::Select::new();
                for priority in &order {
                    select.recv(&queues.receivers[priority.index()]);
                }
                match select.select_timeout(WAKE_INTERVAL) {
                    Ok(oper) => {
                        let priority = order[oper.index()];
                        if let Ok(job) = oper.recv(&queues.receivers[priority.index()]) {
                            job();
                        }
                    }
                    Err(_) => continue,
                }
            }
        })
        .expect("failed to spawn worker thread")
}
