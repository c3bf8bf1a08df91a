//! The staged send/receive pipeline: a data-driven stage table (C3) scheduled on a fixed-priority
//! worker pool (C4).
pub mod pool;
pub mod stage;

pub use pool::{Job, PoolConfig, Priority, WorkerPool};
pub use stage::{build_chain, run_chain, stage_fn, submit_chain, DataMode, Direction, Stage, StageFn};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn upper(bytes: &[u8]) -> flux::error::Result<Vec<u8>> {
        Ok(bytes.iter().map(|b| b.to_ascii_uppercase()).collect())
    }

    fn reverse(bytes: &[u8]) -> flux::error::Result<Vec<u8>> {
        let mut v = bytes.to_vec();
        v.reverse();
        Ok(v)
    }

    fn passthrough(bytes: &[u8]) -> flux::error::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    #[test]
    fn identity_chain_round_trips_packet() {
        let chain = build_chain(
            Direction::Outbound,
            DataMode::Packet,
            false,
            false,
            stage_fn(upper),
            stage_fn(reverse),
            stage_fn(upper),
            stage_fn(reverse),
            stage_fn(passthrough),
            stage_fn(passthrough),
        );
        let out = run_chain(&chain, b"hello").expect("run_chain");
        assert_eq!(out, b"hello");
    }

    #[test]
    fn enabling_compress_and_encrypt_applies_both_transforms() {
        let chain = build_chain(
            Direction::Outbound,
            DataMode::Binary,
            true,
            true,
            stage_fn(upper),
            stage_fn(passthrough),
            stage_fn(reverse),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
        );
        let out = run_chain(&chain, b"hello").expect("run_chain");
        let mut expected: Vec<u8> = b"hello".iter().map(|b| b.to_ascii_uppercase()).collect();
        expected.reverse();
        assert_eq!(out, expected);
    }

    #[test]
    fn packet_compress_stage_runs_at_high_priority_other_modes_at_normal() {
        let build = |mode| {
            build_chain(
                Direction::Outbound,
                mode,
                true,
                false,
                stage_fn(passthrough),
                stage_fn(passthrough),
                stage_fn(passthrough),
                stage_fn(passthrough),
                stage_fn(passthrough),
                stage_fn(passthrough),
            )
        };
        assert_eq!(build(DataMode::Packet)[1].priority, Priority::High);
        assert_eq!(build(DataMode::Binary)[1].priority, Priority::Normal);
        assert_eq!(build(DataMode::File)[1].priority, Priority::Normal);

        let inbound = build_chain(
            Direction::Inbound,
            DataMode::Packet,
            true,
            false,
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
        );
        assert_eq!(inbound[1].priority, Priority::High);
    }

    #[test]
    fn empty_buffer_mid_chain_aborts() {
        fn empty(_: &[u8]) -> flux::error::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        let chain = build_chain(
            Direction::Outbound,
            DataMode::Packet,
            true,
            false,
            stage_fn(empty),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
        );
        assert!(run_chain(&chain, b"x").is_err());
    }

    #[test]
    fn pool_runs_jobs_and_stop_is_idempotent_and_bounded() {
        let logger = flux::logging::init(&flux::logging::LoggingConfig::default());
        let pool = WorkerPool::new(PoolConfig::default(), logger);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.submit(
                Priority::Normal,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 50 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);

        pool.stop();
        pool.stop();
    }

    #[test]
    fn submit_chain_runs_every_stage_on_the_pool_and_produces_final_output() {
        let logger = flux::logging::init(&flux::logging::LoggingConfig::default());
        let pool = Arc::new(WorkerPool::new(PoolConfig::default(), logger));
        let chain = build_chain(
            Direction::Outbound,
            DataMode::Packet,
            true,
            false,
            stage_fn(upper),
            stage_fn(passthrough),
            stage_fn(reverse),
            stage_fn(passthrough),
            stage_fn(passthrough),
            stage_fn(passthrough),
        );

        let result: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let result_writer = Arc::clone(&result);
        let send = stage_fn(move |bytes| {
            *result_writer.lock().unwrap() = Some(bytes.to_vec());
            Ok(Vec::new())
        });
        let mut chain = chain;
        chain.pop();
        chain.push(Stage {
            priority: Priority::Top,
            run: send,
        });

        let on_error: Arc<dyn Fn(flux::error::Error) + Send + Sync> =
            Arc::new(|e| panic!("pipeline stage failed: {e}"));
        submit_chain(Arc::clone(&pool), chain, b"hello".to_vec(), on_error);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while result.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(result.lock().unwrap().as_deref(), Some(b"OLLEH".as_ref()));
        pool.stop();
    }

    #[test]
    fn top_priority_preempts_backlog_when_a_top_worker_is_idle() {
        let logger = flux::logging::init(&flux::logging::LoggingConfig::default());
        let pool = WorkerPool::new(
            PoolConfig {
                high_priority_workers: 1,
                normal_priority_workers: 1,
                low_priority_workers: 1,
            },
            logger,
        );

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let order = Arc::clone(&order);
            pool.submit(
                Priority::Low,
                Box::new(move || {
                    order.lock().unwrap().push("low");
                }),
            );
        }
        {
            let order = Arc::clone(&order);
            pool.submit(
                Priority::Top,
                Box::new(move || {
                    order.lock().unwrap().push("top");
                }),
            );
        }

        std::thread::sleep(Duration::from_millis(200));
        let recorded = order.lock().unwrap().clone();
        assert!(recorded.contains(&"top"));
        pool.stop();
    }
}
