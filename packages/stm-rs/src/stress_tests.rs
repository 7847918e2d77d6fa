//! Stress tests designed to break the stm engine.
//!
//! These tests exercise fan-out, backpressure and cancellation under load.

#[cfg(test)]
mod stress_tests {
    use crate::cmd::{batch, timer, to_cmd, Cmd};
    use crate::machine::{Machine, MachineBuilder};
    use crate::state::{State, Transition};
    use crate::testing::Recorder;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(10);

    // ==========================================================================
    // Test States
    // ==========================================================================

    struct Collect {
        seen: Arc<Recorder<u64>>,
    }

    impl State<u64> for Collect {
        fn update(self: Box<Self>, msg: u64) -> Transition<u64> {
            self.seen.record(msg);
            (self, None)
        }
    }

    /// Re-sends `n + 1` until the limit, one message at a time.
    struct Chain {
        limit: u64,
        seen: Arc<Recorder<u64>>,
    }

    impl State<u64> for Chain {
        fn update(self: Box<Self>, msg: u64) -> Transition<u64> {
            self.seen.record(msg);
            let next = (msg < self.limit).then(|| to_cmd(msg + 1));
            (self, next)
        }
    }

    /// Counts updates without storing them.
    struct Tally {
        count: Arc<AtomicUsize>,
    }

    impl State<u64> for Tally {
        fn update(self: Box<Self>, _msg: u64) -> Transition<u64> {
            self.count.fetch_add(1, Ordering::SeqCst);
            (self, None)
        }
    }

    fn tree(depth: u32, next: &mut u64) -> Cmd<u64> {
        if depth == 0 {
            let leaf = *next;
            *next += 1;
            return to_cmd(leaf);
        }
        batch([tree(depth - 1, next), tree(depth - 1, next)])
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    fn assert_exactly_once(seen: &Recorder<u64>, expected: u64) {
        let messages = seen.messages();
        let unique: HashSet<u64> = messages.iter().copied().collect();
        assert_eq!(messages.len() as u64, expected, "lost or duplicated messages");
        assert_eq!(unique.len() as u64, expected, "duplicated messages");
        assert!(unique.iter().all(|n| *n < expected));
    }

    // ==========================================================================
    // TEST: Many producers into a tiny queue
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_small_queue() {
        let producers = 16u64;
        let per_producer = 250u64;
        let seen = Recorder::new();
        let machine = MachineBuilder::new(Collect { seen: seen.clone() })
            .with_message_buffer_size(4)
            .start(CancellationToken::new());

        let mut tasks = Vec::new();
        for p in 0..producers {
            let handle = machine.handle();
            tasks.push(tokio::spawn(async move {
                for i in 0..per_producer {
                    handle.send(to_cmd(p * per_producer + i));
                    if i % 32 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let total = producers * per_producer;
        timeout(WAIT, seen.wait_for(total as usize)).await.unwrap();
        wait_until(|| machine.inflight() == 0).await;
        assert_exactly_once(&seen, total);
    }

    // ==========================================================================
    // TEST: Long update -> command -> update chains
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_long_chain_preserves_order() {
        let limit = 2_000u64;
        let seen = Recorder::new();
        let machine = Machine::new(
            CancellationToken::new(),
            Chain {
                limit,
                seen: seen.clone(),
            },
        );

        machine.send(to_cmd(0u64));

        timeout(WAIT, seen.wait_for(limit as usize + 1)).await.unwrap();
        // Only one message is ever in flight, so arrival order is total
        assert_eq!(seen.messages(), (0..=limit).collect::<Vec<_>>());
    }

    // ==========================================================================
    // TEST: Wide and deep batches
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wide_batch() {
        let width = 5_000u64;
        let seen = Recorder::new();
        let machine = Machine::new(CancellationToken::new(), Collect { seen: seen.clone() });

        machine.send(batch((0..width).map(to_cmd)));

        timeout(WAIT, seen.wait_for(width as usize)).await.unwrap();
        wait_until(|| machine.inflight() == 0).await;
        assert_exactly_once(&seen, width);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deep_batch_tree() {
        let depth = 10;
        let mut next = 0u64;
        let cmd = tree(depth, &mut next);
        let leaves = next;
        assert_eq!(leaves, 1 << depth);

        let seen = Recorder::new();
        let machine = MachineBuilder::new(Collect { seen: seen.clone() })
            .with_message_buffer_size(2)
            .start(CancellationToken::new());

        machine.send(cmd);

        timeout(WAIT, seen.wait_for(leaves as usize)).await.unwrap();
        wait_until(|| machine.inflight() == 0).await;
        assert_exactly_once(&seen, leaves);
    }

    // ==========================================================================
    // TEST: Many timers with random delays
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_timers() {
        let count = 300u64;
        let seen = Recorder::new();
        let machine = Machine::new(CancellationToken::new(), Collect { seen: seen.clone() });

        for n in 0..count {
            let delay = Duration::from_millis(fastrand::u64(0..50));
            machine.send(timer(delay, n));
        }

        timeout(WAIT, seen.wait_for(count as usize)).await.unwrap();
        assert_exactly_once(&seen, count);
    }

    // ==========================================================================
    // TEST: Cancel while producers are still sending
    // ==========================================================================
    //
    // Cancellation must never panic, and once the loop reports stopped no
    // further update may happen.

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_under_load() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let machine = MachineBuilder::new(Tally {
            count: count.clone(),
        })
        .with_message_buffer_size(8)
        .start(cancel.clone());

        let producer = {
            let handle = machine.handle();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut n = 0u64;
                while !cancel.is_cancelled() {
                    handle.send(to_cmd(n));
                    n += 1;
                    tokio::task::yield_now().await;
                }
                // Keep sending into the stopped machine
                for i in 0..100 {
                    handle.send(to_cmd(n + i));
                }
            })
        };

        wait_until(|| count.load(Ordering::SeqCst) >= 100).await;
        cancel.cancel();
        producer.await.unwrap();
        wait_until(|| machine.is_stopped()).await;

        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);

        // The parked queue is full; whatever did not fit stays in flight
        wait_until(|| machine.queued() == machine.capacity()).await;
        timeout(WAIT, machine.join()).await.unwrap().unwrap();
    }
}
