// Adaptive parallelism ceiling.
//
// Reads the network monitor and the engine's buffered-byte accounting,
// writes its own ceiling. The engine observes `current()` at scheduling
// points; changes are advisory and never interrupt in-flight fetches.

use crate::config::ConcurrencyConfig;
use crate::monitor::NetworkMonitor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

pub struct ConcurrencyController {
    min: usize,
    max: usize,
    current: AtomicUsize,
    memory_used: AtomicU64,
    memory_cap: u64,
    monitor: Arc<NetworkMonitor>,
    tick_interval: std::time::Duration,
    last_tick: Mutex<Instant>,
}

impl ConcurrencyController {
    pub fn new(config: &ConcurrencyConfig, monitor: Arc<NetworkMonitor>) -> Self {
        let initial = config
            .initial_parallel
            .clamp(config.min_parallel, config.max_parallel);
        Self {
            min: config.min_parallel,
            max: config.max_parallel,
            current: AtomicUsize::new(initial),
            memory_used: AtomicU64::new(0),
            memory_cap: config.memory_cap_bytes,
            monitor,
            tick_interval: config.tick_interval,
            last_tick: Mutex::new(Instant::now()),
        }
    }

    /// Current parallelism ceiling.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used.load(Ordering::Relaxed)
    }

    pub fn memory_cap(&self) -> u64 {
        self.memory_cap
    }

    /// Account `bytes` as buffered (a whole segment held for a decryption
    /// pass). Pair with `release`.
    pub fn reserve(&self, bytes: u64) {
        self.memory_used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn release(&self, bytes: u64) {
        // Saturating: a release without a matching reserve clamps at zero.
        let mut used = self.memory_used.load(Ordering::Relaxed);
        loop {
            let next = used.saturating_sub(bytes);
            match self.memory_used.compare_exchange_weak(
                used,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => used = actual,
            }
        }
    }

    /// Re-evaluate the ceiling: memory pressure first, then monitor policy.
    pub fn adjust(&self) {
        let current = self.current();
        let used = self.memory_used();

        let next = if used > self.memory_cap * 8 / 10 {
            self.min.max((current as f64 * 0.7) as usize)
        } else if self.monitor.should_reduce() {
            self.min.max(current.saturating_sub(1))
        } else if self.monitor.should_increase() && used < self.memory_cap / 2 {
            self.max.min(current + 1)
        } else {
            current
        };

        if next != current {
            debug!(
                from = current,
                to = next,
                memory_used = used,
                health = self.monitor.health_score(),
                "adjusted parallelism ceiling"
            );
            self.current.store(next, Ordering::Relaxed);
        }
    }

    /// Periodic variant of `adjust`, rate-limited to the tick interval.
    /// Called from the engine's scheduling loop.
    pub fn maybe_tick(&self) {
        let mut last = self.last_tick.lock().unwrap();
        if last.elapsed() >= self.tick_interval {
            *last = Instant::now();
            drop(last);
            self.adjust();
        }
    }
}
