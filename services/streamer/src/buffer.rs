//! Tick buffer and batch drainer
//!
//! A bounded FIFO decouples the socket task (producer) from the
//! aggregation task (consumer). The producer never blocks: when the buffer
//! is full the tick is dropped and counted, because stalling the socket
//! task would back up the heartbeat and kill the connection.
//!
//! The drainer pops under a dual bound — at most `max_ticks` or until
//! `max_wait` elapses — which bounds memory and end-to-end latency under
//! bursty load while still draining immediately under sparse load.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use crate::counters::Counters;
use crate::protocol::WireTrade;

/// Tuning for the buffer and drain loop.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Buffer capacity; overflow drops at the producer.
    pub capacity: usize,
    /// Maximum ticks per batch.
    pub max_ticks: usize,
    /// Wall-clock budget per drain pass.
    pub max_wait: Duration,
    /// Sleep between drain passes when the buffer is empty.
    pub idle_sleep: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            max_ticks: 2_000,
            max_wait: Duration::from_millis(250),
            idle_sleep: Duration::from_millis(250),
        }
    }
}

/// Create a connected producer/drainer pair.
pub fn tick_buffer(config: DrainConfig, counters: Arc<Counters>) -> (TickProducer, BatchDrainer) {
    let (tx, rx) = mpsc::channel(config.capacity);
    (
        TickProducer {
            tx,
            counters: counters.clone(),
        },
        BatchDrainer {
            rx,
            config,
        },
    )
}

/// Producer half held by the connection task.
#[derive(Clone)]
pub struct TickProducer {
    tx: mpsc::Sender<WireTrade>,
    counters: Arc<Counters>,
}

impl TickProducer {
    /// Push a trade without blocking. Drops (and counts) on overflow.
    pub fn push(&self, trade: WireTrade) {
        match self.tx.try_send(trade) {
            Ok(()) => Counters::incr(&self.counters.ticks_received),
            Err(mpsc::error::TrySendError::Full(trade)) => {
                Counters::incr(&self.counters.ticks_dropped_buffer);
                warn!(symbol = %trade.symbol, "tick buffer full, dropping tick");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Consumer is gone; the service is shutting down.
            }
        }
    }
}

/// Consumer half owned by the drain task.
pub struct BatchDrainer {
    rx: mpsc::Receiver<WireTrade>,
    config: DrainConfig,
}

impl BatchDrainer {
    /// Drain one batch under the size/time budget.
    ///
    /// Returns an empty batch when the buffer is empty; the caller sleeps
    /// [`DrainConfig::idle_sleep`] before polling again so the running flag
    /// is rechecked periodically.
    pub fn drain(&mut self) -> Vec<WireTrade> {
        let start = Instant::now();
        let mut batch = Vec::new();
        while batch.len() < self.config.max_ticks {
            match self.rx.try_recv() {
                Ok(trade) => batch.push(trade),
                Err(_) => break,
            }
            if start.elapsed() > self.config.max_wait {
                break;
            }
        }
        batch
    }

    pub fn idle_sleep(&self) -> Duration {
        self.config.idle_sleep
    }
}
