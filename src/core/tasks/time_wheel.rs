// src/core/tasks/time_wheel.rs

//! A keyed, cancellable delayed-task scheduler used for TTL expiry.
//!
//! Jobs live in a ring of buckets advanced by a fixed tick. Insertion,
//! removal and ticks are all serialized through one event loop, so the
//! key→bucket index needs no locking. Adding a job under an existing key
//! replaces the previous one. Due callbacks are dispatched on fresh tasks
//! with panics caught and logged.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// The callback fired when a job comes due.
pub type Job = BoxFuture<'static, ()>;

struct PendingTask {
    key: String,
    delay: Duration,
    job: Job,
}

struct SlottedTask {
    circles: usize,
    job: Job,
}

/// Handle to the scheduler's event loop.
pub struct TimeWheel {
    insert_tx: mpsc::UnboundedSender<PendingTask>,
    remove_tx: mpsc::UnboundedSender<String>,
    abort: CancellationToken,
}

impl TimeWheel {
    /// Spawns the wheel's event loop with `slot_count` buckets advanced every
    /// `interval`.
    pub fn start(interval: Duration, slot_count: usize) -> Self {
        let (insert_tx, insert_rx) = mpsc::unbounded_channel();
        let (remove_tx, remove_rx) = mpsc::unbounded_channel();
        let abort = CancellationToken::new();
        let loop_abort = abort.clone();
        tokio::spawn(run_wheel(interval, slot_count, insert_rx, remove_rx, loop_abort));
        Self {
            insert_tx,
            remove_tx,
            abort,
        }
    }

    /// Schedules `job` to run after `delay`. Re-using a key replaces the
    /// previously scheduled job.
    pub fn add_job(&self, key: String, delay: Duration, job: Job) {
        let _ = self.insert_tx.send(PendingTask { key, delay, job });
    }

    /// Schedules `job` to run at the wall-clock instant `at`.
    pub fn add_job_at(&self, key: String, at: SystemTime, job: Job) {
        let delay = at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        self.add_job(key, delay, job);
    }

    /// Cancels the job stored under `key`, if any.
    pub fn remove_job(&self, key: &str) {
        let _ = self.remove_tx.send(key.to_string());
    }

    /// Stops the event loop. Pending jobs are dropped without firing.
    pub fn abort(&self) {
        self.abort.cancel();
    }
}

async fn run_wheel(
    interval: Duration,
    slot_count: usize,
    mut insert_rx: mpsc::UnboundedReceiver<PendingTask>,
    mut remove_rx: mpsc::UnboundedReceiver<String>,
    abort: CancellationToken,
) {
    let mut slots: Vec<HashMap<String, SlottedTask>> =
        (0..slot_count).map(|_| HashMap::new()).collect();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut current = 0usize;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                fire_slot(&mut slots[current], &mut positions);
                current = (current + 1) % slot_count;
            }
            Some(task) = insert_rx.recv() => {
                if let Some(old_slot) = positions.remove(&task.key) {
                    slots[old_slot].remove(&task.key);
                }
                let steps = (task.delay.as_millis() / interval.as_millis().max(1)) as usize;
                let slot = (current + steps) % slot_count;
                let circles = steps / slot_count;
                positions.insert(task.key.clone(), slot);
                slots[slot].insert(task.key, SlottedTask { circles, job: task.job });
            }
            Some(key) = remove_rx.recv() => {
                if let Some(slot) = positions.remove(&key) {
                    slots[slot].remove(&key);
                }
            }
            _ = abort.cancelled() => {
                debug!("time wheel aborted");
                return;
            }
        }
    }
}

fn fire_slot(slot: &mut HashMap<String, SlottedTask>, positions: &mut HashMap<String, usize>) {
    let due: Vec<String> = slot
        .iter_mut()
        .filter_map(|(key, task)| {
            if task.circles > 0 {
                task.circles -= 1;
                None
            } else {
                Some(key.clone())
            }
        })
        .collect();

    for key in due {
        if let Some(task) = slot.remove(&key) {
            positions.remove(&key);
            tokio::spawn(async move {
                if AssertUnwindSafe(task.job).catch_unwind().await.is_err() {
                    error!("time wheel job '{key}' panicked");
                }
            });
        }
    }
}
