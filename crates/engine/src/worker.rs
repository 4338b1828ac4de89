//! Background worker: one thread that drains flush and compaction requests
//! and periodically re-checks the compaction strategy.
//!
//! Requests are coalescing hints, not jobs: a `Flush` drains every frozen
//! Memtable and a `Compact` runs compactions until none is due, so a full
//! queue loses nothing.

use crossbeam_channel::{never, select, tick, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::EngineInner;

pub(crate) const TASK_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Task {
    Flush,
    Compact,
    Shutdown,
}

pub(crate) fn spawn(inner: Arc<EngineInner>, rx: Receiver<Task>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("strata-worker".to_string())
        .spawn(move || run(&inner, &rx))
}

fn run(inner: &EngineInner, rx: &Receiver<Task>) {
    let ticker = match inner.config.compaction_interval() {
        Some(every) => tick(every),
        None => never(),
    };
    debug!("background worker started");

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(Task::Flush) => flush_then_compact(inner),
                Ok(Task::Compact) => inner.run_pending_compactions(),
                Ok(Task::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => {
                // also retries flushes that failed earlier
                if !inner.snapshot().frozen.is_empty() {
                    flush_then_compact(inner);
                } else {
                    inner.run_pending_compactions();
                }
            }
        }
    }
    debug!("background worker stopped");
}

fn flush_then_compact(inner: &EngineInner) {
    match inner.flush_frozen() {
        Ok(_) => inner.run_pending_compactions(),
        Err(e) => error!(error = %e, "background flush failed, will retry"),
    }
}
