//! Background expiry thread owned by a store. Stops when dropped.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

pub struct Sweeper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

/// Random point in `[0, interval)` so that many stores started together do not sweep in lockstep.
pub fn jittered(interval: Duration) -> Duration {
    let mut buf = [0u8; 8];
    if getrandom::getrandom(&mut buf).is_err() { return interval; }
    let permille = (u64::from_le_bytes(buf) % 1_000) as u32;
    interval * permille / 1_000
}

impl Sweeper {
    /// Run `tick` every `interval`, the first time after a random fraction of
    /// it. `tick` returns the number of removed entries, or `None` once the
    /// store it serves is gone.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> AppResult<Self>
    where
        F: FnMut() -> Option<usize> + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let flag = stop.clone();
        let label = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("strata-expire-{}", name))
            .spawn(move || {
                debug!(target: "strata::kv", "expiry thread for {} started (interval {:?})", label, interval);
                let mut wait = jittered(interval);
                loop {
                    {
                        let mut stopped = flag.0.lock();
                        if !*stopped { flag.1.wait_for(&mut stopped, wait); }
                        if *stopped { break; }
                    }
                    match tick() {
                        Some(0) => {}
                        Some(n) => debug!(target: "strata::kv", "{}: expired {} entries", label, n),
                        None => break,
                    }
                    wait = interval;
                }
                debug!(target: "strata::kv", "expiry thread for {} stopped", label);
            })
            .map_err(|e| AppError::internal("sweeper_spawn", format!("cannot start expiry thread: {}", e)))?;
        Ok(Self { stop, handle: Some(handle) })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        *self.stop.0.lock() = true;
        self.stop.1.notify_all();
        if let Some(h) = self.handle.take() {
            if h.thread().id() == std::thread::current().id() { return; }
            if h.join().is_err() { warn!(target: "strata::kv", "expiry thread panicked"); }
        }
    }
}
