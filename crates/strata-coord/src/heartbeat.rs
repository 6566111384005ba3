//! Cooperative progress heartbeat for long synchronous operations.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use strata_common::config::HeartbeatConfig;

/// Receives liveness signals while a long operation runs.
pub trait Watchdog: Send + Sync {
    /// The operation is still making progress.
    fn still_alive(&self);
}

struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// A background ticker that services an external liveness watchdog while a
/// long synchronous operation (temp-table copy, large schema alteration)
/// runs to completion.
///
/// The ticker is a cooperative keep-alive, not preemption: the primary
/// task never yields. Dropping the heartbeat stops the ticker
/// unconditionally, so holding it as a local guard covers both the
/// success and failure paths.
pub struct Heartbeat {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Starts ticking `watchdog` every `config.interval`.
    #[must_use]
    pub fn start(config: HeartbeatConfig, watchdog: Arc<dyn Watchdog>) -> Self {
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let interval = config.interval;
        let handle = std::thread::spawn(move || {
            Self::run(&thread_shared, interval, watchdog.as_ref());
        });
        Self {
            shared,
            handle: Some(handle),
        }
    }

    fn run(shared: &Shared, interval: Duration, watchdog: &dyn Watchdog) {
        let mut stopped = shared.stopped.lock();
        loop {
            if *stopped {
                return;
            }
            let timed_out = shared.wake.wait_for(&mut stopped, interval).timed_out();
            if *stopped {
                return;
            }
            if timed_out {
                watchdog.still_alive();
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        debug!("heartbeat stopped");
    }
}
