//! Recurring timer thread.
//!
//! The callback receives the wall-clock time since its previous call and
//! returns `false` to end the timer from the inside. `disarm` (and `Drop`)
//! stop the thread and wait for it, so no callback runs after they return.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, warn};

pub struct Timer {
    /// Dropping the sender wakes the thread and ends its loop.
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Timer {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut(Duration) -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            debug!(?interval, "timer thread started");
            let mut last = Instant::now();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let now = Instant::now();
                let dt = now - last;
                last = now;
                if !tick(dt) {
                    break;
                }
            }
            debug!("timer thread finished");
        })?;

        Ok(Timer {
            stop: Some(stop_tx),
            handle: Some(handle),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True until the thread has exited, from either side.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    /// Calling it from the timer's own callback only signals the stop.
    pub fn disarm(&mut self) {
        // Drop the sender before joining, or the thread never wakes.
        drop(self.stop.take());

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("interval", &self.interval)
            .field("armed", &self.is_armed())
            .finish()
    }
}
