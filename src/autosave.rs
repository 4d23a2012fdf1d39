//! Periodic auto-save trigger.
//!
//! The ticker only signals; the owner of the document pipeline calls
//! `tick()` when a signal arrives, keeping all pipeline state on one
//! thread.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

/// Background thread emitting one [`Instant`] per period.
///
/// Stops when the receiver is dropped or [`Ticker::stop`] is called.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(period: Duration) -> std::io::Result<(Self, Receiver<Instant>)> {
        let (tick_tx, tick_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("quillpad-autosave".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if tick_tx.send(Instant::now()).is_err() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("autosave ticker stopped");
            })?;
        Ok((
            Self {
                period,
                stop: Some(stop_tx),
                handle: Some(handle),
            },
            tick_rx,
        ))
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
