//! Cancellable periodic task driving the simulation
//!
//! The ticker runs on its own thread and waits on a stop channel between
//! ticks, so stopping it takes effect immediately instead of after the
//! current period elapses. A tick already waiting for its turn checks the
//! cancelled flag before changing anything.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

pub(crate) struct Ticker {
    stop_tx: Option<Sender<()>>,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start calling `on_tick` every `period`, first call one full period from now
    ///
    /// `on_tick` gets the cancelled flag and must not change anything once it is
    /// set. The loop ends when `on_tick` returns false or the ticker is stopped.
    pub fn start<F>(period: Duration, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut(&AtomicBool) -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = thread::Builder::new()
            .name("yard-ticker".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !on_tick(&flag) {
                            debug!("Ticker cancelled or target gone, exiting");
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!("Simulation started - state changes every {:?}", period);
        Ok(Self {
            stop_tx: Some(stop_tx),
            cancelled,
            handle: Some(handle),
        })
    }

    /// Stop the ticker and wait for its thread. Calling it again is a no-op.
    pub fn stop(&mut self) {
        self.halt(true);
    }

    /// Stop the ticker without waiting for its thread
    ///
    /// For callers that may hold up the tick in progress; the thread exits on
    /// its own once it sees the cancelled flag or the closed channel.
    pub fn cancel(&mut self) {
        self.halt(false);
    }

    fn halt(&mut self, wait: bool) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        self.cancelled.store(true, Ordering::SeqCst);
        drop(stop_tx);

        if let Some(handle) = self.handle.take() {
            // Never join from the ticker thread itself
            if wait && handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Ticker thread panicked");
            }
        }
        info!("Simulation stopped");
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
