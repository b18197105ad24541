//! Deferred retuning outside the sample delivery context.
//!
//! librtlsdr doesn't allow control transfers from inside its async read callback, so
//! the callback only posts the next frequency into a mailbox and a dedicated worker
//! thread performs the tuning call.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use sdr::{Cancel, Tune};
use shutdown::Shutdown;

/// Single-slot hand-off of the next frequency to tune.
///
/// A post overwrites any frequency the worker hasn't taken yet, so only the latest
/// decision is applied. This assumes a retune finishes well within one block period;
/// overwrites are counted and logged so a violation is visible.
pub struct RetuneMailbox {
    /// Pending frequency (Hz).
    slot: Mutex<Option<u32>>,
    /// Signalled on every post and on shutdown.
    wake: Condvar,
    /// Shared stop flag observed by the worker.
    stop: Shutdown,
    /// Number of posts that replaced an unconsumed frequency.
    overwritten: AtomicUsize,
    /// Set once the worker has left its loop.
    retired: AtomicBool,
}

impl RetuneMailbox {
    /// Create an empty `RetuneMailbox` tied to the given stop flag.
    pub fn new(stop: Shutdown) -> Self {
        RetuneMailbox {
            slot: Mutex::new(None),
            wake: Condvar::new(),
            stop: stop,
            overwritten: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Post the next frequency to tune, replacing any pending one.
    ///
    /// Never waits on the worker.
    pub fn post(&self, freq: u32) {
        let mut slot = self.lock();

        if let Some(prev) = slot.replace(freq) {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            warn!("retune to {} Hz skipped, superseded by {} Hz", prev, freq);
        }

        self.wake.notify_one();
    }

    /// Request a stop and wake the worker so it observes it.
    pub fn shutdown(&self) {
        self.stop.request();

        // Notify under the lock so a worker between its flag check and its wait can't
        // miss the wakeup.
        let _slot = self.lock();
        self.wake.notify_all();
    }

    /// Number of posts that replaced an unconsumed frequency.
    pub fn overwritten(&self) -> usize {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Whether the worker has exited and no retune can be in progress.
    pub fn retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Block until a frequency is pending and take it, or return `None` once a stop has
    /// been requested.
    fn take(&self) -> Option<u32> {
        let mut slot = self.lock();

        loop {
            if self.stop.requested() {
                return None;
            }

            if let Some(freq) = slot.take() {
                return Some(freq);
            }

            slot = self.wake.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<Option<u32>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<u32> {
        *self.lock()
    }
}

/// The delivery path stops the stream by shutting down the worker, which then cancels
/// the stream itself. Cancelling directly from the delivery callback could stall on the
/// device lock held by an in-progress retune.
impl Cancel for RetuneMailbox {
    fn cancel(&self) {
        self.shutdown();
    }
}

/// Stops the stream from the delivery path in alternating mode.
///
/// While the worker runs, only the worker is shut down and it cancels the device on its
/// way out. After it has exited, the device is cancelled directly, so a stop is never
/// lost when the worker's own cancel came before the stream started.
pub struct DeliveryCancel<C: Cancel> {
    mailbox: Arc<RetuneMailbox>,
    device: C,
}

impl<C: Cancel> DeliveryCancel<C> {
    pub fn new(mailbox: Arc<RetuneMailbox>, device: C) -> Self {
        DeliveryCancel {
            mailbox: mailbox,
            device: device,
        }
    }
}

impl<C: Cancel> Cancel for DeliveryCancel<C> {
    fn cancel(&self) {
        self.mailbox.shutdown();

        if self.mailbox.retired() {
            self.device.cancel();
        }
    }
}

/// Totals reported by the retune worker when it exits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RetuneStats {
    /// Successful retunes.
    pub applied: u64,
    /// Retunes the driver rejected.
    pub failed: u64,
}

/// Applies posted frequencies to the tuner.
pub struct RetuneTask<T: Tune + Cancel> {
    tuner: T,
    mailbox: Arc<RetuneMailbox>,
    stats: RetuneStats,
}

impl<T: Tune + Cancel> RetuneTask<T> {
    /// Create a new `RetuneTask` tuning `tuner` from posts to `mailbox`.
    pub fn new(tuner: T, mailbox: Arc<RetuneMailbox>) -> Self {
        RetuneTask {
            tuner: tuner,
            mailbox: mailbox,
            stats: RetuneStats::default(),
        }
    }

    /// Handle posted frequencies until shutdown, blocking the current thread.
    ///
    /// Each retune is attempted once; a failure is logged and the next block boundary
    /// brings the next attempt. On shutdown the sample stream is cancelled.
    pub fn run(&mut self) -> RetuneStats {
        while let Some(freq) = self.mailbox.take() {
            match self.tuner.set_center_freq(freq) {
                Ok(()) => self.stats.applied += 1,
                Err(e) => {
                    error!("unable to tune to {} Hz: {}", freq, e);
                    self.stats.failed += 1;
                },
            }
        }

        debug!("retune worker exiting");
        self.mailbox.retire();
        self.tuner.cancel();

        self.stats
    }
}
