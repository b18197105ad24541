//! Termination signal handling.
//!
//! Signals are blocked in every thread and collected synchronously by a dedicated
//! watcher thread, so stopping the stream never runs in an async signal context.

use std::io;
use std::mem;
use std::ptr;
use std::thread;

use libc;
use prctl;

use error::Error;
use sdr::Cancel;
use shutdown::Shutdown;

/// Signals that stop a run.
const SIGNALS: [libc::c_int; 4] = [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT, libc::SIGPIPE];

/// Set of blocked termination signals.
#[derive(Copy, Clone)]
pub struct Signals(libc::sigset_t);

impl Signals {
    /// Block termination signals in the calling thread and every thread it later
    /// spawns.
    ///
    /// This must be called before any other threads are started.
    pub fn block() -> Result<Self, Error> {
        let mut set: libc::sigset_t = unsafe { mem::zeroed() };

        unsafe {
            libc::sigemptyset(&mut set);

            for &sig in SIGNALS.iter() {
                libc::sigaddset(&mut set, sig);
            }
        }

        let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) };

        if ret != 0 {
            return Err(Error::Signals(io::Error::from_raw_os_error(ret)));
        }

        Ok(Signals(set))
    }

    /// Wait for the next blocked signal.
    fn wait(&self) -> io::Result<libc::c_int> {
        let mut sig = 0;

        match unsafe { libc::sigwait(&self.0, &mut sig) } {
            0 => Ok(sig),
            e => Err(io::Error::from_raw_os_error(e)),
        }
    }

    /// Start a detached thread that requests a stop and cancels the stream through
    /// `cancel` on every termination signal.
    pub fn watch<C>(self, stop: Shutdown, cancel: C) -> Result<(), Error>
        where C: Cancel + Send + 'static
    {
        thread::Builder::new().spawn(move || {
            if let Err(e) = prctl::set_name("signals") {
                debug!("unable to name thread: {}", e);
            }

            loop {
                match self.wait() {
                    Ok(sig) => debug!("received signal {}", sig),
                    Err(e) => {
                        error!("unable to wait for signals: {}", e);
                        return;
                    },
                }

                if stop.request() {
                    info!("Signal caught, exiting!");
                }

                cancel.cancel();
            }
        }).map(|_| ()).map_err(Error::Signals)
    }
}
