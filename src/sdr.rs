//! SDR driver interface and its librtlsdr backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crossbeam::channel::{Receiver, Sender};
use rtlsdr_mt::{Controller, Reader, TunerGains};

use error::DriverError;

/// Retunes the receiver.
pub trait Tune: Send {
    /// Set the center frequency (Hz), blocking until the tuner acknowledges.
    fn set_center_freq(&mut self, hz: u32) -> Result<(), DriverError>;
}

/// Stops a running sample stream.
pub trait Cancel {
    /// Ask the stream to stop. Safe to call from any thread and more than once.
    fn cancel(&self);
}

impl<'a, C: Cancel + ?Sized> Cancel for &'a C {
    fn cancel(&self) { (**self).cancel() }
}

impl<C: Cancel> Cancel for Arc<C> {
    fn cancel(&self) { (**self).cancel() }
}

impl<A: Cancel, B: Cancel> Cancel for (A, B) {
    fn cancel(&self) {
        self.0.cancel();
        self.1.cancel();
    }
}

/// Cancels through a handle that doesn't keep its target alive.
///
/// Once every strong handle is gone, cancelling does nothing.
pub struct WeakCancel<C: Cancel>(Weak<C>);

impl<C: Cancel> WeakCancel<C> {
    pub fn new(target: &Arc<C>) -> Self {
        WeakCancel(Arc::downgrade(target))
    }
}

impl<C: Cancel> Cancel for WeakCancel<C> {
    fn cancel(&self) {
        if let Some(target) = self.0.upgrade() {
            target.cancel();
        }
    }
}

/// Delivers samples to a handler as the device produces them.
pub trait PushSource {
    /// Run the delivery loop, calling `handler` with each chunk of at most `len` bytes
    /// until the stream is cancelled or fails.
    fn read_async<F: FnMut(&[u8])>(&mut self, transfers: u32, len: u32, handler: F)
        -> Result<(), DriverError>;
}

/// Delivers samples on request.
pub trait PullSource {
    /// Read the next chunk into `buf`, returning the number of bytes read.
    fn read_sync(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;
}

/// Names of attached devices, indexed by device number.
pub fn devices() -> Vec<String> {
    rtlsdr_mt::devices().map(|name| name.to_string_lossy().into_owned()).collect()
}

/// Resolve a device selector (index or name substring) to a device index.
pub fn find_device(sel: &str) -> Result<u32, DriverError> {
    select_device(sel, &devices())
}

fn select_device(sel: &str, names: &[String]) -> Result<u32, DriverError> {
    if let Ok(idx) = sel.parse::<u32>() {
        return if (idx as usize) < names.len() {
            Ok(idx)
        } else {
            Err(DriverError::NoDevice(sel.to_string()))
        };
    }

    let sel_lower = sel.to_lowercase();

    names.iter()
        .position(|name| name.to_lowercase().contains(&sel_lower))
        .map(|idx| idx as u32)
        .ok_or_else(|| DriverError::NoDevice(sel.to_string()))
}

/// Open the device at the given index, returning its control and streaming halves.
pub fn open(idx: u32) -> Result<(SharedControl, RtlReader), DriverError> {
    let (control, reader) = rtlsdr_mt::open(idx)
        .map_err(|_| DriverError::Failed("open"))?;

    info!("opened device {}", idx);

    Ok((SharedControl(Arc::new(Mutex::new(control))), RtlReader(reader)))
}

/// Device control handle shared by the retune worker and cancellers.
#[derive(Clone)]
pub struct SharedControl(Arc<Mutex<Controller>>);

impl SharedControl {
    fn lock(&self) -> MutexGuard<Controller> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel handle that doesn't hold the device open.
    pub fn downgrade(&self) -> WeakCancel<Mutex<Controller>> {
        WeakCancel::new(&self.0)
    }

    /// Gains supported by the tuner (tenths of dB).
    pub fn gains(&self) -> Vec<i32> {
        let mut gains = TunerGains::default();
        self.lock().tuner_gains(&mut gains).to_vec()
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<(), DriverError> {
        self.lock().set_sample_rate(rate).map_err(|_| DriverError::Failed("set_sample_rate"))?;
        info!("sampling at {} S/s", rate);
        Ok(())
    }

    pub fn enable_agc(&self) -> Result<(), DriverError> {
        self.lock().enable_agc().map_err(|_| DriverError::Failed("enable_agc"))?;
        info!("tuner gain set to automatic");
        Ok(())
    }

    /// Set a manual gain (tenths of dB), snapped to the nearest supported gain.
    pub fn set_gain(&self, tenths: i32) -> Result<(), DriverError> {
        let gain = nearest_gain(tenths, &self.gains()).unwrap_or(tenths);

        self.lock().set_tuner_gain(gain).map_err(|_| DriverError::Failed("set_tuner_gain"))?;
        info!("tuner gain set to {:.1} dB", gain as f32 / 10.0);
        Ok(())
    }

    /// Set the frequency correction (ppm). Zero leaves the device default in place.
    pub fn set_ppm(&self, ppm: i32) -> Result<(), DriverError> {
        if ppm == 0 {
            return Ok(());
        }

        self.lock().set_ppm(ppm).map_err(|_| DriverError::Failed("set_ppm"))?;
        info!("tuner error set to {} ppm", ppm);
        Ok(())
    }

    /// Drop any samples buffered in the device.
    pub fn reset_buffer(&self) -> Result<(), DriverError> {
        self.lock().reset_buffer().map_err(|_| DriverError::Failed("reset_buffer"))
    }

    /// Enable direct sampling.
    pub fn enable_direct_sampling(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("direct sampling"))
    }
}

impl Tune for SharedControl {
    fn set_center_freq(&mut self, hz: u32) -> Result<(), DriverError> {
        self.lock().set_center_freq(hz).map_err(|_| DriverError::Failed("set_center_freq"))
    }
}

impl Cancel for Mutex<Controller> {
    fn cancel(&self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).cancel_async_read();
    }
}

impl Cancel for SharedControl {
    fn cancel(&self) {
        self.0.cancel();
    }
}

/// Streaming half of an opened device.
pub struct RtlReader(Reader);

impl PushSource for RtlReader {
    fn read_async<F: FnMut(&[u8])>(&mut self, transfers: u32, len: u32, handler: F)
        -> Result<(), DriverError>
    {
        self.0.read_async(transfers, len, handler).map_err(|_| DriverError::Failed("read_async"))
    }
}

/// Stream chunks from `src` into `chan` until cancelled, stopping the stream through
/// `cancel` once the receiving side hangs up.
pub fn feed<P, C>(src: &mut P, transfers: u32, len: u32, chan: Sender<Vec<u8>>, cancel: &C)
    -> Result<(), DriverError>
    where P: PushSource, C: Cancel
{
    let mut hung_up = false;

    src.read_async(transfers, len, |bytes| {
        if hung_up {
            return;
        }

        if chan.send(bytes.to_vec()).is_err() {
            hung_up = true;
            cancel.cancel();
        }
    })
}

/// Pull-side view of chunks produced by `feed`.
pub struct ChunkQueue {
    chan: Receiver<Vec<u8>>,
}

impl ChunkQueue {
    pub fn new(chan: Receiver<Vec<u8>>) -> Self {
        ChunkQueue {
            chan: chan,
        }
    }
}

impl PullSource for ChunkQueue {
    fn read_sync(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let chunk = self.chan.recv().map_err(|_| DriverError::Failed("read_sync"))?;
        let len = chunk.len().min(buf.len());

        if len < chunk.len() {
            warn!("dropping {} bytes of oversized chunk", chunk.len() - len);
        }

        buf[..len].copy_from_slice(&chunk[..len]);

        Ok(len)
    }
}

/// Find the supported gain closest to the requested one.
pub fn nearest_gain(target: i32, gains: &[i32]) -> Option<i32> {
    gains.iter().cloned().min_by_key(|&g| (g - target).abs())
}
