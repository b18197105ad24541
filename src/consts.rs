/// Bytes per interleaved I/Q sample.
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Default sample rate for the SDR.
pub const DEFAULT_SAMPLE_RATE: u32 = 2048000;

/// Default transfer size in single-frequency mode (bytes).
pub const DEFAULT_BUF_LENGTH: u32 = 16 * 16384;
/// Smallest transfer size accepted by librtlsdr (bytes).
///
/// Transfer sizes must also be a multiple of this, otherwise the driver silently
/// substitutes its own default.
pub const MINIMAL_BUF_LENGTH: u32 = 512;
/// Largest accepted transfer size (bytes).
pub const MAXIMAL_BUF_LENGTH: u32 = 256 * 16384;

/// Upper bound on the transfer size in alternating mode (bytes).
///
/// Keeps the number of bytes in flight inside the USB pipeline low, so fewer
/// post-retune settling samples need to be thrown away downstream.
pub const MAX_ALT_CHUNK: u32 = 16384;

/// Number of USB transfer buffers handed to the driver.
pub const TRANSFER_COUNT: u32 = 15;

/// Number of chunks buffered between the reader thread and the pull loop.
pub const PULL_QUEUE_DEPTH: usize = 16;
