//! Error types for configuration, device, and output failures.

use std::io;

use thiserror::Error;

/// Failure reported by the SDR driver layer.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A driver call failed.
    #[error("{0} failed")]
    Failed(&'static str),
    /// No device matched the given selector.
    #[error("no device matching `{0}`")]
    NoDevice(String),
    /// The driver doesn't expose the requested operation.
    #[error("{0} is not supported by the driver")]
    Unsupported(&'static str),
    /// The sample stream stopped without being cancelled.
    #[error("sample stream ended unexpectedly")]
    StreamEnded,
}

/// Any error that ends a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid command line, detected before the device is opened.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The device couldn't be opened, configured, or streamed from.
    #[error("device error: {0}")]
    Device(#[from] DriverError),
    /// The output file couldn't be opened.
    #[error("unable to open {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The output sink accepted fewer bytes than requested.
    #[error("short write, samples lost: {0}")]
    ShortWrite(#[source] io::Error),
    /// Signal handling couldn't be set up.
    #[error("unable to set up signal handling: {0}")]
    Signals(#[source] io::Error),
    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    Panicked(&'static str),
    /// The device returned fewer bytes than requested.
    #[error("short read, samples lost ({got} of {want} bytes)")]
    ShortRead {
        want: usize,
        got: usize,
    },
}

impl Error {
    /// Create a configuration error with the given message.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Process exit status for this error.
    ///
    /// The driver reports failures without a status code, so every error exits with 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
