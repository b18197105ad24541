//! Raw sample output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use error::Error;

/// Where samples are written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Output {
    /// Parse an output argument, where `-` means stdout.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Output::Stdout
        } else {
            Output::File(PathBuf::from(arg))
        }
    }

    /// Open the destination for writing.
    pub fn open(&self) -> Result<Sink<Box<dyn Write + Send>>, Error> {
        let stream: Box<dyn Write + Send> = match *self {
            Output::Stdout => Box::new(BufWriter::new(io::stdout())),
            Output::File(ref path) => Box::new(BufWriter::new(
                File::create(path).map_err(|e| Error::Output {
                    path: path.display().to_string(),
                    source: e,
                })?
            )),
        };

        Ok(Sink::new(stream))
    }
}

/// Append-only byte sink that treats any short write as fatal.
pub struct Sink<W: Write> {
    stream: W,
    written: u64,
}

impl<W: Write> Sink<W> {
    pub fn new(stream: W) -> Self {
        Sink {
            stream: stream,
            written: 0,
        }
    }

    /// Write the whole chunk.
    pub fn write_chunk(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.stream.write_all(buf).map_err(Error::ShortWrite)?;
        self.written += buf.len() as u64;

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.stream.flush().map_err(Error::ShortWrite)
    }

    /// Total bytes written.
    pub fn written(&self) -> u64 { self.written }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W { &self.stream }
}
