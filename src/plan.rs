//! Frequency plan and transfer sizing.

use consts::{BYTES_PER_SAMPLE, DEFAULT_BUF_LENGTH, MAXIMAL_BUF_LENGTH, MAX_ALT_CHUNK,
             MINIMAL_BUF_LENGTH};
use error::Error;

/// One frequency held for a fixed-size block of bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Channel {
    /// Center frequency (Hz).
    pub freq: u32,
    /// Block size (bytes, always even).
    pub block: u32,
}

/// Frequencies to record and how long to stay on each.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FrequencyPlan {
    /// Stay on one frequency, optionally stopping after the given number of bytes.
    Single {
        freq: u32,
        cap: Option<u64>,
    },
    /// Alternate between two channels, starting with the first.
    Alternate([Channel; 2]),
}

impl FrequencyPlan {
    /// Build a plan from the given frequencies (Hz) and sample counts.
    ///
    /// With one frequency, a sample count caps the total length of the run. With two
    /// frequencies, one sample count gives both channels the same block size and two
    /// counts give each channel its own.
    pub fn new(freqs: &[u32], samples: &[u64]) -> Result<Self, Error> {
        if samples.len() > 2 {
            return Err(Error::config("at most two sample counts (-n) are supported"));
        }

        match *freqs {
            [] => Err(Error::config("a frequency (-f) is required")),
            [freq] => {
                if samples.len() > 1 {
                    return Err(Error::config(
                        "two sample counts (-n) require two frequencies (-f)"));
                }

                Ok(FrequencyPlan::Single {
                    freq: freq,
                    cap: match samples.first() {
                        Some(&0) | None => None,
                        Some(&n) => Some(n.saturating_mul(BYTES_PER_SAMPLE as u64)),
                    },
                })
            },
            [f0, f1] => {
                let (n0, n1) = match *samples {
                    [] => return Err(Error::config(
                        "samples per block (-n) is required in 2-frequency mode")),
                    [n] => (n, n),
                    [n0, n1] => (n0, n1),
                    _ => unreachable!(),
                };

                Ok(FrequencyPlan::Alternate([
                    Channel { freq: f0, block: block_bytes(n0)? },
                    Channel { freq: f1, block: block_bytes(n1)? },
                ]))
            },
            _ => Err(Error::config("at most two frequencies (-f) are supported")),
        }
    }

    /// Frequency to tune before streaming starts.
    pub fn initial_freq(&self) -> u32 {
        match *self {
            FrequencyPlan::Single { freq, .. } => freq,
            FrequencyPlan::Alternate(ref ch) => ch[0].freq,
        }
    }

    /// Total byte cap for the run, if any.
    pub fn cap(&self) -> Option<u64> {
        match *self {
            FrequencyPlan::Single { cap, .. } => cap,
            FrequencyPlan::Alternate(..) => None,
        }
    }

    /// Alternation channels, if the plan alternates.
    pub fn channels(&self) -> Option<&[Channel; 2]> {
        match *self {
            FrequencyPlan::Single { .. } => None,
            FrequencyPlan::Alternate(ref ch) => Some(ch),
        }
    }

    /// Whether the plan alternates between two frequencies.
    pub fn alternates(&self) -> bool {
        self.channels().is_some()
    }

    /// Compute the transfer chunk size, considering an optional user override.
    ///
    /// In alternating mode the result always divides both block sizes, so no chunk
    /// straddles a block boundary.
    pub fn chunk_size(&self, requested: Option<u32>) -> Result<u32, Error> {
        let ch = match *self {
            FrequencyPlan::Single { .. } => return Ok(transfer_size(requested)),
            FrequencyPlan::Alternate(ref ch) => ch,
        };

        let chunk = resolve_chunk(ch[0].block, ch[1].block);

        if chunk < MINIMAL_BUF_LENGTH {
            return Err(Error::config(format!(
                "block sizes of {} and {} samples share no transfer size of at least {} \
                 samples; use multiples of {} samples",
                ch[0].block / BYTES_PER_SAMPLE, ch[1].block / BYTES_PER_SAMPLE,
                MINIMAL_BUF_LENGTH / BYTES_PER_SAMPLE, MINIMAL_BUF_LENGTH / BYTES_PER_SAMPLE)));
        }

        match requested {
            Some(len) if valid_transfer(len) &&
                         ch[0].block % len == 0 && ch[1].block % len == 0 => Ok(len),
            Some(len) => {
                warn!("transfer size {} doesn't divide both blocks, using {}", len, chunk);
                Ok(chunk)
            },
            None => Ok(chunk),
        }
    }
}

/// Convert a per-block sample count to a block size in bytes.
fn block_bytes(samples: u64) -> Result<u32, Error> {
    if samples == 0 {
        return Err(Error::config("samples per block (-n) must be positive"));
    }

    samples.checked_mul(BYTES_PER_SAMPLE as u64)
        .and_then(|b| if b <= u32::max_value() as u64 { Some(b as u32) } else { None })
        .ok_or_else(|| Error::config(format!("{} samples per block is too large", samples)))
}

/// Largest transfer size that divides both block sizes, capped at `MAX_ALT_CHUNK`.
pub fn resolve_chunk(a: u32, b: u32) -> u32 {
    gcd(gcd(a, b), MAX_ALT_CHUNK)
}

/// Transfer size for single-frequency mode.
///
/// Out of range values fall back to `DEFAULT_BUF_LENGTH`.
pub fn transfer_size(requested: Option<u32>) -> u32 {
    match requested {
        Some(len) if valid_transfer(len) => len,
        Some(len) => {
            warn!("transfer size {} is invalid, falling back to default {}",
                  len, DEFAULT_BUF_LENGTH);
            warn!("minimal length: {}, maximal length: {}, must be a multiple of {}",
                  MINIMAL_BUF_LENGTH, MAXIMAL_BUF_LENGTH, MINIMAL_BUF_LENGTH);
            DEFAULT_BUF_LENGTH
        },
        None => DEFAULT_BUF_LENGTH,
    }
}

fn valid_transfer(len: u32) -> bool {
    len >= MINIMAL_BUF_LENGTH && len <= MAXIMAL_BUF_LENGTH && len % MINIMAL_BUF_LENGTH == 0
}

/// Greatest common divisor.
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }

    a
}
