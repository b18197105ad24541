//! Command line parsing and validation.

use clap::{App, Arg, ArgMatches};

use consts::DEFAULT_SAMPLE_RATE;
use error::Error;
use plan::FrequencyPlan;
use sink::Output;

/// Build the command line interface.
pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("rtlalt")
        .about("Record raw I/Q samples from an RTL-SDR, optionally alternating between two \
                frequencies")
        .arg(Arg::with_name("freq")
             .short("f")
             .help("center frequency (Hz, k/M/G suffix accepted); give twice to alternate")
             .value_name("FREQ")
             .takes_value(true)
             .multiple(true)
             .number_of_values(1)
             .allow_hyphen_values(true))
        .arg(Arg::with_name("rate")
             .short("s")
             .help("sample rate (Hz)")
             .value_name("RATE"))
        .arg(Arg::with_name("device")
             .short("d")
             .help("rtlsdr device index or name (use -d list to show all)")
             .value_name("DEVICE"))
        .arg(Arg::with_name("gain")
             .short("g")
             .help("tuner gain in dB or auto (use -g list to see all options)")
             .value_name("GAIN")
             .allow_hyphen_values(true))
        .arg(Arg::with_name("ppm")
             .short("p")
             .help("ppm frequency adjustment")
             .value_name("PPM")
             .allow_hyphen_values(true))
        .arg(Arg::with_name("chunk")
             .short("b")
             .help("transfer size (bytes)")
             .value_name("BYTES"))
        .arg(Arg::with_name("samples")
             .short("n")
             .help("samples to read; with two frequencies, samples per block (give twice \
                    for per-frequency blocks)")
             .value_name("SAMPLES")
             .takes_value(true)
             .multiple(true)
             .number_of_values(1))
        .arg(Arg::with_name("sync")
             .short("S")
             .help("read synchronously"))
        .arg(Arg::with_name("direct")
             .short("D")
             .help("enable direct sampling"))
        .arg(Arg::with_name("output")
             .help("output file (- for stdout)")
             .value_name("FILE")
             .index(1))
}

/// Raw argument strings, before validation.
#[derive(Clone, Debug, Default)]
pub struct Args<'a> {
    pub freqs: Vec<&'a str>,
    pub rate: Option<&'a str>,
    pub device: Option<&'a str>,
    pub gain: Option<&'a str>,
    pub ppm: Option<&'a str>,
    pub chunk: Option<&'a str>,
    pub samples: Vec<&'a str>,
    pub sync: bool,
    pub direct: bool,
    pub output: Option<&'a str>,
}

impl<'a> Args<'a> {
    pub fn from_matches(m: &'a ArgMatches) -> Self {
        Args {
            freqs: m.values_of("freq").map(|v| v.collect()).unwrap_or_default(),
            rate: m.value_of("rate"),
            device: m.value_of("device"),
            gain: m.value_of("gain"),
            ppm: m.value_of("ppm"),
            chunk: m.value_of("chunk"),
            samples: m.values_of("samples").map(|v| v.collect()).unwrap_or_default(),
            sync: m.is_present("sync"),
            direct: m.is_present("direct"),
            output: m.value_of("output"),
        }
    }
}

/// Tuner gain setting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Gain {
    /// Automatic gain control.
    Auto,
    /// Manual gain (tenths of dB).
    Tenths(i32),
}

/// What the invocation asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Print attached devices.
    ListDevices,
    /// Print the gains supported by the selected device.
    ListGains(String),
    /// Record samples.
    Record(Config),
}

/// Validated recording configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub plan: FrequencyPlan,
    /// Transfer chunk size (bytes).
    pub chunk: u32,
    /// Sample rate (S/s).
    pub rate: u32,
    /// Device index or name substring.
    pub device: String,
    pub gain: Gain,
    /// Frequency correction (ppm).
    pub ppm: i32,
    /// Whether to read with the pull loop.
    pub sync: bool,
    pub direct: bool,
    pub output: Output,
}

impl Action {
    /// Validate the given arguments. No device is touched.
    pub fn from_args(args: &Args) -> Result<Self, Error> {
        let device = args.device.unwrap_or("0");

        if device == "list" {
            return Ok(Action::ListDevices);
        }

        let gain = match args.gain {
            Some("list") => return Ok(Action::ListGains(device.to_string())),
            Some("auto") | None => Gain::Auto,
            Some(s) => match parse_si(s) {
                Some(db) if db == 0.0 => Gain::Auto,
                Some(db) => Gain::Tenths((db * 10.0).round() as i32),
                None => return Err(Error::config(format!("invalid gain `{}`", s))),
            },
        };

        let freqs = args.freqs.iter()
            .map(|s| parse_hz(s, "frequency"))
            .collect::<Result<Vec<_>, _>>()?;

        let samples = args.samples.iter()
            .map(|s| parse_count(s))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = FrequencyPlan::new(&freqs[..], &samples[..])?;

        if args.sync && plan.alternates() {
            return Err(Error::config("sync mode (-S) only supports one frequency"));
        }

        let requested = match args.chunk {
            Some(s) => Some(s.parse().map_err(|_| {
                Error::config(format!("invalid transfer size `{}`", s))
            })?),
            None => None,
        };

        let chunk = plan.chunk_size(requested)?;

        let rate = match args.rate {
            Some(s) => parse_hz(s, "sample rate")?,
            None => DEFAULT_SAMPLE_RATE,
        };

        if rate == 0 {
            return Err(Error::config("sample rate must be positive"));
        }

        let ppm = match args.ppm {
            Some(s) => s.parse().map_err(|_| Error::config(format!("invalid ppm `{}`", s)))?,
            None => 0,
        };

        let output = match args.output {
            Some(s) => Output::from_arg(s),
            None => return Err(Error::config("an output file is required")),
        };

        Ok(Action::Record(Config {
            plan: plan,
            chunk: chunk,
            rate: rate,
            device: device.to_string(),
            gain: gain,
            ppm: ppm,
            sync: args.sync,
            direct: args.direct,
            output: output,
        }))
    }
}

/// Parse a decimal number with an optional `k`, `M`, or `G` multiplier suffix.
pub fn parse_si(s: &str) -> Option<f64> {
    let s = s.trim();

    let (num, mult) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1e3),
        'm' | 'M' => (&s[..s.len() - 1], 1e6),
        'g' | 'G' => (&s[..s.len() - 1], 1e9),
        _ => (s, 1.0),
    };

    num.parse::<f64>().ok()
        .map(|n| n * mult)
        .and_then(|n| if n.is_finite() { Some(n) } else { None })
}

/// Parse a frequency or rate (Hz).
fn parse_hz(s: &str, what: &str) -> Result<u32, Error> {
    match parse_si(s) {
        Some(hz) if hz >= 0.0 && hz <= u32::max_value() as f64 => Ok(hz.round() as u32),
        _ => Err(Error::config(format!("invalid {} `{}`", what, s))),
    }
}

/// Parse a sample count.
fn parse_count(s: &str) -> Result<u64, Error> {
    match parse_si(s) {
        Some(n) if n >= 0.0 && n <= u64::max_value() as f64 => Ok(n as u64),
        _ => Err(Error::config(format!("invalid sample count `{}`", s))),
    }
}
