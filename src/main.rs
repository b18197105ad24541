extern crate clap;
extern crate crossbeam;
extern crate env_logger;
extern crate libc;
extern crate prctl;
extern crate rtlsdr_mt;
extern crate thiserror;

#[macro_use]
extern crate log;

use std::io::Write;
use std::process;
use std::sync::Arc;

use clap::ArgMatches;
use crossbeam::channel::bounded;

mod block;
mod config;
mod consts;
mod error;
mod plan;
mod retune;
mod sdr;
mod shutdown;
mod signal;
mod sink;
mod stream;

use block::BlockAccountant;
use config::{Action, Args, Config, Gain};
use consts::{BYTES_PER_SAMPLE, PULL_QUEUE_DEPTH, TRANSFER_COUNT};
use error::Error;
use plan::Channel;
use retune::{DeliveryCancel, RetuneMailbox, RetuneTask};
use sdr::{ChunkQueue, RtlReader, SharedControl, Tune};
use shutdown::Shutdown;
use signal::Signals;
use sink::Sink;
use stream::{Outcome, Recorder};

type OutputSink = Sink<Box<dyn Write + Send>>;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let args = config::app().get_matches();

    let code = match run(&args) {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        },
    };

    process::exit(code);
}

fn run(args: &ArgMatches) -> Result<(), Error> {
    // Before any thread is started, so every thread inherits the mask.
    let signals = Signals::block()?;

    let conf = match Action::from_args(&Args::from_matches(args))? {
        Action::ListDevices => {
            for (idx, name) in sdr::devices().iter().enumerate() {
                println!("{}: {}", idx, name);
            }

            return Ok(());
        },
        Action::ListGains(dev) => {
            let (control, _) = sdr::open(sdr::find_device(&dev)?)?;

            for g in control.gains() {
                println!("{:.1}", g as f32 / 10.0);
            }

            println!("auto");

            return Ok(());
        },
        Action::Record(conf) => conf,
    };

    let (control, mut reader) = setup(&conf)?;
    let mut sink = conf.output.open()?;
    let stop = Shutdown::new();

    let outcome = match conf.plan.channels() {
        Some(ch) => record_alternating(control, &mut reader, &mut sink, ch, conf.chunk,
                                       &stop, signals)?,
        None if conf.sync => record_pull(control, &mut reader, &mut sink, &conf, &stop,
                                         signals)?,
        None => record_push(control, &mut reader, &mut sink, &conf, &stop, signals)?,
    };

    sink.flush()?;

    match outcome {
        Outcome::Cancelled => info!("User cancel, exiting..."),
        Outcome::Completed => info!("Recorded {} samples",
                                    sink.written() / BYTES_PER_SAMPLE as u64),
    }

    Ok(())
}

/// Open and configure the selected device, tuned to the plan's initial frequency.
fn setup(conf: &Config) -> Result<(SharedControl, RtlReader), Error> {
    let (mut control, reader) = sdr::open(sdr::find_device(&conf.device)?)?;

    if conf.direct {
        control.enable_direct_sampling()?;
    }

    control.set_sample_rate(conf.rate)?;

    let freq = conf.plan.initial_freq();
    control.set_center_freq(freq)?;
    info!("tuned to {} Hz", freq);

    match conf.gain {
        Gain::Auto => control.enable_agc()?,
        Gain::Tenths(g) => control.set_gain(g)?,
    }

    control.set_ppm(conf.ppm)?;
    control.reset_buffer()?;

    Ok((control, reader))
}

fn name_thread(name: &str) {
    if let Err(e) = prctl::set_name(name) {
        debug!("unable to name thread {}: {}", name, e);
    }
}

/// Record while alternating between both channels at block boundaries.
fn record_alternating(control: SharedControl, reader: &mut RtlReader, sink: &mut OutputSink,
                      ch: &[Channel; 2], chunk: u32, stop: &Shutdown, signals: Signals)
    -> Result<Outcome, Error>
{
    for (idx, c) in ch.iter().enumerate() {
        info!("frequency {}: {:.3} MHz, {} samples ({} bytes) per block", idx,
              c.freq as f64 / 1e6, c.block / BYTES_PER_SAMPLE, c.block);
    }

    info!("transfer size {} bytes", chunk);

    let mailbox = Arc::new(RetuneMailbox::new(stop.clone()));

    // Signals don't arrive in the delivery context, so they also cancel the device
    // directly in case the worker has already exited.
    signals.watch(stop.clone(), (mailbox.clone(), control.downgrade()))?;

    let cancel = DeliveryCancel::new(mailbox.clone(), control.clone());
    let mut task = RetuneTask::new(control, mailbox.clone());

    crossbeam::scope(|scope| {
        let worker = scope.spawn(move |_| {
            name_thread("retune");
            task.run()
        });

        let res = {
            let mut rec = Recorder::new(sink, None, stop, &cancel)
                .alternate(BlockAccountant::new(*ch), &mailbox);

            let res = stream::run_push(reader, chunk, &mut rec);

            if let Some(blocks) = rec.blocks() {
                info!("recorded {} complete blocks", blocks.blocks());
            }

            res
        };

        // The worker only exits on shutdown, which hasn't happened if the stream ended
        // on its own.
        mailbox.shutdown();

        let stats = worker.join().map_err(|_| Error::Panicked("retune"))?;
        info!("{} retunes applied, {} failed, {} skipped", stats.applied, stats.failed,
              mailbox.overwritten());

        res
    }).map_err(|_| Error::Panicked("delivery"))?
}

/// Record on one frequency with the push loop.
fn record_push(control: SharedControl, reader: &mut RtlReader, sink: &mut OutputSink,
               conf: &Config, stop: &Shutdown, signals: Signals)
    -> Result<Outcome, Error>
{
    signals.watch(stop.clone(), control.downgrade())?;

    let mut rec = Recorder::new(sink, conf.plan.cap(), stop, &control);

    stream::run_push(reader, conf.chunk, &mut rec)
}

/// Record on one frequency with the pull loop, fed by a reader thread.
fn record_pull(control: SharedControl, reader: &mut RtlReader, sink: &mut OutputSink,
               conf: &Config, stop: &Shutdown, signals: Signals)
    -> Result<Outcome, Error>
{
    signals.watch(stop.clone(), control.downgrade())?;

    let (tx, rx) = bounded(PULL_QUEUE_DEPTH);
    let chunk = conf.chunk;
    let feeder = control.clone();

    crossbeam::scope(|scope| {
        let reading = scope.spawn(move |_| {
            name_thread("reader");
            sdr::feed(reader, TRANSFER_COUNT, chunk, tx, &feeder)
        });

        let res = {
            let mut queue = ChunkQueue::new(rx);
            let mut rec = Recorder::new(sink, conf.plan.cap(), stop, &control);

            stream::run_pull(&mut queue, chunk, &mut rec)
        };

        let fed = reading.join().map_err(|_| Error::Panicked("reader"))?;

        match (res, fed) {
            // The queue only fails when the reader stopped, so report why it did.
            (Err(Error::Device(_)), Err(e)) => Err(e.into()),
            (res, _) => res,
        }
    }).map_err(|_| Error::Panicked("pull"))?
}
