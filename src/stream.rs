//! Sample delivery loops.

use std::io::Write;

use block::BlockAccountant;
use consts::TRANSFER_COUNT;
use error::{DriverError, Error};
use retune::RetuneMailbox;
use sdr::{Cancel, PullSource, PushSource};
use shutdown::Shutdown;
use sink::Sink;

/// How a run ended, when it didn't end in error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The requested number of samples was recorded.
    Completed,
    /// The user asked to stop.
    Cancelled,
}

/// Block accounting and the mailbox its retunes are posted to.
struct Alternation<'a> {
    blocks: BlockAccountant,
    mailbox: &'a RetuneMailbox,
}

/// Handles each delivered chunk: enforces the sample cap, writes to the sink, and
/// drives block accounting in alternating mode.
pub struct Recorder<'a, W: Write + 'a, C: Cancel + 'a> {
    sink: &'a mut Sink<W>,
    /// Bytes left before the run completes, if capped.
    remaining: Option<u64>,
    alt: Option<Alternation<'a>>,
    stop: &'a Shutdown,
    /// Stops the sample stream.
    cancel: &'a C,
    /// Whether the cap was reached.
    completed: bool,
    /// First fatal error encountered.
    error: Option<Error>,
}

impl<'a, W: Write + 'a, C: Cancel + 'a> Recorder<'a, W, C> {
    /// Create a new `Recorder` writing into `sink`, stopping after `cap` bytes if given.
    pub fn new(sink: &'a mut Sink<W>, cap: Option<u64>, stop: &'a Shutdown, cancel: &'a C)
        -> Self
    {
        Recorder {
            sink: sink,
            remaining: cap,
            alt: None,
            stop: stop,
            cancel: cancel,
            completed: false,
            error: None,
        }
    }

    /// Account each chunk to a block and post retunes at block boundaries.
    pub fn alternate(mut self, blocks: BlockAccountant, mailbox: &'a RetuneMailbox) -> Self {
        self.alt = Some(Alternation {
            blocks: blocks,
            mailbox: mailbox,
        });

        self
    }

    /// Handle one delivered chunk.
    pub fn handle_chunk(&mut self, chunk: &[u8]) {
        if self.stop.requested() {
            // An earlier cancel may have come before the stream was running.
            self.cancel.cancel();
            return;
        }

        let chunk = match self.remaining {
            Some(rem) if rem < chunk.len() as u64 => {
                self.complete();
                &chunk[..rem as usize]
            },
            _ => chunk,
        };

        if let Err(e) = self.sink.write_chunk(chunk) {
            self.fail(e);
            return;
        }

        let exhausted = match self.remaining {
            Some(ref mut rem) => {
                *rem -= chunk.len() as u64;
                *rem == 0
            },
            None => false,
        };

        if exhausted {
            self.complete();
        }

        if let Some(ref mut alt) = self.alt {
            // The whole chunk belongs to the block that was active when it arrived, so
            // the retune is only posted after it has been accounted.
            if let Some(freq) = alt.blocks.record_chunk(chunk.len()) {
                alt.mailbox.post(freq);
            }
        }
    }

    /// Bytes left before the run completes, if capped.
    #[cfg(test)]
    pub fn remaining(&self) -> Option<u64> { self.remaining }

    /// Block accounting state, in alternating mode.
    pub fn blocks(&self) -> Option<&BlockAccountant> {
        self.alt.as_ref().map(|alt| &alt.blocks)
    }

    /// Whether the run should stop.
    fn stopped(&self) -> bool {
        self.stop.requested()
    }

    fn complete(&mut self) {
        if !self.completed {
            self.completed = true;
            self.halt();
        }
    }

    fn fail(&mut self, e: Error) {
        if self.error.is_none() {
            self.error = Some(e);
        }

        self.halt();
    }

    fn halt(&self) {
        self.stop.request();
        self.cancel.cancel();
    }

    /// Decide how the run ended, given the result of the delivery loop.
    fn outcome(&mut self, res: Result<(), DriverError>) -> Result<Outcome, Error> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        if self.completed {
            return Ok(Outcome::Completed);
        }

        if self.stopped() {
            return Ok(Outcome::Cancelled);
        }

        res?;

        Err(DriverError::StreamEnded.into())
    }
}

/// Stream chunks of `chunk` bytes from `src` into `rec` until stopped.
pub fn run_push<P, W, C>(src: &mut P, chunk: u32, rec: &mut Recorder<W, C>)
    -> Result<Outcome, Error>
    where P: PushSource, W: Write, C: Cancel
{
    info!("Reading samples in async mode...");

    let res = src.read_async(TRANSFER_COUNT, chunk, |buf| rec.handle_chunk(buf));

    rec.outcome(res)
}

/// Repeatedly read chunks of `chunk` bytes from `src` into `rec` until stopped.
///
/// A short read ends the run with an error.
pub fn run_pull<P, W, C>(src: &mut P, chunk: u32, rec: &mut Recorder<W, C>)
    -> Result<Outcome, Error>
    where P: PullSource, W: Write, C: Cancel
{
    info!("Reading samples in sync mode...");

    let mut buf = vec![0; chunk as usize];

    while !rec.stopped() {
        let len = match src.read_sync(&mut buf[..]) {
            Ok(len) => len,
            Err(e) => {
                if !rec.stopped() {
                    warn!("sync read failed");
                }

                return rec.outcome(Err(e));
            },
        };

        rec.handle_chunk(&buf[..len]);

        if len < buf.len() && !rec.stopped() {
            rec.fail(Error::ShortRead { want: buf.len(), got: len });
        }
    }

    rec.outcome(Ok(()))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Sender};
    use std::thread;
    use std::time::Duration;

    use plan::FrequencyPlan;
    use retune::{DeliveryCancel, RetuneStats, RetuneTask};
    use sdr::Tune;

    const F0: u32 = 98_000_000;
    const F1: u32 = 460_000_000;

    /// Source that delivers canned chunks until cancelled.
    struct MockStream {
        chunks: VecDeque<Vec<u8>>,
        cancels: Rc<Cell<usize>>,
        fail: bool,
    }

    impl MockStream {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            MockStream {
                chunks: chunks.into_iter().collect(),
                cancels: Rc::new(Cell::new(0)),
                fail: false,
            }
        }

        fn canceller(&self) -> MockCancel {
            MockCancel(self.cancels.clone())
        }
    }

    impl PushSource for MockStream {
        fn read_async<F: FnMut(&[u8])>(&mut self, _: u32, _: u32, mut handler: F)
            -> Result<(), DriverError>
        {
            while let Some(c) = self.chunks.pop_front() {
                if self.cancels.get() > 0 {
                    return Ok(());
                }

                handler(&c[..]);
            }

            if self.fail {
                Err(DriverError::Failed("read_async"))
            } else {
                Ok(())
            }
        }
    }

    impl PullSource for MockStream {
        fn read_sync(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
            if self.cancels.get() > 0 {
                return Err(DriverError::Failed("read_sync"));
            }

            let c = self.chunks.pop_front().ok_or(DriverError::Failed("read_sync"))?;
            buf[..c.len()].copy_from_slice(&c[..]);

            Ok(c.len())
        }
    }

    struct MockCancel(Rc<Cell<usize>>);

    impl Cancel for MockCancel {
        fn cancel(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    /// Accepts a fixed number of bytes, then refuses more.
    struct Limited {
        buf: Vec<u8>,
        limit: usize,
    }

    impl Write for Limited {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit - self.buf.len());
            self.buf.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_cap_truncate() {
        let plan = FrequencyPlan::new(&[F0], &[10]).unwrap();
        let mut src = MockStream::new(vec![ramp(32), ramp(32)]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        {
            let mut rec = Recorder::new(&mut sink, plan.cap(), &stop, &cancel);
            assert_eq!(run_push(&mut src, 32, &mut rec).unwrap(), Outcome::Completed);
            assert_eq!(rec.remaining(), Some(0));
        }

        assert_eq!(sink.written(), 20);
        assert_eq!(&sink.get_ref()[..], &ramp(20)[..]);
        assert_eq!(cancel.0.get(), 1);
        assert!(stop.requested());
    }

    #[test]
    fn test_cap_exact() {
        let mut src = MockStream::new(vec![ramp(32); 4]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        {
            let mut rec = Recorder::new(&mut sink, Some(64), &stop, &cancel);
            assert_eq!(run_push(&mut src, 32, &mut rec).unwrap(), Outcome::Completed);
            assert_eq!(rec.remaining(), Some(0));
        }

        assert_eq!(sink.written(), 64);
        assert_eq!(cancel.0.get(), 1);

        // The stream stopped delivering after the cancel.
        assert_eq!(src.chunks.len(), 1);
    }

    #[test]
    fn test_stream_ended() {
        let mut src = MockStream::new(vec![ramp(32); 3]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        match run_push(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel)) {
            Err(Error::Device(DriverError::StreamEnded)) => {},
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(sink.written(), 96);
        assert_eq!(cancel.0.get(), 0);
    }

    #[test]
    fn test_driver_error() {
        let mut src = MockStream::new(vec![ramp(32)]);
        src.fail = true;
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        match run_push(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel)) {
            Err(Error::Device(DriverError::Failed("read_async"))) => {},
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(sink.written(), 32);
    }

    #[test]
    fn test_user_cancel() {
        let mut src = MockStream::new(vec![ramp(32); 3]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        // Chunks still in flight after a signal are dropped.
        stop.request();

        assert_eq!(run_push(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel))
                       .unwrap(), Outcome::Cancelled);
        assert_eq!(sink.written(), 0);
    }

    #[test]
    fn test_short_write() {
        let mut src = MockStream::new(vec![ramp(32); 3]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(Limited { buf: vec![], limit: 40 });

        match run_push(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel)) {
            Err(Error::ShortWrite(_)) => {},
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(sink.written(), 32);
        assert_eq!(cancel.0.get(), 1);
        assert!(stop.requested());
    }

    #[test]
    fn test_alternate_accounting() {
        let plan = FrequencyPlan::new(&[F0, F1], &[4096, 8192]).unwrap();
        let chunk = plan.chunk_size(None).unwrap() as usize;
        let stop = Shutdown::new();
        let mailbox = RetuneMailbox::new(stop.clone());
        let mut sink = Sink::new(vec![]);

        {
            let blocks = BlockAccountant::new(*plan.channels().unwrap());
            let mut rec = Recorder::new(&mut sink, plan.cap(), &stop, &mailbox)
                .alternate(blocks, &mailbox);

            rec.handle_chunk(&vec![0; chunk]);
            assert_eq!(mailbox.pending(), Some(F1));
            assert_eq!(rec.blocks().unwrap().active(), 1);

            rec.handle_chunk(&vec![1; chunk]);
            assert_eq!(mailbox.pending(), Some(F1));
            assert_eq!(rec.blocks().unwrap().active(), 1);

            rec.handle_chunk(&vec![1; chunk]);
            assert_eq!(mailbox.pending(), Some(F0));
            assert_eq!(rec.blocks().unwrap().active(), 0);

            rec.handle_chunk(&vec![0; chunk]);
            assert_eq!(mailbox.pending(), Some(F1));
            assert_eq!(rec.blocks().unwrap().blocks(), 3);
        }

        // Nothing consumed the posts, but accounting is unaffected.
        assert_eq!(mailbox.overwritten(), 2);
        assert_eq!(sink.written(), 4 * 8192);
        assert!(!stop.requested());
    }

    struct RecordingTuner {
        freqs: Sender<u32>,
    }

    impl Tune for RecordingTuner {
        fn set_center_freq(&mut self, hz: u32) -> Result<(), DriverError> {
            self.freqs.send(hz).unwrap();
            Ok(())
        }
    }

    impl Cancel for RecordingTuner {
        fn cancel(&self) {}
    }

    /// Source that waits for each retune to be picked up before delivering more, then
    /// acts like a user cancel once it runs dry.
    struct PacedStream {
        chunks: usize,
        len: usize,
        mailbox: Arc<RetuneMailbox>,
    }

    impl PushSource for PacedStream {
        fn read_async<F: FnMut(&[u8])>(&mut self, _: u32, _: u32, mut handler: F)
            -> Result<(), DriverError>
        {
            let buf = vec![0; self.len];

            for _ in 0..self.chunks {
                handler(&buf[..]);

                while self.mailbox.pending().is_some() {
                    thread::sleep(Duration::from_millis(1));
                }
            }

            self.mailbox.cancel();

            Ok(())
        }
    }

    #[test]
    fn test_alternate_with_worker() {
        let plan = FrequencyPlan::new(&[F0, F1], &[4096, 8192]).unwrap();
        let chunk = plan.chunk_size(None).unwrap();
        let stop = Shutdown::new();
        let mailbox = Arc::new(RetuneMailbox::new(stop.clone()));
        let (tx, rx) = channel();

        let mut task = RetuneTask::new(RecordingTuner { freqs: tx }, mailbox.clone());
        let worker = thread::spawn(move || task.run());

        let mut src = PacedStream {
            chunks: 6,
            len: chunk as usize,
            mailbox: mailbox.clone(),
        };

        let mut sink = Sink::new(vec![]);

        {
            let blocks = BlockAccountant::new(*plan.channels().unwrap());
            let mut rec = Recorder::new(&mut sink, None, &stop, &*mailbox)
                .alternate(blocks, &mailbox);

            assert_eq!(run_push(&mut src, chunk, &mut rec).unwrap(), Outcome::Cancelled);
            assert_eq!(rec.blocks().unwrap().blocks(), 4);
        }

        mailbox.shutdown();
        let stats = worker.join().unwrap();

        assert_eq!(stats.applied, 4);
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![F1, F0, F1, F0]);
        assert_eq!(mailbox.overwritten(), 0);
        assert_eq!(sink.written(), 6 * 8192);
    }

    /// Device that, like librtlsdr, ignores a cancel unless a read is running.
    #[derive(Clone, Default)]
    struct LateDevice {
        reading: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
        cancels: Arc<AtomicUsize>,
    }

    impl Tune for LateDevice {
        fn set_center_freq(&mut self, _: u32) -> Result<(), DriverError> {
            Ok(())
        }
    }

    impl Cancel for LateDevice {
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);

            if self.reading.load(Ordering::SeqCst) {
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    impl PushSource for LateDevice {
        fn read_async<F: FnMut(&[u8])>(&mut self, _: u32, len: u32, mut handler: F)
            -> Result<(), DriverError>
        {
            let buf = vec![0; len as usize];
            self.reading.store(true, Ordering::SeqCst);

            for _ in 0..1000 {
                if self.cancelled.load(Ordering::SeqCst) {
                    self.reading.store(false, Ordering::SeqCst);
                    return Ok(());
                }

                handler(&buf[..]);
            }

            self.reading.store(false, Ordering::SeqCst);

            Err(DriverError::Failed("read_async"))
        }
    }

    #[test]
    fn test_alternate_cancel_before_stream() {
        let plan = FrequencyPlan::new(&[F0, F1], &[4096, 8192]).unwrap();
        let chunk = plan.chunk_size(None).unwrap();
        let stop = Shutdown::new();
        let mailbox = Arc::new(RetuneMailbox::new(stop.clone()));
        let device = LateDevice::default();

        // A signal lands before streaming starts, so the worker's cancel is ignored.
        let mut task = RetuneTask::new(device.clone(), mailbox.clone());
        stop.request();
        mailbox.cancel();
        assert_eq!(thread::spawn(move || task.run()).join().unwrap(), RetuneStats::default());
        assert_eq!(device.cancels.load(Ordering::SeqCst), 1);

        let cancel = DeliveryCancel::new(mailbox.clone(), device.clone());
        let mut src = device.clone();
        let mut sink = Sink::new(vec![]);

        {
            let blocks = BlockAccountant::new(*plan.channels().unwrap());
            let mut rec = Recorder::new(&mut sink, None, &stop, &cancel)
                .alternate(blocks, &mailbox);

            assert_eq!(run_push(&mut src, chunk, &mut rec).unwrap(), Outcome::Cancelled);
        }

        assert_eq!(sink.written(), 0);
        assert_eq!(device.cancels.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pull_cap() {
        let mut src = MockStream::new(vec![ramp(32); 4]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        assert_eq!(run_pull(&mut src, 32, &mut Recorder::new(&mut sink, Some(40), &stop, &cancel))
                       .unwrap(), Outcome::Completed);
        assert_eq!(sink.written(), 40);
        assert_eq!(src.chunks.len(), 2);
    }

    #[test]
    fn test_pull_short_read() {
        let mut src = MockStream::new(vec![ramp(32), ramp(16), ramp(32)]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        match run_pull(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel)) {
            Err(Error::ShortRead { want: 32, got: 16 }) => {},
            other => panic!("unexpected result {:?}", other),
        }

        // The short chunk is still written before stopping.
        assert_eq!(sink.written(), 48);
        assert_eq!(cancel.0.get(), 1);
    }

    #[test]
    fn test_pull_read_error() {
        let mut src = MockStream::new(vec![ramp(32)]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        match run_pull(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel)) {
            Err(Error::Device(DriverError::Failed("read_sync"))) => {},
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(sink.written(), 32);
    }

    #[test]
    fn test_pull_cancelled_read() {
        let mut src = MockStream::new(vec![ramp(32); 2]);
        let cancel = src.canceller();
        let stop = Shutdown::new();
        let mut sink = Sink::new(vec![]);

        // A signal cancels the stream, so the blocked read fails.
        stop.request();
        cancel.cancel();

        assert_eq!(run_pull(&mut src, 32, &mut Recorder::new(&mut sink, None, &stop, &cancel))
                       .unwrap(), Outcome::Cancelled);
        assert_eq!(sink.written(), 0);
    }
}
