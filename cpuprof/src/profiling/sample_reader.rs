//! # Sample Reader
//!
//! The single consumer of the `EVENTS` ring buffer. Runs as one tokio task
//! until the shared cancellation token fires:
//!
//! ```text
//! RecordSource ──raw bytes──▶ codec::decode ──StackSample──▶ SampleSink
//! ```
//!
//! Read and decode failures are logged and counted, they never end the loop.
//! A sink reporting [`io::ErrorKind::BrokenPipe`] (closed stdout, dropped
//! channel receiver) does: the reader cancels the shared token so the rest
//! of the session tears down too. The pending read is raced against
//! cancellation, so shutdown does not wait for another sample to arrive.

use std::io::{self, Write};

use async_trait::async_trait;
use aya::maps::{MapData, RingBuf};
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, error, warn};
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, StackSample};
use crate::render::Renderer;

/// Where raw records come from
#[async_trait]
pub trait RecordSource: Send {
    /// Wait for the next raw record
    ///
    /// # Errors
    /// Returns the underlying read error; the reader treats it as transient
    async fn next_record(&mut self) -> io::Result<Vec<u8>>;
}

/// Where decoded samples go
pub trait SampleSink: Send {
    /// # Errors
    /// Returns the output error. The reader logs it and keeps going, except
    /// for [`io::ErrorKind::BrokenPipe`], which ends the session
    fn emit(&mut self, sample: &StackSample) -> io::Result<()>;
}

/// Ring buffer map polled through tokio's reactor
pub struct RingBufSource {
    fd: AsyncFd<RingBuf<MapData>>,
}

impl RingBufSource {
    /// # Errors
    /// Returns an error if the ring buffer fd cannot be registered with tokio
    pub fn new(ring_buf: RingBuf<MapData>) -> io::Result<Self> {
        Ok(Self { fd: AsyncFd::new(ring_buf)? })
    }
}

#[async_trait]
impl RecordSource for RingBufSource {
    async fn next_record(&mut self) -> io::Result<Vec<u8>> {
        loop {
            let mut guard = self.fd.readable_mut().await?;
            if let Some(item) = guard.get_inner_mut().next() {
                return Ok(item.to_vec());
            }
            guard.clear_ready();
        }
    }
}

/// Renders samples as text into any writer (stdout in production)
pub struct WriterSink<W> {
    renderer: Renderer,
    out: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(renderer: Renderer, out: W) -> Self {
        Self { renderer, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> SampleSink for WriterSink<W> {
    fn emit(&mut self, sample: &StackSample) -> io::Result<()> {
        self.renderer.write_sample(&mut self.out, sample)?;
        self.out.flush()
    }
}

/// Hands samples to another consumer over a bounded channel
///
/// Never blocks the reader: samples are dropped (and counted) while the
/// channel is full.
pub struct ChannelSink {
    tx: Sender<StackSample>,
    dropped: u64,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: Sender<StackSample>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Samples discarded because the channel was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl SampleSink for ChannelSink {
    fn emit(&mut self, sample: &StackSample) -> io::Result<()> {
        match self.tx.try_send(sample.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "sample channel closed"))
            }
        }
    }
}

/// Counters reported when the reader exits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    /// Raw records pulled from the source
    pub records: u64,
    pub decoded: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
    pub sink_errors: u64,
}

/// Cancellation-aware consume loop
pub struct SampleReader<S, K> {
    source: S,
    sink: K,
    cancel: CancellationToken,
}

impl<S: RecordSource, K: SampleSink> SampleReader<S, K> {
    pub fn new(source: S, sink: K, cancel: CancellationToken) -> Self {
        Self { source, sink, cancel }
    }

    /// Consume records until cancelled or the sink is closed
    ///
    /// The source is dropped (closing the ring buffer) when this returns.
    pub async fn run(mut self) -> ReaderStats {
        let mut stats = ReaderStats::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let record = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                record = self.source.next_record() => record,
            };

            let raw = match record {
                Ok(raw) => raw,
                Err(e) => {
                    // Closing the buffer during shutdown surfaces as a read error
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    stats.read_errors += 1;
                    warn!("Failed reading from ring buffer: {e}");
                    tokio::task::yield_now().await;
                    continue;
                }
            };
            stats.records += 1;

            match codec::decode(&raw) {
                Ok(sample) => {
                    stats.decoded += 1;
                    if let Err(e) = self.sink.emit(&sample) {
                        stats.sink_errors += 1;
                        if e.kind() == io::ErrorKind::BrokenPipe {
                            // Nobody is listening any more: shut the whole session down
                            error!("Sample output closed ({e}), stopping");
                            self.cancel.cancel();
                            break;
                        }
                        warn!("Failed to output sample: {e}");
                    }
                }
                Err(e) => {
                    stats.decode_errors += 1;
                    warn!("Could not decode record ({e}): {raw:?}");
                }
            }
        }

        debug!("Sample reader exiting: {stats:?}");
        stats
    }
}

impl<S, K> SampleReader<S, K>
where
    S: RecordSource + 'static,
    K: SampleSink + 'static,
{
    /// Run the loop as a background tokio task
    pub fn spawn(self) -> JoinHandle<ReaderStats> {
        tokio::spawn(self.run())
    }
}
