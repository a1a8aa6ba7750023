//! # Profiler Lifecycle
//!
//! ```text
//! Idle ──▶ Initializing ──▶ Running ──▶ ShuttingDown ──▶ Stopped
//!               │                                          ▲
//!               └──────────── any setup error ─────────────┘
//! ```
//!
//! [`Controller::run`] does the kernel setup and hands the live pieces to
//! [`Controller::drive`], which owns everything after initialization. `drive`
//! is generic over the counter backend, record source and sink so the
//! shutdown ordering can be exercised without a kernel.
//!
//! The session ends when the shared token is cancelled: by a
//! [`ShutdownSignal`], or by the reader once its output has been closed.

use std::fmt;
use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use aya::Ebpf;
use log::{debug, info};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::config::ProfilerConfig;
use crate::domain::ProfilerError;
use crate::profiling::{
    init_ebpf_logger, load_collector, load_profile_program, online_cpus, raise_memlock_rlimit,
    take_events_ring_buf, CounterBackend, PerfEventManager, ReaderStats, RecordSource,
    RingBufSource, SampleReader, SampleSink, SyscallBackend, WriterSink,
};
use crate::render::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything initialization produces
struct Session {
    bpf: Ebpf,
    perf: PerfEventManager<SyscallBackend>,
    source: RingBufSource,
    renderer: Renderer,
}

pub struct Controller {
    config: ProfilerConfig,
    state: State,
}

impl Controller {
    #[must_use]
    pub fn new(config: ProfilerConfig) -> Self {
        Self { config, state: State::Idle }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, next: State) {
        debug!("Controller: {} -> {next}", self.state);
        self.state = next;
    }

    /// Profile until `cancel` fires, printing samples to stdout
    ///
    /// # Errors
    /// Returns any initialization failure, or the first counter that could
    /// not be disabled during shutdown
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ReaderStats> {
        self.transition(State::Initializing);

        let session = match self.initialize() {
            Ok(session) => session,
            Err(e) => {
                self.transition(State::Stopped);
                return Err(e);
            }
        };

        let Session { bpf, perf, source, renderer } = session;
        let sink = WriterSink::new(renderer, io::stdout());
        let result = self.drive(perf, source, sink, cancel).await;

        // Counters are closed inside drive; the program they pointed at goes last
        drop(bpf);
        result
    }

    fn initialize(&self) -> Result<Session> {
        raise_memlock_rlimit()?;

        let mut bpf =
            load_collector(&self.config.object_path, self.config.pin_path.as_deref())?;
        init_ebpf_logger(&mut bpf);
        let program = load_profile_program(&mut bpf)?;

        let cpus = online_cpus().context("Failed to discover online CPUs")?;
        if cpus.is_empty() {
            return Err(ProfilerError::NoCpus.into());
        }
        info!("Profiling {} online CPUs", cpus.len());

        let mut perf = PerfEventManager::open(SyscallBackend, program, &cpus, self.config.counter)
            .context("Failed to open perf counters")?;
        perf.start().context("Failed to start perf counters")?;

        let ring_buf = take_events_ring_buf(&mut bpf)?;
        let source =
            RingBufSource::new(ring_buf).context("Failed to register ring buffer with tokio")?;

        let boot_time_ns = clock::boot_time_ns().context("Failed to read system clocks")?;
        let renderer = Renderer::new(boot_time_ns, self.config.print_stack);
        renderer.write_header(&mut io::stdout().lock()).context("Failed to write header")?;

        Ok(Session { bpf, perf, source, renderer })
    }

    /// Run the reader until `cancel` fires, then tear down
    ///
    /// Teardown order: disable every counter, then wait for the reader task
    /// to drop its source. Counters are closed when `perf` goes out of scope.
    ///
    /// # Errors
    /// Returns the first counter that failed to stop, or a reader task panic
    pub async fn drive<B, S, K>(
        &mut self,
        mut perf: PerfEventManager<B>,
        source: S,
        sink: K,
        cancel: CancellationToken,
    ) -> Result<ReaderStats>
    where
        B: CounterBackend,
        S: RecordSource + 'static,
        K: SampleSink + 'static,
    {
        let reader = SampleReader::new(source, sink, cancel.clone()).spawn();
        self.transition(State::Running);

        cancel.cancelled().await;
        self.transition(State::ShuttingDown);

        let stopped = perf.stop();
        let joined = reader.await;
        self.transition(State::Stopped);

        let stats = joined.context("Sample reader task failed")?;
        info!(
            "Reader finished: {} records, {} decoded, {} malformed, {} read errors",
            stats.records, stats.decoded, stats.decode_errors, stats.read_errors
        );
        stopped.context("Failed to stop perf counters")?;
        Ok(stats)
    }
}

/// SIGINT, SIGTERM and the optional run time limit
///
/// Handlers are registered by [`ShutdownSignal::install`], so a failure
/// surfaces at startup rather than as an immediate shutdown.
pub struct ShutdownSignal {
    sigint: Signal,
    sigterm: Signal,
    duration: Option<Duration>,
}

impl ShutdownSignal {
    /// # Errors
    /// Returns an error if either signal handler cannot be registered
    pub fn install(duration: Option<Duration>) -> io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            duration,
        })
    }

    /// Resolve on the first signal, or once the time limit has elapsed
    pub async fn wait(mut self) {
        let duration = self.duration;
        let limit = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = self.sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = self.sigterm.recv() => info!("Received SIGTERM, shutting down"),
            () = limit => info!("Duration elapsed, shutting down"),
        }
    }
}
