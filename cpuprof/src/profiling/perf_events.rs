//! # Per-CPU Perf Counters
//!
//! Opens one sampling counter per logical CPU, attaches the collector
//! program to each, and enables/disables them as a group.
//!
//! ## Failure Policy
//!
//! - [`PerfEventManager::open`] fails fast on the first CPU that cannot be
//!   opened or attached; counters opened so far are closed on drop.
//! - [`PerfEventManager::start`] rolls back: if one CPU cannot be enabled,
//!   the counters enabled by that call are disabled again.
//! - [`PerfEventManager::stop`] is best-effort: every enabled counter is
//!   attempted and the first error is returned after the full pass.
//!   Stopping counters that are already stopped is a no-op.
//!
//! Kernel access goes through [`CounterBackend`]; [`SyscallBackend`] is the
//! `perf_event_open(2)` implementation.

#![allow(unsafe_code)] // perf_event_open(2) and its ioctls

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use cpuprof_common::MAX_STACK_DEPTH;
use log::{debug, info, warn};
use perf_event_open_sys::bindings::{
    perf_event_attr, PERF_COUNT_HW_CPU_CYCLES, PERF_COUNT_SW_CPU_CLOCK, PERF_FLAG_FD_CLOEXEC,
    PERF_SAMPLE_RAW, PERF_TYPE_HARDWARE, PERF_TYPE_SOFTWARE,
};
use perf_event_open_sys::ioctls;

use crate::domain::{CounterKind, CpuId, PerfError, PidFilter};

/// What every per-CPU counter samples, and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig {
    pub kind: CounterKind,
    /// Written to `sample_period`: one sample every N cycles / clock ticks
    pub sampling_rate: u64,
    pub pid_filter: PidFilter,
}

/// Non-owning reference to the loaded collector program
///
/// The program (and its fd) is owned by the eBPF object; counters only keep
/// this handle to attach to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHandle(RawFd);

impl ProgramHandle {
    #[must_use]
    pub const fn from_raw_fd(fd: RawFd) -> Self {
        Self(fd)
    }

    #[must_use]
    pub fn as_raw_fd(self) -> RawFd {
        self.0
    }
}

/// Kernel operations on a single counter
pub trait CounterBackend {
    /// Owned kernel handle for one counter
    type Counter;

    /// Open a disabled counter on `cpu` and attach `program` to it
    ///
    /// # Errors
    /// [`PerfError::Open`] or [`PerfError::Attach`] naming `cpu`
    fn open(
        &mut self,
        cpu: CpuId,
        config: &CounterConfig,
        program: ProgramHandle,
    ) -> Result<Self::Counter, PerfError>;

    /// # Errors
    /// Returns the OS error of the enable request
    fn enable(&mut self, counter: &Self::Counter) -> io::Result<()>;

    /// # Errors
    /// Returns the OS error of the disable request
    fn disable(&mut self, counter: &Self::Counter) -> io::Result<()>;
}

/// One opened counter
pub struct PerfCounter<C> {
    cpu: CpuId,
    config: CounterConfig,
    program: ProgramHandle,
    enabled: bool,
    inner: C,
}

impl<C> PerfCounter<C> {
    #[must_use]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[must_use]
    pub fn kind(&self) -> CounterKind {
        self.config.kind
    }

    #[must_use]
    pub fn sampling_rate(&self) -> u64 {
        self.config.sampling_rate
    }

    #[must_use]
    pub fn pid_filter(&self) -> PidFilter {
        self.config.pid_filter
    }

    #[must_use]
    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Exclusive owner of the per-CPU counters
pub struct PerfEventManager<B: CounterBackend> {
    backend: B,
    counters: Vec<PerfCounter<B::Counter>>,
}

impl<B: CounterBackend> PerfEventManager<B> {
    /// Open one counter per CPU in `cpus`, each attached to `program`
    ///
    /// # Errors
    /// Returns the first per-CPU failure; nothing is retried
    pub fn open(
        mut backend: B,
        program: ProgramHandle,
        cpus: &[CpuId],
        config: CounterConfig,
    ) -> Result<Self, PerfError> {
        let mut counters = Vec::with_capacity(cpus.len());

        for &cpu in cpus {
            let inner = backend.open(cpu, &config, program)?;
            debug!("Opened {} counter on {cpu}", config.kind);
            counters.push(PerfCounter { cpu, config, program, enabled: false, inner });
        }

        info!(
            "Opened {} {} counters (period {}, {})",
            counters.len(),
            config.kind,
            config.sampling_rate,
            config.pid_filter
        );

        Ok(Self { backend, counters })
    }

    /// Enable every counter that is not enabled yet
    ///
    /// # Errors
    /// Returns [`PerfError::Enable`] for the first failing CPU, after
    /// disabling the counters this call had enabled
    #[allow(clippy::needless_range_loop)]
    pub fn start(&mut self) -> Result<(), PerfError> {
        let Self { backend, counters } = self;
        let mut enabled_here = Vec::new();

        for idx in 0..counters.len() {
            if counters[idx].enabled {
                continue;
            }
            match backend.enable(&counters[idx].inner) {
                Ok(()) => {
                    counters[idx].enabled = true;
                    enabled_here.push(idx);
                }
                Err(source) => {
                    let cpu = counters[idx].cpu;
                    warn!("Failed to start perf event on {cpu}: {source}, rolling back");
                    for &done in &enabled_here {
                        let counter = &mut counters[done];
                        match backend.disable(&counter.inner) {
                            Ok(()) => counter.enabled = false,
                            Err(e) => warn!("Rollback: failed to disable {}: {e}", counter.cpu),
                        }
                    }
                    return Err(PerfError::Enable { cpu, source });
                }
            }
        }

        info!("Started {} perf counters", counters.len());
        Ok(())
    }

    /// Disable every enabled counter
    ///
    /// # Errors
    /// Returns the first [`PerfError::Disable`] after attempting all CPUs
    pub fn stop(&mut self) -> Result<(), PerfError> {
        let Self { backend, counters } = self;
        let mut first_error = None;
        let mut stopped = 0usize;

        for counter in counters.iter_mut().filter(|c| c.enabled) {
            match backend.disable(&counter.inner) {
                Ok(()) => {
                    counter.enabled = false;
                    stopped += 1;
                }
                Err(source) => {
                    warn!("Failed to stop perf event on {}: {source}", counter.cpu);
                    if first_error.is_none() {
                        first_error = Some(PerfError::Disable { cpu: counter.cpu, source });
                    }
                }
            }
        }

        debug!("Stopped {stopped} perf counters");
        first_error.map_or(Ok(()), Err)
    }

    /// Number of counters (one per CPU)
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Read-only view of the counters
    pub fn counters(&self) -> impl Iterator<Item = &PerfCounter<B::Counter>> {
        self.counters.iter()
    }
}

/// Counter attributes for `perf_event_open(2)`
///
/// `size` is taken from the bindings' struct, the kernel accepts any size it
/// knows as long as unknown trailing bytes are zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn perf_attr(config: &CounterConfig) -> perf_event_attr {
    let mut attr = perf_event_attr::default();
    attr.size = mem::size_of::<perf_event_attr>() as u32;

    let (type_, event) = match config.kind {
        CounterKind::HardwareCycles => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CPU_CYCLES as u64),
        CounterKind::SoftwareClock => (PERF_TYPE_SOFTWARE, PERF_COUNT_SW_CPU_CLOCK as u64),
    };
    attr.type_ = type_;
    attr.config = event;
    attr.sample_type = PERF_SAMPLE_RAW as u64;
    attr.sample_max_stack = MAX_STACK_DEPTH as u16;
    attr.__bindgen_anon_1.sample_period = config.sampling_rate;
    attr.__bindgen_anon_2.wakeup_events = 1;
    // Enabled explicitly by PerfEventManager::start
    attr.set_disabled(1);
    attr
}

/// `perf_event_open(2)` backed counters
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallBackend;

impl CounterBackend for SyscallBackend {
    type Counter = OwnedFd;

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn open(
        &mut self,
        cpu: CpuId,
        config: &CounterConfig,
        program: ProgramHandle,
    ) -> Result<OwnedFd, PerfError> {
        let mut attr = perf_attr(config);

        let fd = unsafe {
            perf_event_open_sys::perf_event_open(
                &mut attr,
                config.pid_filter.as_raw(),
                cpu.0 as i32,
                -1,
                PERF_FLAG_FD_CLOEXEC as libc::c_ulong,
            )
        };
        if fd < 0 {
            return Err(PerfError::Open { cpu, source: io::Error::last_os_error() });
        }
        // SAFETY: fd was just returned by perf_event_open and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let ret = unsafe { ioctls::SET_BPF(fd.as_raw_fd(), program.as_raw_fd() as u32) };
        if ret < 0 {
            return Err(PerfError::Attach { cpu, source: io::Error::last_os_error() });
        }

        Ok(fd)
    }

    fn enable(&mut self, counter: &OwnedFd) -> io::Result<()> {
        check_ioctl(unsafe { ioctls::ENABLE(counter.as_raw_fd(), 0) })
    }

    fn disable(&mut self, counter: &OwnedFd) -> io::Result<()> {
        check_ioctl(unsafe { ioctls::DISABLE(counter.as_raw_fd(), 0) })
    }
}

fn check_ioctl(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PROGRAM: ProgramHandle = ProgramHandle(42);

    fn config() -> CounterConfig {
        CounterConfig {
            kind: CounterKind::SoftwareClock,
            sampling_rate: 1_000_000,
            pid_filter: PidFilter::All,
        }
    }

    fn cpus(n: u32) -> Vec<CpuId> {
        (0..n).map(CpuId).collect()
    }

    struct FakeCounter {
        cpu: u32,
        closed: Arc<AtomicUsize>,
    }

    impl Drop for FakeCounter {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        fail_open: Option<u32>,
        fail_enable: Option<u32>,
        fail_disable: HashSet<u32>,
        enables: Vec<u32>,
        disables: Vec<u32>,
        closed: Arc<AtomicUsize>,
    }

    impl CounterBackend for FakeBackend {
        type Counter = FakeCounter;

        fn open(
            &mut self,
            cpu: CpuId,
            _config: &CounterConfig,
            _program: ProgramHandle,
        ) -> Result<FakeCounter, PerfError> {
            if self.fail_open == Some(cpu.0) {
                return Err(PerfError::Open {
                    cpu,
                    source: io::Error::from_raw_os_error(libc::ENODEV),
                });
            }
            Ok(FakeCounter { cpu: cpu.0, closed: Arc::clone(&self.closed) })
        }

        fn enable(&mut self, counter: &FakeCounter) -> io::Result<()> {
            if self.fail_enable == Some(counter.cpu) {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            self.enables.push(counter.cpu);
            Ok(())
        }

        fn disable(&mut self, counter: &FakeCounter) -> io::Result<()> {
            if self.fail_disable.contains(&counter.cpu) {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            self.disables.push(counter.cpu);
            Ok(())
        }
    }

    #[test]
    fn test_open_one_counter_per_cpu() {
        for n in [1, 2, 7, 64] {
            let manager =
                PerfEventManager::open(FakeBackend::default(), PROGRAM, &cpus(n), config())
                    .unwrap();
            assert_eq!(manager.len(), n as usize);
            for (counter, expected) in manager.counters().zip(0..n) {
                assert_eq!(counter.cpu(), CpuId(expected));
                assert_eq!(counter.program(), PROGRAM);
                assert_eq!(counter.kind(), CounterKind::SoftwareClock);
                assert_eq!(counter.sampling_rate(), 1_000_000);
                assert_eq!(counter.pid_filter(), PidFilter::All);
                assert!(!counter.is_enabled());
            }
        }
    }

    #[test]
    fn test_open_fails_fast_and_closes_opened() {
        let backend = FakeBackend { fail_open: Some(2), ..FakeBackend::default() };
        let closed = Arc::clone(&backend.closed);

        let err = PerfEventManager::open(backend, PROGRAM, &cpus(4), config())
            .err()
            .expect("open should fail");

        assert!(matches!(err, PerfError::Open { cpu: CpuId(2), .. }));
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_start_enables_all() {
        let mut manager =
            PerfEventManager::open(FakeBackend::default(), PROGRAM, &cpus(4), config()).unwrap();
        manager.start().unwrap();
        assert!(manager.counters().all(PerfCounter::is_enabled));
        assert_eq!(manager.backend.enables, vec![0, 1, 2, 3]);

        // Already running counters are left alone
        manager.start().unwrap();
        assert_eq!(manager.backend.enables.len(), 4);
    }

    #[test]
    fn test_start_rolls_back_on_failure() {
        let backend = FakeBackend { fail_enable: Some(2), ..FakeBackend::default() };
        let mut manager = PerfEventManager::open(backend, PROGRAM, &cpus(4), config()).unwrap();

        let err = manager.start().unwrap_err();
        assert!(matches!(err, PerfError::Enable { cpu: CpuId(2), .. }));
        assert_eq!(manager.backend.disables, vec![0, 1]);
        assert!(manager.counters().all(|c| !c.is_enabled()));
    }

    #[test]
    fn test_stop_disables_each_counter_once() {
        let mut manager =
            PerfEventManager::open(FakeBackend::default(), PROGRAM, &cpus(3), config()).unwrap();
        manager.start().unwrap();

        manager.stop().unwrap();
        manager.stop().unwrap();

        assert_eq!(manager.backend.disables, vec![0, 1, 2]);
        assert!(manager.counters().all(|c| !c.is_enabled()));
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let mut manager =
            PerfEventManager::open(FakeBackend::default(), PROGRAM, &cpus(2), config()).unwrap();
        manager.stop().unwrap();
        assert!(manager.backend.disables.is_empty());
    }

    #[test]
    fn test_stop_is_best_effort() {
        let mut backend = FakeBackend::default();
        backend.fail_disable.extend([1, 2]);
        let mut manager = PerfEventManager::open(backend, PROGRAM, &cpus(4), config()).unwrap();
        manager.start().unwrap();

        let err = manager.stop().unwrap_err();
        assert!(matches!(err, PerfError::Disable { cpu: CpuId(1), .. }));
        assert_eq!(manager.backend.disables, vec![0, 3]);

        // Failed counters stay enabled and are retried
        manager.backend.fail_disable.clear();
        manager.stop().unwrap();
        assert_eq!(manager.backend.disables, vec![0, 3, 1, 2]);
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_perf_attr_software() {
        let attr = perf_attr(&config());
        assert_eq!(attr.size as usize, mem::size_of::<perf_event_attr>());
        assert_eq!(attr.type_, PERF_TYPE_SOFTWARE);
        assert_eq!(attr.config, PERF_COUNT_SW_CPU_CLOCK as u64);
        assert_eq!(attr.sample_type, PERF_SAMPLE_RAW as u64);
        assert_eq!(attr.sample_max_stack, 128);
        assert_eq!(unsafe { attr.__bindgen_anon_1.sample_period }, 1_000_000);
        assert_eq!(unsafe { attr.__bindgen_anon_2.wakeup_events }, 1);
        assert_eq!(attr.disabled(), 1);
        assert_eq!(attr.freq(), 0);
    }

    #[test]
    fn test_perf_attr_hardware() {
        let attr = perf_attr(&CounterConfig { kind: CounterKind::HardwareCycles, ..config() });
        assert_eq!(attr.type_, PERF_TYPE_HARDWARE);
        assert_eq!(attr.config, PERF_COUNT_HW_CPU_CYCLES as u64);
    }
}
