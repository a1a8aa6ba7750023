//! Domain types providing compile-time safety and self-documentation

use std::fmt;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// CPU ID
///
/// Represents a logical CPU (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Which processes a counter samples
///
/// On the command line `-1` stands for [`PidFilter::All`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidFilter {
    #[default]
    All,
    Process(Pid),
}

impl PidFilter {
    /// Sentinel accepted by `perf_event_open(2)` for "any process"
    pub const ALL_SENTINEL: i32 = -1;

    /// Parse the raw command line value
    ///
    /// Returns `None` for negative values other than the sentinel.
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            Self::ALL_SENTINEL => Some(Self::All),
            pid if pid >= 0 => Some(Self::Process(Pid(pid.unsigned_abs()))),
            _ => None,
        }
    }

    /// Value passed as the `pid` argument of `perf_event_open(2)`
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::All => Self::ALL_SENTINEL,
            Self::Process(pid) => pid.0 as i32,
        }
    }
}

impl fmt::Display for PidFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all processes"),
            Self::Process(pid) => write!(f, "{pid}"),
        }
    }
}

/// Kind of counter driving the sampling interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// `PERF_TYPE_HARDWARE` / `PERF_COUNT_HW_CPU_CYCLES`
    HardwareCycles,
    /// `PERF_TYPE_SOFTWARE` / `PERF_COUNT_SW_CPU_CLOCK`
    SoftwareClock,
}

impl CounterKind {
    #[must_use]
    pub fn from_hw_flag(hardware: bool) -> Self {
        if hardware {
            Self::HardwareCycles
        } else {
            Self::SoftwareClock
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareCycles => write!(f, "hw-cycles"),
            Self::SoftwareClock => write!(f, "sw-cpu-clock"),
        }
    }
}
