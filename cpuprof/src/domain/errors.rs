//! Structured error types for cpuprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::io;
use std::path::PathBuf;

use super::types::CpuId;
use thiserror::Error;

/// Startup failures: fatal, the profiler never reaches the running state
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to raise RLIMIT_MEMLOCK: {0}")]
    MemlockLimit(#[source] io::Error),

    #[error("Failed to load eBPF object {path}: {source}")]
    EbpfLoadFailed {
        path: PathBuf,
        #[source]
        source: aya::EbpfError,
    },

    #[error("Program {0} not found in eBPF object")]
    ProgramNotFound(&'static str),

    #[error("Map {0} not found in eBPF object")]
    MapNotFound(&'static str),

    #[error("No online CPUs found")]
    NoCpus,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),
}

/// Per-CPU counter failures
#[derive(Error, Debug)]
pub enum PerfError {
    #[error("Failed to open perf event on {cpu}: {source}")]
    Open { cpu: CpuId, source: io::Error },

    #[error("Failed to attach collector program to perf event on {cpu}: {source}")]
    Attach { cpu: CpuId, source: io::Error },

    #[error("Failed to enable perf event on {cpu}: {source}")]
    Enable { cpu: CpuId, source: io::Error },

    #[error("Failed to disable perf event on {cpu}: {source}")]
    Disable { cpu: CpuId, source: io::Error },
}

/// Record decoding failures (dropped by the reader loop, never fatal)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Record too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}
