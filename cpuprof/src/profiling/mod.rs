//! Profiling core modules
//!
//! - CPU discovery
//! - eBPF collector loading
//! - Per-CPU perf counter management
//! - Ring buffer consumption

pub mod cpu_utils;
pub mod ebpf_setup;
pub mod perf_events;
pub mod sample_reader;

// Re-export common types
pub use cpu_utils::online_cpus;
pub use ebpf_setup::{
    init_ebpf_logger, load_collector, load_profile_program, raise_memlock_rlimit,
    take_events_ring_buf,
};
pub use perf_events::{
    CounterBackend, CounterConfig, PerfCounter, PerfEventManager, ProgramHandle, SyscallBackend,
};
pub use sample_reader::{
    ChannelSink, ReaderStats, RecordSource, RingBufSource, SampleReader, SampleSink, WriterSink,
};
