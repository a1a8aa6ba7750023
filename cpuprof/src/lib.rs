//! # cpuprof - eBPF Sampling CPU Profiler
//!
//! cpuprof opens one sampling perf counter per online CPU and attaches an
//! eBPF collector program to each. Every time a counter overflows, the
//! collector captures the interrupted task's kernel and user stacks and
//! pushes a fixed-size record into a shared ring buffer, which this crate
//! drains, decodes and prints.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Per-CPU perf counters (Kernel)                  │
//! │      cpu-clock or cpu-cycles, one sample every N events         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ overflow
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               profile_cpu eBPF program (Kernel)                 │
//! │   pid, cpu, timestamp, comm, kernel stack, user stack           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ EVENTS ring buffer (2088-byte records)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     cpuprof (This Crate)                        │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ SampleReader │──▶│    codec     │──▶│    render    │──▶ stdout│
//! │  │ (tokio task) │   │   (decode)   │   │  (text rows) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                                                       │
//! │         │ cancellation                                          │
//! │  ┌──────────────┐   ┌──────────────────┐                        │
//! │  │  Controller  │──▶│ PerfEventManager │                        │
//! │  │ (lifecycle)  │   │ (open/start/stop)│                        │
//! │  └──────────────┘   └──────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: kernel-facing pieces
//!   - `perf_events`: per-CPU counters behind the `CounterBackend` trait
//!   - `sample_reader`: cancellation-aware ring buffer consumer
//!   - `ebpf_setup`: load the collector object, program and map
//!   - `cpu_utils`: online CPU discovery
//! - [`codec`]: raw record to [`codec::StackSample`]
//! - [`render`]: fixed-width text output
//! - [`controller`]: state machine tying setup, running and shutdown together
//! - [`config`]: validated [`config::ProfilerConfig`] built from [`cli::Args`]
//! - [`preflight`]: privilege, kernel and object checks
//! - [`clock`]: boot-time epoch for absolute timestamps
//! - [`domain`]: core types and errors
//!
//! ## Shutdown
//!
//! SIGINT, SIGTERM or `--duration` cancel a shared token. The controller then
//! disables every counter, waits for the reader task to release the ring
//! buffer, and finally drops the eBPF object.

pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod controller;
pub mod domain;
pub mod preflight;
pub mod profiling;
pub mod render;
