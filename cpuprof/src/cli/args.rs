//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

/// Default location of the collector object produced by `cargo xtask build-ebpf`
pub const DEFAULT_OBJECT_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/../target/bpfel-unknown-none/release/cpuprof");

#[derive(Parser, Debug)]
#[command(
    name = "cpuprof",
    about = "Sample kernel and user stacks on every CPU using perf events and eBPF",
    after_help = "\
EXAMPLES:
    sudo cpuprof                             Sample all processes with the software clock
    sudo cpuprof --hw --freq 100000          Hardware cycles, one sample every 100k cycles
    sudo cpuprof --pid 1234 --ps             One process, print stack addresses"
)]
pub struct Args {
    /// Use the hardware cycle counter instead of the software CPU clock
    #[arg(long)]
    pub hw: bool,

    /// Sample period passed to the counters (events between samples)
    #[arg(long, default_value_t = 1_000_000)]
    pub freq: u64,

    /// Only sample this process (-1 = all processes)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub pid: i32,

    /// Print kernel and user stack addresses for every sample
    #[arg(long)]
    pub ps: bool,

    /// Stop after N seconds (0 = until SIGINT/SIGTERM)
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Compiled collector object
    #[arg(long, value_name = "FILE", env = "CPUPROF_EBPF_OBJECT", default_value = DEFAULT_OBJECT_PATH)]
    pub object: PathBuf,

    /// bpffs directory the ring buffer map is pinned under
    #[arg(long, value_name = "DIR", default_value = cpuprof_common::DEFAULT_PIN_PATH)]
    pub pin_path: PathBuf,

    /// Do not pin the ring buffer map
    #[arg(long, conflicts_with = "pin_path")]
    pub no_pin: bool,
}
