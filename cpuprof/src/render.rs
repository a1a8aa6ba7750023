//! Human-readable rendering of decoded samples
//!
//! One fixed-width row per sample, optionally followed by the kernel and
//! user frame addresses. Boot-relative timestamps are turned into wall-clock
//! nanoseconds here and only here; the sample itself is never modified.

use std::io::{self, Write};

use crate::codec::StackSample;

/// Column header matching [`Renderer::write_sample`] rows
#[must_use]
pub fn header() -> String {
    format!(
        "{:<20} {:<24} {:<7} {:<7} {:<7} {:<7}",
        "TIME", "COMM", "PID", "CPUID", "KStackSz", "UStackSz"
    )
}

/// Format one frame list as `LABEL: [0x1 0x2 ...]`
#[must_use]
pub fn stack_line(label: &str, frames: &[u64]) -> String {
    let addrs: Vec<String> = frames.iter().map(|addr| format!("{addr:#x}")).collect();
    format!("{label}: [{}]", addrs.join(" "))
}

/// Renders samples relative to a boot-time epoch captured at startup
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    boot_time_ns: u64,
    print_stack: bool,
}

impl Renderer {
    #[must_use]
    pub fn new(boot_time_ns: u64, print_stack: bool) -> Self {
        Self { boot_time_ns, print_stack }
    }

    /// Wall-clock nanoseconds for a boot-relative timestamp
    #[must_use]
    pub fn absolute_time_ns(&self, timestamp_ns: u64) -> u64 {
        self.boot_time_ns.saturating_add(timestamp_ns)
    }

    #[must_use]
    pub fn row(&self, sample: &StackSample) -> String {
        format!(
            "{:<20} {:<24} {:<7} {:<7} {:<7} {:<7}",
            self.absolute_time_ns(sample.timestamp_ns),
            sample.comm,
            sample.pid,
            sample.cpu_id,
            sample.kstack_size,
            sample.ustack_size
        )
    }

    /// Write the column header
    ///
    /// # Errors
    /// Propagates write failures of `out`
    pub fn write_header<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", header())
    }

    /// Write the row (and stack lines when enabled) for one sample
    ///
    /// # Errors
    /// Propagates write failures of `out`
    pub fn write_sample<W: Write>(&self, out: &mut W, sample: &StackSample) -> io::Result<()> {
        writeln!(out, "{}", self.row(sample))?;
        if self.print_stack {
            writeln!(out, "{}", stack_line("KStack", sample.kernel_frames()))?;
            writeln!(out, "{}", stack_line("UStack", sample.user_frames()))?;
        }
        Ok(())
    }
}
