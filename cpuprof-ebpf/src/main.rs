//! # eBPF Kernel-Side Collector
//!
//! A single `perf_event` program invoked on every counter overflow. It
//! captures the running task's identity and both call stacks and hands them
//! to userspace through the `EVENTS` ring buffer.
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (16MB), pinned so it can be shared across runs
//!
//! ## Build
//!
//! Always compiled in release mode (debug includes incompatible formatting code):
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    bindings::BPF_F_USER_STACK,
    helpers::{
        bpf_get_current_comm,
        gen::{bpf_get_smp_processor_id, bpf_get_stack},
        bpf_ktime_get_ns,
    },
    macros::{map, perf_event},
    maps::RingBuf,
    programs::PerfEventContext,
    EbpfContext,
};
use aya_log_ebpf::debug;
use cpuprof_common::{StackTraceEvent, MAX_STACK_DEPTH, RING_BUF_BYTES, TASK_COMM_LEN};

/// Size in bytes handed to `bpf_get_stack` for one frame array
const STACK_BYTES: u32 = (MAX_STACK_DEPTH * core::mem::size_of::<u64>()) as u32;

/// Ring buffer carrying one `StackTraceEvent` per sample
///
/// Pinned by name under the loader's pin path (`/sys/fs/bpf/EVENTS` by default).
#[map]
static EVENTS: RingBuf = RingBuf::pinned(RING_BUF_BYTES, 0);

/// CPU sampling hook, attached by userspace to one counter per CPU
#[perf_event]
pub fn profile_cpu(ctx: PerfEventContext) -> u32 {
    match try_profile_cpu(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_profile_cpu(ctx: &PerfEventContext) -> Result<(), i64> {
    // The record is ~2KB, far over the BPF stack limit: fill it in place.
    let Some(mut entry) = EVENTS.reserve::<StackTraceEvent>(0) else {
        debug!(ctx, "EVENTS ring buffer full, dropping sample");
        return Err(1);
    };

    let event = entry.as_mut_ptr();
    unsafe {
        (*event).pid = ctx.tgid();
        (*event).cpu_id = bpf_get_smp_processor_id();
        (*event).timestamp_ns = bpf_ktime_get_ns();
        (*event).comm = bpf_get_current_comm().unwrap_or([0u8; TASK_COMM_LEN]);
        (*event).kstack_size =
            capture_stack(ctx, core::ptr::addr_of_mut!((*event).kstack).cast(), 0);
        (*event).ustack_size = capture_stack(
            ctx,
            core::ptr::addr_of_mut!((*event).ustack).cast(),
            BPF_F_USER_STACK as u64,
        );
    }

    entry.submit(0);
    Ok(())
}

/// Walk one stack into `frames`, returning the number of frames written
///
/// Helper errors are reported as an empty stack.
unsafe fn capture_stack(ctx: &PerfEventContext, frames: *mut u64, flags: u64) -> i32 {
    let written = bpf_get_stack(ctx.as_ptr(), frames.cast(), STACK_BYTES, flags);
    if written < 0 {
        0
    } else {
        (written / 8) as i32
    }
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
