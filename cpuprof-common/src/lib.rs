//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the stack-trace record written by the kernel-side collector and
//! the names both halves agree on. The record uses `#[repr(C)]` so its layout
//! is identical on both sides of the ring buffer.
//!
//! ## Wire Layout (little-endian, 2088 bytes)
//!
//! | offset | field          | type          |
//! |--------|----------------|---------------|
//! | 0      | `pid`          | `u32`         |
//! | 4      | `cpu_id`       | `u32`         |
//! | 8      | `timestamp_ns` | `u64`         |
//! | 16     | `comm`         | `[u8; 16]`    |
//! | 32     | `kstack_size`  | `i32`         |
//! | 36     | `ustack_size`  | `i32`         |
//! | 40     | `kstack`       | `[u64; 128]`  |
//! | 1064   | `ustack`       | `[u64; 128]`  |

#![no_std]

// ============================================================================
// Names shared with userspace
// ============================================================================

/// Name of the `#[perf_event]` program in the collector object
pub const PROGRAM_NAME: &str = "profile_cpu";

/// Name of the ring buffer map carrying [`StackTraceEvent`] records
pub const EVENTS_MAP: &str = "EVENTS";

/// Default bpffs directory the `EVENTS` map is pinned under
pub const DEFAULT_PIN_PATH: &str = "/sys/fs/bpf";

/// Size of the `EVENTS` ring buffer in bytes (must be a power of two multiple of the page size)
pub const RING_BUF_BYTES: u32 = 16 * 1024 * 1024;

// ============================================================================
// Record layout
// ============================================================================

/// Maximum number of frames captured per stack (kernel and user each)
///
/// Also used as `sample_max_stack` when opening the perf counters.
pub const MAX_STACK_DEPTH: usize = 128;

/// Length of the kernel's `comm` field (`TASK_COMM_LEN`)
pub const TASK_COMM_LEN: usize = 16;

/// Size in bytes of one encoded [`StackTraceEvent`]
pub const EVENT_SIZE: usize = core::mem::size_of::<StackTraceEvent>();

/// Byte offset of `comm` within the record
pub const COMM_OFFSET: usize = 16;

/// Byte offset of `kstack_size` within the record
pub const KSTACK_SIZE_OFFSET: usize = COMM_OFFSET + TASK_COMM_LEN;

/// Byte offset of the kernel frame array within the record
pub const KSTACK_OFFSET: usize = KSTACK_SIZE_OFFSET + 8;

/// Byte offset of the user frame array within the record
pub const USTACK_OFFSET: usize = KSTACK_OFFSET + MAX_STACK_DEPTH * 8;

/// One profiling sample as written into the `EVENTS` ring buffer
///
/// Too large for the BPF stack (512 bytes): the collector fills it in place
/// inside a ring buffer reservation.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StackTraceEvent {
    /// Process ID (TGID in Linux terms)
    pub pid: u32,

    /// CPU the sample was taken on
    pub cpu_id: u32,

    /// `bpf_ktime_get_ns()` at sample time: nanoseconds since boot
    pub timestamp_ns: u64,

    /// Task command name, NUL padded
    pub comm: [u8; TASK_COMM_LEN],

    /// Number of captured kernel frames
    ///
    /// Written by the producer and not trusted by userspace, which clamps
    /// it to [`MAX_STACK_DEPTH`].
    pub kstack_size: i32,

    /// Number of captured user frames (same caveat as `kstack_size`)
    pub ustack_size: i32,

    /// Kernel frame addresses, innermost first
    pub kstack: [u64; MAX_STACK_DEPTH],

    /// User frame addresses, innermost first
    pub ustack: [u64; MAX_STACK_DEPTH],
}

const _: () = assert!(EVENT_SIZE == 2088);
const _: () = assert!(USTACK_OFFSET + MAX_STACK_DEPTH * 8 == EVENT_SIZE);
