//! # eBPF Program Loading
//!
//! Loads the compiled collector object, prepares its `perf_event` program
//! for attachment and hands out the `EVENTS` ring buffer.
//!
//! ## Functions
//!
//! - [`raise_memlock_rlimit()`] - Lift `RLIMIT_MEMLOCK` for pre-5.11 kernels
//! - [`load_collector()`] - Load the object, pinning maps under a bpffs directory
//! - [`load_profile_program()`] - Verify/load `profile_cpu`, return its handle
//! - [`take_events_ring_buf()`] - Move the `EVENTS` map out of the object

#![allow(unsafe_code)] // setrlimit() requires unsafe

use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;

use aya::{
    maps::{MapData, RingBuf},
    programs::PerfEvent,
    Ebpf, EbpfLoader,
};
use aya_log::EbpfLogger;
use cpuprof_common::{EVENTS_MAP, PROGRAM_NAME};
use log::{debug, info, warn};

use crate::domain::ProfilerError;
use crate::profiling::ProgramHandle;

/// Remove the locked memory limit
///
/// Kernels before 5.11 charge BPF maps against `RLIMIT_MEMLOCK`.
///
/// # Errors
/// Returns [`ProfilerError::MemlockLimit`] if `setrlimit` fails
pub fn raise_memlock_rlimit() -> Result<(), ProfilerError> {
    debug!("Setting RLIMIT_MEMLOCK to infinity");
    let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
        return Err(ProfilerError::MemlockLimit(io::Error::last_os_error()));
    }
    Ok(())
}

/// Load the collector object from disk
///
/// With `pin_path`, maps declared as pinned (the `EVENTS` ring buffer) are
/// pinned there, or reused if a previous run left them pinned.
///
/// # Errors
/// Returns [`ProfilerError::EbpfLoadFailed`] if the object cannot be loaded
pub fn load_collector(object: &Path, pin_path: Option<&Path>) -> Result<Ebpf, ProfilerError> {
    info!("Loading collector object {}", object.display());

    let mut loader = EbpfLoader::new();
    if let Some(dir) = pin_path {
        debug!("Pinning maps under {}", dir.display());
        loader.map_pin_path(dir);
    }

    loader
        .load_file(object)
        .map_err(|source| ProfilerError::EbpfLoadFailed { path: object.to_path_buf(), source })
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Load the `profile_cpu` program into the kernel
///
/// The returned handle stays valid as long as `bpf` is alive.
///
/// # Errors
/// Returns an error if the program is missing, of the wrong type, or
/// rejected by the verifier
pub fn load_profile_program(bpf: &mut Ebpf) -> Result<ProgramHandle, ProfilerError> {
    let program: &mut PerfEvent = bpf
        .program_mut(PROGRAM_NAME)
        .ok_or(ProfilerError::ProgramNotFound(PROGRAM_NAME))?
        .try_into()?;
    program.load()?;

    let fd = program.fd()?.as_fd().as_raw_fd();
    info!("✓ Loaded perf_event program: {PROGRAM_NAME}");
    Ok(ProgramHandle::from_raw_fd(fd))
}

/// Take ownership of the `EVENTS` ring buffer
///
/// # Errors
/// Returns an error if the map is missing or is not a ring buffer
pub fn take_events_ring_buf(bpf: &mut Ebpf) -> Result<RingBuf<MapData>, ProfilerError> {
    let map = bpf.take_map(EVENTS_MAP).ok_or(ProfilerError::MapNotFound(EVENTS_MAP))?;
    Ok(RingBuf::try_from(map)?)
}
