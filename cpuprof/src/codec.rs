//! # Stack Trace Record Codec
//!
//! Decodes the fixed little-endian records written by the collector into
//! [`StackSample`]s. See `cpuprof_common` for the layout table.
//!
//! The frame counts inside a record come from the producer and are not
//! trusted: they are stored as reported and clamped by every accessor.

use cpuprof_common::{
    COMM_OFFSET, EVENT_SIZE, KSTACK_OFFSET, KSTACK_SIZE_OFFSET, MAX_STACK_DEPTH, TASK_COMM_LEN,
    USTACK_OFFSET,
};

use crate::domain::CodecError;

/// Fixed frame array, one per stack side
pub type Frames = Box<[u64; MAX_STACK_DEPTH]>;

/// One decoded profiling sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSample {
    pub pid: u32,
    pub cpu_id: u32,
    /// Nanoseconds since boot (`bpf_ktime_get_ns`)
    pub timestamp_ns: u64,
    /// Command name with trailing NUL bytes removed
    pub comm: String,
    /// Kernel frame count as reported by the producer (may exceed capacity)
    pub kstack_size: i32,
    /// User frame count as reported by the producer (may exceed capacity)
    pub ustack_size: i32,
    pub kstack: Frames,
    pub ustack: Frames,
}

impl StackSample {
    /// Kernel frames, clamped to the fixed capacity
    #[must_use]
    pub fn kernel_frames(&self) -> &[u64] {
        &self.kstack[..clamp_frame_count(self.kstack_size)]
    }

    /// User frames, clamped to the fixed capacity
    #[must_use]
    pub fn user_frames(&self) -> &[u64] {
        &self.ustack[..clamp_frame_count(self.ustack_size)]
    }
}

/// Number of frames that may be read for a reported count
///
/// Negative counts yield zero, counts over [`MAX_STACK_DEPTH`] are capped.
#[must_use]
pub fn clamp_frame_count(reported: i32) -> usize {
    usize::try_from(reported).map_or(0, |n| n.min(MAX_STACK_DEPTH))
}

/// Decode one raw ring buffer record
///
/// Records longer than [`EVENT_SIZE`] are accepted (ring buffer entries are
/// padded to 8 bytes); the trailing bytes are ignored.
///
/// # Errors
/// Returns [`CodecError::Truncated`] if `raw` is shorter than [`EVENT_SIZE`]
pub fn decode(raw: &[u8]) -> Result<StackSample, CodecError> {
    if raw.len() < EVENT_SIZE {
        return Err(CodecError::Truncated { expected: EVENT_SIZE, actual: raw.len() });
    }

    let comm: [u8; TASK_COMM_LEN] = array_at(raw, COMM_OFFSET);

    Ok(StackSample {
        pid: u32::from_le_bytes(array_at(raw, 0)),
        cpu_id: u32::from_le_bytes(array_at(raw, 4)),
        timestamp_ns: u64::from_le_bytes(array_at(raw, 8)),
        comm: trim_comm(&comm),
        kstack_size: i32::from_le_bytes(array_at(raw, KSTACK_SIZE_OFFSET)),
        ustack_size: i32::from_le_bytes(array_at(raw, KSTACK_SIZE_OFFSET + 4)),
        kstack: read_frames(raw, KSTACK_OFFSET),
        ustack: read_frames(raw, USTACK_OFFSET),
    })
}

/// Encode a sample into the collector's record layout
///
/// The command name is truncated to 16 bytes. Used to replay or synthesize
/// records.
#[must_use]
pub fn encode(sample: &StackSample) -> Vec<u8> {
    let mut raw = Vec::with_capacity(EVENT_SIZE);
    raw.extend_from_slice(&sample.pid.to_le_bytes());
    raw.extend_from_slice(&sample.cpu_id.to_le_bytes());
    raw.extend_from_slice(&sample.timestamp_ns.to_le_bytes());

    let mut comm = [0u8; TASK_COMM_LEN];
    let name = sample.comm.as_bytes();
    let len = name.len().min(TASK_COMM_LEN);
    comm[..len].copy_from_slice(&name[..len]);
    raw.extend_from_slice(&comm);

    raw.extend_from_slice(&sample.kstack_size.to_le_bytes());
    raw.extend_from_slice(&sample.ustack_size.to_le_bytes());
    for frame in sample.kstack.iter().chain(sample.ustack.iter()) {
        raw.extend_from_slice(&frame.to_le_bytes());
    }

    debug_assert_eq!(raw.len(), EVENT_SIZE);
    raw
}

// Callers have checked that `raw` covers `offset + N`.
fn array_at<const N: usize>(raw: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&raw[offset..offset + N]);
    buf
}

fn read_frames(raw: &[u8], offset: usize) -> Frames {
    let mut frames = Box::new([0u64; MAX_STACK_DEPTH]);
    let bytes = &raw[offset..offset + MAX_STACK_DEPTH * 8];
    for (slot, chunk) in frames.iter_mut().zip(bytes.chunks_exact(8)) {
        *slot = u64::from_le_bytes(array_at(chunk, 0));
    }
    frames
}

fn trim_comm(comm: &[u8]) -> String {
    let end = comm.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&comm[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kstack_size: i32, ustack_size: i32) -> StackSample {
        let mut kstack = Box::new([0u64; MAX_STACK_DEPTH]);
        let mut ustack = Box::new([0u64; MAX_STACK_DEPTH]);
        for (i, (k, u)) in kstack.iter_mut().zip(ustack.iter_mut()).enumerate() {
            *k = 0xffff_ffff_8100_0000 + i as u64;
            *u = 0x5555_5555_0000 + i as u64;
        }
        StackSample {
            pid: 4242,
            cpu_id: 3,
            timestamp_ns: 123_456_789_012,
            comm: "stress-ng".to_string(),
            kstack_size,
            ustack_size,
            kstack,
            ustack,
        }
    }

    #[test]
    fn test_decode_known_fields() {
        let original = sample(5, 2);
        let decoded = decode(&encode(&original)).unwrap();

        assert_eq!(decoded.pid, 4242);
        assert_eq!(decoded.cpu_id, 3);
        assert_eq!(decoded.timestamp_ns, 123_456_789_012);
        assert_eq!(decoded.comm, "stress-ng");
        assert_eq!(decoded.kstack_size, 5);
        assert_eq!(decoded.ustack_size, 2);
        assert_eq!(decoded.kernel_frames(), original.kernel_frames());
        assert_eq!(decoded.user_frames(), &original.ustack[..2]);
    }

    #[test]
    fn test_decode_field_offsets() {
        let mut raw = vec![0u8; EVENT_SIZE];
        raw[0..4].copy_from_slice(&7u32.to_le_bytes());
        raw[4..8].copy_from_slice(&1u32.to_le_bytes());
        raw[8..16].copy_from_slice(&99u64.to_le_bytes());
        raw[16..20].copy_from_slice(b"bash");
        raw[32..36].copy_from_slice(&1i32.to_le_bytes());
        raw[36..40].copy_from_slice(&1i32.to_le_bytes());
        raw[40..48].copy_from_slice(&0xdead_u64.to_le_bytes());
        raw[1064..1072].copy_from_slice(&0xbeef_u64.to_le_bytes());

        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.pid, 7);
        assert_eq!(decoded.cpu_id, 1);
        assert_eq!(decoded.timestamp_ns, 99);
        assert_eq!(decoded.comm, "bash");
        assert_eq!(decoded.kernel_frames(), &[0xdead]);
        assert_eq!(decoded.user_frames(), &[0xbeef]);
    }

    #[test]
    fn test_decode_rejects_short_record() {
        let raw = vec![0u8; EVENT_SIZE - 1];
        assert_eq!(
            decode(&raw),
            Err(CodecError::Truncated { expected: EVENT_SIZE, actual: EVENT_SIZE - 1 })
        );
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_decode_accepts_padded_record() {
        let mut raw = encode(&sample(1, 1));
        raw.extend_from_slice(&[0xaa; 8]);
        assert_eq!(decode(&raw).unwrap().pid, 4242);
    }

    #[test]
    fn test_oversized_counts_are_clamped() {
        let decoded = decode(&encode(&sample(1000, i32::MAX))).unwrap();
        assert_eq!(decoded.kstack_size, 1000);
        assert_eq!(decoded.kernel_frames().len(), MAX_STACK_DEPTH);
        assert_eq!(decoded.user_frames().len(), MAX_STACK_DEPTH);
    }

    #[test]
    fn test_negative_counts_yield_no_frames() {
        let decoded = decode(&encode(&sample(-14, -1))).unwrap();
        assert!(decoded.kernel_frames().is_empty());
        assert!(decoded.user_frames().is_empty());
    }

    #[test]
    fn test_comm_keeps_interior_bytes() {
        let mut raw = vec![0u8; EVENT_SIZE];
        raw[16..16 + 16].copy_from_slice(b"kworker/0:1\0\0\0\0\0");
        assert_eq!(decode(&raw).unwrap().comm, "kworker/0:1");

        raw[16..16 + 16].copy_from_slice(b"sixteen-bytes-xx");
        assert_eq!(decode(&raw).unwrap().comm, "sixteen-bytes-xx");
    }
}
