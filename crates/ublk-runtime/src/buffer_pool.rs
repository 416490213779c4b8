//! Per-tag I/O buffers. Each tag in a queue owns one fixed-size
//! buffer for its entire lifetime; the kernel is told its address once,
//! at priming, and never again, so the buffer must not move.
//!
//! Default size is 64 KiB per tag, matching the kernel's own default
//! max-segment-size; a descriptor whose `byte_len()` exceeds the pool's
//! buffer size is clamped and split is *not* performed — the oversize
//! request is rejected with an error rather than silently truncated,
//! since silently truncating a write would corrupt data.

use ublk_core::descriptor::IoDescriptor;
use ublk_core::error::{Result, UblkError};

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

pub struct BufferPool {
    buffers: Vec<Box<[u8]>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(queue_depth: usize, buffer_size: usize) -> Self {
        let buffers = (0..queue_depth)
            .map(|_| vec![0u8; buffer_size].into_boxed_slice())
            .collect();
        BufferPool { buffers, buffer_size }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn buffer_mut(&mut self, tag: u16) -> &mut [u8] {
        &mut self.buffers[tag as usize]
    }

    pub fn buffer(&self, tag: u16) -> &[u8] {
        &self.buffers[tag as usize]
    }

    /// The raw address the kernel should DMA into/out of for `tag`. This
    /// is the address handed back in the I/O Command's `buffer_addr`
    /// field at fetch and commit-and-fetch time.
    pub fn addr(&self, tag: u16) -> u64 {
        self.buffers[tag as usize].as_ptr() as u64
    }

    /// Validate that `desc`'s request fits in this tag's buffer.
    /// Oversize requests are a hard error, not a truncation: the
    /// clamp policy caps what a single descriptor may ask for at
    /// `buffer_size`, and anything larger indicates a negotiation
    /// mismatch between the kernel's advertised max I/O size and this
    /// pool's buffer size.
    pub fn check_fits(&self, desc: &IoDescriptor) -> Result<usize> {
        let len = desc.byte_len() as usize;
        if len > self.buffer_size {
            return Err(UblkError::InvariantViolation(
                "descriptor byte_len exceeds per-tag buffer size",
            ));
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ublk_core::descriptor::op;

    #[test]
    fn buffers_are_independently_addressed() {
        let pool = BufferPool::new(4, DEFAULT_BUFFER_SIZE);
        let addrs: Vec<u64> = (0..4).map(|t| pool.addr(t)).collect();
        let mut sorted = addrs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), addrs.len());
    }

    #[test]
    fn oversize_descriptor_is_rejected_not_truncated() {
        let pool = BufferPool::new(1, 4096);
        let desc = IoDescriptor {
            op_flags: op::READ as u32,
            nr_sectors: (8192 / ublk_core::descriptor::SECTOR_SIZE) as u32,
            start_sector: 0,
            addr: 0,
        };
        assert!(pool.check_fits(&desc).is_err());
    }

    #[test]
    fn in_bounds_descriptor_is_accepted() {
        let pool = BufferPool::new(1, 4096);
        let desc = IoDescriptor {
            op_flags: op::WRITE as u32,
            nr_sectors: (4096 / ublk_core::descriptor::SECTOR_SIZE) as u32,
            start_sector: 1,
            addr: 0,
        };
        assert_eq!(pool.check_fits(&desc).unwrap(), 4096);
    }
}
