//! The mmap'd, kernel-written array of `IoDescriptor`s for one queue.
//! Userspace never writes through this mapping; the kernel
//! writes a descriptor before completing the corresponding fetch or
//! commit-and-fetch SQE, and that completion is the acquire edge that
//! makes the write visible here.

use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use ublk_core::descriptor::IoDescriptor;
use ublk_core::error::{Result, UblkError};

fn page_size() -> u64 {
    // SAFETY: sysconf(_SC_PAGESIZE) takes no pointer arguments and always
    // returns a positive value on a sane system.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
}

fn round_up(val: u64, align: u64) -> u64 {
    (val + align - 1) & !(align - 1)
}

/// `mmap` offset for queue `qid`'s descriptor array, per the kernel's
/// `UBLKSRV_CMD_BUF_OFFSET` convention: each queue gets its own window on
/// `/dev/ublkcN`, one page-aligned stride per queue. The kernel maps each
/// queue's window independently, so a stride that isn't a multiple of the
/// page size lands queue 1's (and later) offset mid-page and `mmap` fails
/// with `EINVAL`.
pub fn mmap_offset(qid: u16, max_queue_depth: u32) -> u64 {
    const UBLKSRV_CMD_BUF_OFFSET: u64 = 0x8000_0000;
    let desc_size = std::mem::size_of::<IoDescriptor>() as u64;
    let stride = round_up((max_queue_depth as u64) * desc_size, page_size());
    UBLKSRV_CMD_BUF_OFFSET + (qid as u64) * stride
}

pub struct DescriptorMap {
    ptr: NonNull<u8>,
    len: usize,
    queue_depth: u32,
}

// The mapping is read-only and only ever read after an acquire-visible
// kernel write; sharing `&DescriptorMap` across threads is safe, but
// this project never does (one Ring, one DescriptorMap, one thread).
unsafe impl Send for DescriptorMap {}

impl DescriptorMap {
    /// Map `queue_depth` descriptors worth of space at `offset` into
    /// `fd` (the queue's `/dev/ublkcN` file descriptor).
    pub fn map(fd: RawFd, offset: u64, queue_depth: u32) -> Result<Self> {
        let raw_len = queue_depth as u64 * std::mem::size_of::<IoDescriptor>() as u64;
        let len = round_up(raw_len, page_size()) as usize;
        let len_nz = std::num::NonZeroUsize::new(len)
            .ok_or(UblkError::InvariantViolation("zero-length descriptor map"))?;
        // SAFETY: `fd` is a live, open ublk char-device fd; `len` and
        // `offset` are computed from the kernel's own documented layout.
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let ptr = unsafe {
            mmap(
                None,
                len_nz,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                borrowed,
                offset as libc::off_t,
            )
        }
        .map_err(|e| UblkError::MmapFailed(e as i32))?;

        Ok(DescriptorMap {
            ptr: NonNull::new(ptr.as_ptr() as *mut u8).expect("mmap returned null on success"),
            len,
            queue_depth,
        })
    }

    pub fn queue_depth(&self) -> u32 {
        self.queue_depth
    }

    /// Read the descriptor for `tag`. The caller must already have
    /// observed the CQE that makes the kernel's write visible — this
    /// method performs the volatile read but not the synchronization.
    pub fn read(&self, tag: u16) -> IoDescriptor {
        debug_assert!((tag as u32) < self.queue_depth);
        let offset = tag as usize * std::mem::size_of::<IoDescriptor>();
        debug_assert!(offset + std::mem::size_of::<IoDescriptor>() <= self.len);
        // SAFETY: offset is within the mapped region by the assertions
        // above, and the mapping lives as long as `self`.
        unsafe { IoDescriptor::read_from(self.ptr.as_ptr().add(offset)) }
    }
}

impl Drop for DescriptorMap {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe exactly the mapping created in
        // `map`, never resized or partially unmapped elsewhere.
        unsafe {
            let _ = munmap(self.ptr.cast(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_do_not_overlap_across_queues() {
        let depth = 128;
        let off0 = mmap_offset(0, depth);
        let off1 = mmap_offset(1, depth);
        assert!(off1 >= off0 + depth as u64 * std::mem::size_of::<IoDescriptor>() as u64);
    }

    #[test]
    fn per_queue_stride_is_page_aligned() {
        // depth 128 * 24 bytes = 3072, not a multiple of any real page
        // size; every queue's offset must still land on a page boundary
        // or mmap rejects it with EINVAL for qid >= 1.
        let depth = 128;
        let stride = mmap_offset(1, depth) - mmap_offset(0, depth);
        let pg = page_size();
        assert_eq!(stride % pg, 0);
        assert!(stride >= depth as u64 * std::mem::size_of::<IoDescriptor>() as u64);
    }

    #[test]
    fn round_up_is_identity_on_aligned_input() {
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
        assert_eq!(round_up(1, 4096), 4096);
    }
}
