//! The kernel-writable, userspace-readable I/O descriptor.
//!
//! One descriptor lives per tag in the mmap'd Descriptor Map (see
//! `ublk_runtime::descriptor_map`). This module only defines the wire
//! layout and the accessors a reader needs; it has no I/O of its own.

/// Bytes per disk sector. All sector-denominated fields use this unit.
pub const SECTOR_SIZE: u64 = 512;

/// Operation codes carried in the low 8 bits of [`IoDescriptor::op_flags`].
pub mod op {
    pub const READ: u8 = 0;
    pub const WRITE: u8 = 1;
    pub const FLUSH: u8 = 2;
    pub const DISCARD: u8 = 3;
    pub const WRITE_ZEROES: u8 = 4;
}

/// Flag bits, stored above the low 8 opcode bits of [`IoDescriptor::op_flags`].
pub mod flags {
    /// Force-Unit-Access: the backend must durably commit the write before
    /// the commit SQE for this tag is prepared.
    pub const FUA: u32 = 1 << 8;
}

const OP_MASK: u32 = 0x0000_00ff;

/// A single incoming block-layer request, as written by the kernel into
/// the Descriptor Map at offset `tag * size_of::<IoDescriptor>()`.
///
/// 24 bytes, little-endian, `repr(C)` to match the kernel's layout exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoDescriptor {
    pub op_flags: u32,
    pub nr_sectors: u32,
    pub start_sector: u64,
    pub addr: u64,
}

const _: () = assert!(std::mem::size_of::<IoDescriptor>() == 24);

impl IoDescriptor {
    /// Decode the low 8 bits of `op_flags` as the operation code.
    #[inline]
    pub fn op(&self) -> u8 {
        (self.op_flags & OP_MASK) as u8
    }

    /// Whether the FUA flag is set.
    #[inline]
    pub fn is_fua(&self) -> bool {
        self.op_flags & flags::FUA != 0
    }

    /// Byte offset of the request: `start_sector * SECTOR_SIZE`.
    #[inline]
    pub fn byte_offset(&self) -> u64 {
        self.start_sector * SECTOR_SIZE
    }

    /// Byte length of the request: `nr_sectors * SECTOR_SIZE`.
    #[inline]
    pub fn byte_len(&self) -> u64 {
        self.nr_sectors as u64 * SECTOR_SIZE
    }

    /// Read this descriptor out of a raw byte slice at the given tag's
    /// offset, with acquire ordering on the preceding fetch completion
    /// already established by the caller (see `ublk_runtime::ring`).
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live, at-least-24-byte-long mapping that the
    /// kernel has written for this tag, and the caller must have already
    /// observed the fetch/commit CQE that makes this write visible.
    #[inline]
    pub unsafe fn read_from(ptr: *const u8) -> Self {
        // A volatile read ties this load to the preceding CQE observation:
        // the compiler cannot hoist it above the acquire that produced
        // `ptr`'s validity, and cannot elide it as dead.
        std::ptr::read_volatile(ptr as *const IoDescriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_and_flags_share_one_word() {
        let d = IoDescriptor {
            op_flags: op::WRITE as u32 | flags::FUA,
            nr_sectors: 8,
            start_sector: 16,
            addr: 0,
        };
        assert_eq!(d.op(), op::WRITE);
        assert!(d.is_fua());
        assert_eq!(d.byte_offset(), 16 * SECTOR_SIZE);
        assert_eq!(d.byte_len(), 8 * SECTOR_SIZE);
    }

    #[test]
    fn descriptor_is_24_bytes() {
        assert_eq!(std::mem::size_of::<IoDescriptor>(), 24);
    }
}
