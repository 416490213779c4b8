//! The I/O Command: the 16-byte payload the Queue Runner writes back into
//! a `UringCmd16`/`UringCmd80` SQE to fetch, commit, or commit-and-fetch
//! a tag.

/// Command opcodes issued on the per-queue data channel.
pub mod cmd_op {
    pub const FETCH_REQ: u8 = 0;
    pub const COMMIT_AND_FETCH_REQ: u8 = 1;
    pub const NEED_GET_DATA: u8 = 2;
}

/// 16 bytes, `repr(C)`, matching the kernel's `ublksrv_io_cmd` layout:
/// `qid(2) + tag(2) + result(4) + buffer_addr(8)`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCommand {
    pub qid: u16,
    pub tag: u16,
    /// Negative errno on failure, nr_bytes transferred on success. Ignored
    /// for a plain fetch (no prior I/O to report on).
    pub result: i32,
    pub buffer_addr: u64,
}

const _: () = assert!(std::mem::size_of::<IoCommand>() == 16);

impl IoCommand {
    pub fn fetch(qid: u16, tag: u16, buffer_addr: u64) -> Self {
        IoCommand { qid, tag, result: 0, buffer_addr }
    }

    pub fn commit_and_fetch(qid: u16, tag: u16, result: i32, buffer_addr: u64) -> Self {
        IoCommand { qid, tag, result, buffer_addr }
    }

    /// Serialize into the fixed-size byte array the `io-uring` crate's
    /// `UringCmd16`/`UringCmd80` builders expect as command payload. A
    /// 16-byte command occupies only the first 16 bytes of an 80-byte
    /// UringCmd80 payload; callers pad the remainder with zero.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..2].copy_from_slice(&self.qid.to_le_bytes());
        out[2..4].copy_from_slice(&self.tag.to_le_bytes());
        out[4..8].copy_from_slice(&self.result.to_le_bytes());
        out[8..16].copy_from_slice(&self.buffer_addr.to_le_bytes());
        out
    }

    pub fn from_bytes(b: &[u8; 16]) -> Self {
        IoCommand {
            qid: u16::from_le_bytes([b[0], b[1]]),
            tag: u16::from_le_bytes([b[2], b[3]]),
            result: i32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            buffer_addr: u64::from_le_bytes([
                b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15],
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let cmd = IoCommand::commit_and_fetch(3, 7, -5, 0xdead_beef_0000);
        let back = IoCommand::from_bytes(&cmd.to_bytes());
        assert_eq!(back, cmd);
    }

    #[test]
    fn fetch_carries_zero_result() {
        let cmd = IoCommand::fetch(1, 2, 0x1000);
        assert_eq!(cmd.result, 0);
        assert_eq!(IoCommand::from_bytes(&cmd.to_bytes()), cmd);
    }

    #[test]
    fn command_is_16_bytes() {
        assert_eq!(std::mem::size_of::<IoCommand>(), 16);
    }
}
