//! The control-channel client: `ADD_DEV`, `SET_PARAMS`, `START_DEV`,
//! `STOP_DEV`, `DEL_DEV`, plus the supplemented `GET_DEV_INFO`/
//! `GET_PARAMS` read-back commands.
//!
//! Grounded in the real ublk control client's submission shape: a
//! `UringCmd80` carrying a small fixed header (`dev_id`, `queue_id`,
//! `len`, `addr`) over a registered fixed file, submitted and waited on
//! one at a time — the control path has no concurrency to speak of, so
//! there is no batching here the way the data plane batches fetches.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use log::{debug, trace};

use crate::error::{Result, UblkError};
use crate::wire::{ctrl_op, DevInfo, DevParams, CTRL_PATH};

pub const QUEUE_IGNORE_ID: u16 = u16::MAX;

#[repr(C)]
struct CmdHeader {
    dev_id: i32,
    queue_id: u16,
    len: u16,
    addr: u64,
    data0: u64,
}

const _: () = assert!(std::mem::size_of::<CmdHeader>() <= 80);

fn header_to_bytes(h: &CmdHeader) -> [u8; 80] {
    let mut out = [0u8; 80];
    out[0..4].copy_from_slice(&h.dev_id.to_le_bytes());
    out[4..6].copy_from_slice(&h.queue_id.to_le_bytes());
    out[6..8].copy_from_slice(&h.len.to_le_bytes());
    out[8..16].copy_from_slice(&h.addr.to_le_bytes());
    out[16..24].copy_from_slice(&h.data0.to_le_bytes());
    out
}

pub struct UblkCtrl {
    file: File,
    ring: IoUring<squeue::Entry128, cqueue::Entry32>,
}

impl UblkCtrl {
    pub fn open() -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(CTRL_PATH)
            .map_err(|e| UblkError::Open(CTRL_PATH, e))?;

        let ring = IoUring::<squeue::Entry128, cqueue::Entry32>::builder()
            .setup_sqe128()
            .setup_cqe32()
            .build(16)
            .map_err(UblkError::UringSetup)?;
        ring.submitter()
            .register_files(&[file.as_raw_fd()])
            .map_err(UblkError::UringSetup)?;

        Ok(UblkCtrl { file, ring })
    }

    fn submit(&mut self, op: u32, dev_id: i32, queue_id: u16, addr: u64, len: u16) -> Result<i32> {
        let header = CmdHeader { dev_id, queue_id, len, addr, data0: 0 };
        let sqe = opcode::UringCmd80::new(types::Fixed(0), op)
            .cmd(header_to_bytes(&header))
            .build()
            .user_data(op as u64);

        // SAFETY: the SQE carries no external buffer references; the
        // header bytes are copied in by `.cmd()`.
        unsafe {
            self.ring
                .submission()
                .push(&sqe)
                .map_err(|_| UblkError::Submission(op, std::io::Error::from_raw_os_error(libc::ENOSPC)))?;
        }

        self.ring
            .submit_and_wait(1)
            .map_err(|e| UblkError::Submission(op, e))?;

        let cqe = self
            .ring
            .completion()
            .next()
            .expect("submit_and_wait(1) guarantees a completion");
        let res = cqe.result();
        trace!("ctrl op {:#x} dev_id {} -> {}", op, dev_id, res);

        // A device that was already removed returning EBUSY on a
        // best-effort delete is not a failure worth propagating.
        if res < 0 && !(op == ctrl_op::DEL_DEV && res == -libc::EBUSY) {
            return Err(UblkError::CommandFailed { op, res });
        }
        Ok(res)
    }

    /// Register a new device and return the kernel-assigned `dev_id`.
    pub fn add_dev(&mut self, info: &DevInfo) -> Result<u32> {
        let addr = info as *const DevInfo as u64;
        self.submit(
            ctrl_op::ADD_DEV,
            crate::wire::NEW_DEV_ID,
            QUEUE_IGNORE_ID,
            addr,
            std::mem::size_of::<DevInfo>() as u16,
        )?;
        debug!("added device id {}", info.dev_id);
        Ok(info.dev_id)
    }

    pub fn set_params(&mut self, dev_id: u32, params: &DevParams) -> Result<()> {
        let addr = params as *const DevParams as u64;
        self.submit(
            ctrl_op::SET_PARAMS,
            dev_id as i32,
            QUEUE_IGNORE_ID,
            addr,
            std::mem::size_of::<DevParams>() as u16,
        )?;
        Ok(())
    }

    pub fn get_params(&mut self, dev_id: u32) -> Result<DevParams> {
        let mut params = DevParams::default();
        let addr = &mut params as *mut DevParams as u64;
        self.submit(
            ctrl_op::GET_PARAMS,
            dev_id as i32,
            QUEUE_IGNORE_ID,
            addr,
            std::mem::size_of::<DevParams>() as u16,
        )?;
        Ok(params)
    }

    /// Must not be called until every queue has finished priming — the
    /// caller, not this client, enforces that ordering.
    pub fn start_dev(&mut self, dev_id: u32, ublksrv_pid: i32) -> Result<()> {
        self.submit(ctrl_op::START_DEV, dev_id as i32, QUEUE_IGNORE_ID, ublksrv_pid as u64, 0)?;
        Ok(())
    }

    pub fn stop_dev(&mut self, dev_id: u32) -> Result<()> {
        self.submit(ctrl_op::STOP_DEV, dev_id as i32, QUEUE_IGNORE_ID, 0, 0)?;
        Ok(())
    }

    pub fn del_dev(&mut self, dev_id: u32) -> Result<()> {
        self.submit(ctrl_op::DEL_DEV, dev_id as i32, QUEUE_IGNORE_ID, 0, 0)?;
        Ok(())
    }

    pub fn get_dev_info(&mut self, dev_id: u32) -> Result<DevInfo> {
        let mut info = DevInfo::default();
        info.dev_id = dev_id;
        let addr = &mut info as *mut DevInfo as u64;
        self.submit(
            ctrl_op::GET_DEV_INFO,
            dev_id as i32,
            QUEUE_IGNORE_ID,
            addr,
            std::mem::size_of::<DevInfo>() as u16,
        )?;
        Ok(info)
    }

    pub fn control_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_header_fits_in_80_bytes() {
        assert!(std::mem::size_of::<CmdHeader>() <= 80);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let h = CmdHeader { dev_id: 7, queue_id: QUEUE_IGNORE_ID, len: 42, addr: 0xdead_beef, data0: 0 };
        let bytes = header_to_bytes(&h);
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 7);
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), QUEUE_IGNORE_ID);
        assert_eq!(u16::from_le_bytes(bytes[6..8].try_into().unwrap()), 42);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 0xdead_beef);
    }
}
