//! The per-queue io_uring instance and its `URING_CMD` plumbing.
//!
//! One `Ring` is owned by exactly one queue thread for that queue's
//! entire lifetime — nothing here is `Sync`, and nothing needs to be.

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use std::os::unix::io::RawFd;

use ublk_core::error::{Result, UblkError};

use crate::userdata::{encode, RingOp};

/// SQEs carry an 80-byte `URING_CMD` payload (`IORING_SETUP_SQE128`);
/// CQEs are the wide 32-byte variant so `io_uring_cqe` can report the
/// the target-I/O `res`/`flags` pair the kernel fills in for commands.
pub type SubmissionEntry = squeue::Entry128;
pub type CompletionEntry = cqueue::Entry32;

pub struct Ring {
    io: IoUring<SubmissionEntry, CompletionEntry>,
    fd: RawFd,
}

impl Ring {
    /// Build a ring sized for `queue_depth` fetch/commit commands plus
    /// headroom for target I/O submitted directly against `fd` (the
    /// queue's `/dev/ublkcN` fixed file).
    pub fn new(queue_depth: u32, fd: RawFd) -> Result<Self> {
        let entries = queue_depth.next_power_of_two().max(32);
        let io = IoUring::<SubmissionEntry, CompletionEntry>::builder()
            .setup_sqe128()
            .setup_cqe32()
            .build(entries)
            .map_err(|e| UblkError::IoUringSetup(e.raw_os_error().unwrap_or(0)))?;
        io.submitter()
            .register_files(&[fd])
            .map_err(|e| UblkError::IoUringSetup(e.raw_os_error().unwrap_or(0)))?;
        Ok(Ring { io, fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Push one `URING_CMD` SQE (FETCH_REQ / COMMIT_AND_FETCH_REQ) onto
    /// the local submission queue without syscalling. Returns
    /// `Err(RingFull)` if there's no slot, so the caller can decide
    /// whether to flush and retry or back off; the retry-on-signal
    /// behavior lives in `flush_submissions`, not here.
    ///
    /// # Safety
    ///
    /// `cmd_bytes` must remain valid until the kernel observes the SQE —
    /// for a fixed 80-byte inline payload this is always true since the
    /// bytes are copied into the SQE itself by `.cmd()`.
    pub fn prepare_uring_cmd(
        &mut self,
        op: RingOp,
        qid: u16,
        tag: u16,
        cmd_op: u32,
        cmd_bytes: [u8; 80],
    ) -> Result<()> {
        let sqe = opcode::UringCmd80::new(types::Fixed(0), cmd_op)
            .cmd(cmd_bytes)
            .build()
            .user_data(encode(op, qid, tag));

        // SAFETY: `sqe` is a self-contained 128-byte value with no
        // external buffer references; the builder copies `cmd_bytes` in.
        unsafe {
            self.io
                .submission()
                .push(&sqe)
                .map_err(|_| UblkError::RingFull)
        }
    }

    /// Publish every SQE prepared since the last flush and make the
    /// `io_uring_enter` submit syscall. Retries once on `EINTR`, per the
    /// signal-interrupt-retry design note — a single retry is sufficient
    /// because a second signal during the retry window is vanishingly
    /// unlikely and, if it happens, surfaces as a normal `IoUringSubmit`
    /// error to the caller instead of looping forever.
    pub fn flush_submissions(&mut self) -> Result<usize> {
        // `sq.sync()` runs inside `submit()`, publishing the tail with
        // the same release ordering the kernel's SQ consumer expects;
        // SQE field writes above are visible before that store lands.
        match self.io.submit() {
            Ok(n) => Ok(n),
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => self
                .io
                .submit()
                .map_err(|e| UblkError::IoUringSubmit(e.raw_os_error().unwrap_or(0))),
            Err(e) => Err(UblkError::IoUringSubmit(e.raw_os_error().unwrap_or(0))),
        }
    }

    /// Block until at least `want` completions are available, submitting
    /// any pending SQEs first, then drain the *entire* completion queue
    /// into `out` — not just `want` entries. This is the one blocking
    /// point of the main loop body, and draining everything the kernel
    /// handed back in a single wake (rather than one CQE at a time) is
    /// what lets the caller batch every resulting commit into one
    /// `flush_submissions` call instead of one per completion. Returns
    /// the number of completions appended.
    pub fn wait_completions(&mut self, want: usize, out: &mut Vec<CompletionEntry>) -> Result<usize> {
        match self.io.submit_and_wait(want) {
            Ok(_) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => {
                self.io
                    .submit_and_wait(want)
                    .map_err(|e| UblkError::IoUringSubmit(e.raw_os_error().unwrap_or(0)))?;
            }
            Err(e) => return Err(UblkError::IoUringSubmit(e.raw_os_error().unwrap_or(0))),
        }
        let before = out.len();
        let cq = self.io.completion();
        out.extend(cq);
        Ok(out.len() - before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_entries_round_up_to_power_of_two() {
        // next_power_of_two(33) == 64, exercised indirectly through
        // construction in integration tests that need a real /dev/ublkc
        // fixed file; this unit test only pins the arithmetic.
        assert_eq!(33u32.next_power_of_two(), 64);
        assert_eq!(32u32.next_power_of_two().max(32), 32);
    }
}
