//! The Queue Runner: priming, the main loop, and the fetch/commit
//! completion handlers that drive one queue's tags through the backend.
//!
//! Exactly one `QueueRunner` exists per queue and it never leaves the
//! thread that primed it — the kernel binds "queue daemon" identity
//! to that thread, and moving would silently desynchronize the kernel's
//! idea of who owns the queue from reality.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, trace, warn};

use ublk_core::backend::{result_to_wire, Backend};
use ublk_core::command::{cmd_op, IoCommand};
use ublk_core::descriptor::{op, IoDescriptor};
use ublk_core::error::Result;
use ublk_core::state::{TagTable, Transition};

use crate::buffer_pool::BufferPool;
use crate::descriptor_map::DescriptorMap;
use crate::ring::Ring;
use crate::stats::QueueStats;
use crate::userdata::{decode, RingOp};

pub struct QueueRunner<B: Backend> {
    ring: Ring,
    desc_map: DescriptorMap,
    buffers: BufferPool,
    tags: TagTable,
    qid: u16,
    backend: Arc<B>,
    shutdown: Arc<AtomicBool>,
    stats: QueueStats,
}

impl<B: Backend> QueueRunner<B> {
    pub fn new(
        qid: u16,
        ring: Ring,
        desc_map: DescriptorMap,
        buffers: BufferPool,
        backend: Arc<B>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let queue_depth = desc_map.queue_depth() as usize;
        QueueRunner {
            ring,
            desc_map,
            buffers,
            tags: TagTable::new(queue_depth),
            qid,
            backend,
            shutdown,
            stats: QueueStats::default(),
        }
    }

    pub fn stats(&self) -> crate::stats::QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Submit one FETCH_REQ per tag and flush once. Must run to
    /// completion before `START_DEV` is issued — priming on the wrong
    /// thread is exactly the mistake the pinned-thread rule warns about,
    /// so this consumes `self` by `&mut` on the thread that will also
    /// run the main loop.
    pub fn prime(&mut self) -> Result<()> {
        let queue_depth = self.tags.len();
        for tag in 0..queue_depth as u16 {
            let cmd = IoCommand::fetch(self.qid, tag, self.buffers.addr(tag));
            self.ring.prepare_uring_cmd(
                RingOp::Fetch,
                self.qid,
                tag,
                cmd_op::FETCH_REQ as u32,
                pad80(cmd.to_bytes()),
            )?;
        }
        self.ring.flush_submissions()?;
        debug!("qid {} primed {} tags", self.qid, queue_depth);
        Ok(())
    }

    /// The main loop: one blocking wait per iteration, draining every
    /// completion the kernel handed back in that wake, then a single
    /// submit for the whole resulting batch of commit SQEs. Processing
    /// N completions from one wake must cost one `io_uring_enter` submit
    /// call, not N — that batching is the entire point of re-arming via
    /// commit-and-fetch instead of a separate fetch per request. Runs
    /// until every tag has gone Dead, which happens once
    /// `request_shutdown` has been called and the kernel starts failing
    /// re-armed fetches for a stopping device.
    pub fn run(&mut self) -> Result<()> {
        let mut batch = Vec::new();
        loop {
            if self.shutdown.load(Ordering::Acquire) && self.tags.all_dead() {
                debug!("qid {} drained, exiting main loop", self.qid);
                return Ok(());
            }
            batch.clear();
            self.ring.wait_completions(1, &mut batch)?;

            let mut prepared_any = false;
            for cqe in &batch {
                let user_data = cqe.user_data();
                let res = cqe.result();
                match decode(user_data) {
                    Some((RingOp::Fetch, qid, tag)) if qid == self.qid => {
                        prepared_any |= self.handle_fetch_completion(tag, res)?;
                    }
                    Some((RingOp::CommitAndFetch, qid, tag)) if qid == self.qid => {
                        prepared_any |= self.handle_commit_completion(tag, res)?;
                    }
                    Some((RingOp::TargetIo, _, _)) => {
                        // This runner never submits target I/O through the
                        // same ring (the Backend trait does its own I/O off
                        // this thread's critical path); a completion here
                        // would mean a future backend grew uring-based I/O
                        // without updating this match.
                        warn!("qid {} unexpected target-io completion", self.qid);
                    }
                    _ => {
                        warn!("qid {} cqe with unrecognized user_data {:#x}", self.qid, user_data);
                    }
                }
            }

            if prepared_any {
                self.ring.flush_submissions()?;
            }
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Returns whether a new SQE was prepared for this tag (and so needs
    /// a flush once the batch is done).
    fn handle_fetch_completion(&mut self, tag: u16, res: i32) -> Result<bool> {
        self.advance(tag, res, true)
    }

    fn handle_commit_completion(&mut self, tag: u16, res: i32) -> Result<bool> {
        self.advance(tag, res, false)
    }

    /// Shared body of both completion handlers: a fetch completion and a
    /// commit-and-fetch completion with a piggybacked request both
    /// deliver a fresh descriptor and land the tag in `Owned` (the
    /// transition table has them converge there), differing only in
    /// which prior state is valid. A commit-and-fetch completion with
    /// `res > 0` carries no request yet (rearm-idle): there is nothing
    /// to service and no new SQE to prepare, so the tag goes back to
    /// `InFlightFetch` instead.
    fn advance(&mut self, tag: u16, res: i32, first: bool) -> Result<bool> {
        if res < 0 {
            // The kernel aborted this command, most likely because the
            // device is stopping: stop re-arming this tag.
            trace!("qid {} tag {} aborted with res {}", self.qid, tag, res);
            self.tags.kill(tag);
            return Ok(false);
        }

        if !first && res > 0 {
            trace!("qid {} tag {} rearmed idle, no request yet", self.qid, tag);
            if self.tags.on_commit_rearmed_idle(tag) == Transition::Rejected {
                error!("qid {} tag {} illegal transition, killing tag", self.qid, tag);
                self.tags.kill(tag);
            }
            return Ok(false);
        }

        let applied = if first {
            self.tags.on_fetch_completed(tag)
        } else {
            self.tags.on_commit_completed(tag)
        };
        if applied == Transition::Rejected {
            error!("qid {} tag {} illegal transition, killing tag", self.qid, tag);
            self.tags.kill(tag);
            return Ok(false);
        }

        let desc = self.desc_map.read(tag);
        let result = self.service(tag, &desc);

        if self.shutdown.load(Ordering::Acquire) {
            // Still honor the protocol contract (every Owned tag must be
            // re-armed or the kernel considers the queue wedged), but we
            // expect the next completion to come back aborted.
            trace!("qid {} tag {} servicing during drain", self.qid, tag);
        }

        let cmd = IoCommand::commit_and_fetch(self.qid, tag, result, self.buffers.addr(tag));
        self.ring.prepare_uring_cmd(
            RingOp::CommitAndFetch,
            self.qid,
            tag,
            cmd_op::COMMIT_AND_FETCH_REQ as u32,
            pad80(cmd.to_bytes()),
        )?;
        self.tags.on_commit_submitted(tag);
        self.stats.record_commit();
        Ok(true)
    }

    /// Dispatch one descriptor to the backend and return the wire-format
    /// result (nr_bytes on success, -errno on failure) for the next
    /// commit command.
    fn service(&mut self, tag: u16, desc: &IoDescriptor) -> i32 {
        if let Err(e) = self.buffers.check_fits(desc) {
            error!("qid {} tag {} {}", self.qid, tag, e);
            self.stats.record_request(0, false);
            return result_to_wire(Err(std::io::Error::from_raw_os_error(libc::EINVAL)));
        }

        let offset = desc.byte_offset();
        let len = desc.byte_len() as usize;
        let fua = desc.is_fua();

        let outcome = match desc.op() {
            op::READ => {
                let buf = self.buffers.buffer_mut(tag);
                self.backend.read_at(offset, &mut buf[..len])
            }
            op::WRITE => {
                let result = {
                    let buf = self.buffers.buffer(tag);
                    self.backend.write_at(offset, &buf[..len])
                };
                if result.is_ok() && fua {
                    self.backend.sync().and(result)
                } else {
                    result
                }
            }
            op::FLUSH => self.backend.flush().map(|_| 0),
            op::DISCARD => self.backend.discard(offset, desc.byte_len()).map(|_| 0),
            op::WRITE_ZEROES => {
                let result = self.backend.write_zeroes(offset, desc.byte_len());
                if result.is_ok() && fua {
                    self.backend.sync().and(result)
                } else {
                    result
                }
                .map(|_| 0)
            }
            unknown => {
                warn!("qid {} tag {} unknown opcode {}", self.qid, tag, unknown);
                Err(std::io::Error::from_raw_os_error(libc::EOPNOTSUPP))
            }
        };

        self.stats.record_request(len as u64, outcome.is_ok());
        result_to_wire(outcome)
    }
}

fn pad80(cmd16: [u8; 16]) -> [u8; 80] {
    let mut out = [0u8; 80];
    out[..16].copy_from_slice(&cmd16);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    struct NullBackend {
        data: Mutex<Vec<u8>>,
        fail_next: Mutex<bool>,
    }

    impl Backend for NullBackend {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.data.lock().unwrap();
            let start = offset as usize;
            let n = buf.len().min(data.len().saturating_sub(start));
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }

        fn write_at(&self, _offset: u64, buf: &[u8]) -> io::Result<usize> {
            if *self.fail_next.lock().unwrap() {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            Ok(buf.len())
        }

        fn size(&self) -> u64 {
            self.data.lock().unwrap().len() as u64
        }

        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn pad80_preserves_first_16_bytes_and_zeroes_rest() {
        let cmd = IoCommand::fetch(1, 2, 0x1000).to_bytes();
        let padded = pad80(cmd);
        assert_eq!(&padded[..16], &cmd[..]);
        assert!(padded[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn backend_error_maps_to_negative_errno() {
        let backend = NullBackend { data: Mutex::new(vec![0; 4096]), fail_next: Mutex::new(true) };
        let result = backend.write_at(0, &[1, 2, 3]);
        assert_eq!(ublk_core::backend::result_to_wire(result), -libc::EIO);
    }
}
