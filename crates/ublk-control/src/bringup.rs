//! The Device Bringup Coordinator: the strict ordering that turns
//! an idle control channel into a live `/dev/ublkbN`.
//!
//! ```text
//! 1. ADD_DEV         — allocate dev_id, negotiate queue geometry
//! 2. SET_PARAMS      — publish device parameters
//! 3. open /dev/ublkcN and map each queue's Ring + Descriptor Map
//! 4. spawn one pinned thread per queue
//! 5. each thread primes its queue (fetches for every tag) and blocks
//! 6. START_DEV        — only after every queue has finished priming
//! ```
//!
//! Step 6 must never run before step 5 completes for every queue: the
//! kernel starts delivering block-layer requests the moment `START_DEV`
//! returns, and a queue with no outstanding fetch has nowhere to receive
//! them.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use log::{error, info};
use serde::{Deserialize, Serialize};

use ublk_core::backend::Backend;
use ublk_runtime::{BufferPool, DescriptorMap, QueueRunner, Ring, DEFAULT_BUFFER_SIZE};

use crate::ctrl::UblkCtrl;
use crate::error::{Result, UblkError};
use crate::wire::{DevInfo, DevParams, BDEV_PATH_PREFIX, CDEV_PATH_PREFIX};

/// Device geometry, built with the owned-builder pattern used throughout
/// this project's configuration structs: chained `fn foo(mut self, v) ->
/// Self` setters over a `Default` impl, no derive-heavy builder crate.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub nr_hw_queues: u16,
    pub queue_depth: u16,
    pub buffer_size: usize,
    pub dev_bytes: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            nr_hw_queues: 1,
            queue_depth: 128,
            buffer_size: DEFAULT_BUFFER_SIZE,
            dev_bytes: 0,
        }
    }
}

impl DeviceConfig {
    pub fn nr_hw_queues(mut self, n: u16) -> Self {
        self.nr_hw_queues = n;
        self
    }

    pub fn queue_depth(mut self, n: u16) -> Self {
        self.queue_depth = n;
        self
    }

    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn dev_bytes(mut self, n: u64) -> Self {
        self.dev_bytes = n;
        self
    }
}

/// Operator-facing bookkeeping for a live device, persisted as JSON —
/// not a recovery mechanism, just a way to answer "what's running and
/// where" without re-deriving it from `/proc`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub dev_id: u32,
    pub nr_hw_queues: u16,
    pub queue_depth: u16,
    pub max_io_buf_bytes: u32,
    pub queue_thread_ids: Vec<i32>,
}

impl DeviceRecord {
    pub fn persist(&self, dir: &std::path::Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| UblkError::Open("run dir", e))?;
        let path = dir.join(format!("{}.json", self.dev_id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| UblkError::Open("device record", e))?;
        Ok(())
    }
}

/// A bringup that completed successfully: the live device's id, its
/// queue threads, and the shared shutdown flag `stop` signals.
pub struct RunningDevice {
    pub dev_id: u32,
    pub cdev: File,
    shutdown: Arc<AtomicBool>,
    queue_threads: Vec<JoinHandle<()>>,
    record: DeviceRecord,
}

impl RunningDevice {
    /// Teardown order: `STOP_DEV` first so the kernel stops enqueueing
    /// new requests and starts aborting outstanding fetches, then signal
    /// the queue threads and join them, then `DEL_DEV`.
    pub fn stop(mut self, ctrl: &mut UblkCtrl) -> Result<()> {
        ctrl.stop_dev(self.dev_id)?;
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
        for handle in self.queue_threads.drain(..) {
            if handle.join().is_err() {
                error!("queue thread for device {} panicked", self.dev_id);
            }
        }
        ctrl.del_dev(self.dev_id)?;
        info!("device {} torn down", self.dev_id);
        Ok(())
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }
}

pub struct BringupCoordinator<B: Backend + 'static> {
    config: DeviceConfig,
    backend: Arc<B>,
}

impl<B: Backend + 'static> BringupCoordinator<B> {
    pub fn new(config: DeviceConfig, backend: Arc<B>) -> Self {
        BringupCoordinator { config, backend }
    }

    pub fn bring_up(&self, ctrl: &mut UblkCtrl) -> Result<RunningDevice> {
        // Step 1: ADD_DEV.
        let info = DevInfo {
            nr_hw_queues: self.config.nr_hw_queues,
            queue_depth: self.config.queue_depth,
            max_io_buf_bytes: self.config.buffer_size as u32,
            ..Default::default()
        };
        let dev_id = ctrl.add_dev(&info)?;

        // Step 2: SET_PARAMS.
        ctrl.set_params(dev_id, &DevParams::basic(self.config.dev_bytes))?;

        // Step 3: open the per-device char file every queue mmaps and
        // submits URING_CMDs against.
        let cdev_path = format!("{CDEV_PATH_PREFIX}{dev_id}");
        let cdev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&cdev_path)
            .map_err(|e| UblkError::Open("ublk char device", e))?;
        let cdev_fd = cdev.as_raw_fd();

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<i32>>();
        let mut queue_threads = Vec::with_capacity(self.config.nr_hw_queues as usize);
        let mut queue_thread_ids = Vec::with_capacity(self.config.nr_hw_queues as usize);

        // Steps 4 and 5: one pinned thread per queue, each priming
        // before signaling readiness. The thread that primes a queue is
        // the thread that runs it for the rest of the device's life
        // — it is spawned here and never handed off.
        for qid in 0..self.config.nr_hw_queues {
            let queue_depth = self.config.queue_depth as u32;
            let buffer_size = self.config.buffer_size;
            let backend = Arc::clone(&self.backend);
            let shutdown = Arc::clone(&shutdown);
            let ready_tx = ready_tx.clone();

            let handle = std::thread::Builder::new()
                .name(format!("ublk-q{qid}"))
                .spawn(move || {
                    let setup = (|| -> Result<QueueRunner<B>> {
                        let ring = Ring::new(queue_depth, cdev_fd).map_err(UblkError::Runtime)?;
                        let offset = ublk_runtime::descriptor_map::mmap_offset(qid, queue_depth);
                        let desc_map = DescriptorMap::map(cdev_fd, offset, queue_depth)
                            .map_err(UblkError::Runtime)?;
                        let buffers = BufferPool::new(queue_depth as usize, buffer_size);
                        let mut runner =
                            QueueRunner::new(qid, ring, desc_map, buffers, backend, shutdown);
                        runner.prime().map_err(UblkError::Runtime)?;
                        Ok(runner)
                    })();

                    // The ready signal must be sent in every path,
                    // success or failure: the spawning thread is blocked
                    // on `ready_rx.recv()` until it hears back, and a
                    // setup failure that never sends would deadlock
                    // bringup instead of surfacing as an error.
                    let mut runner = match setup {
                        Ok(runner) => {
                            let tid = unsafe { libc::syscall(libc::SYS_gettid) } as i32;
                            ready_tx.send(Ok(tid)).ok();
                            runner
                        }
                        Err(e) => {
                            error!("queue {} setup failed: {}", qid, e);
                            ready_tx.send(Err(e)).ok();
                            return;
                        }
                    };

                    if let Err(e) = runner.run().map_err(UblkError::Runtime) {
                        error!("queue {} exited with error: {}", qid, e);
                    }
                })
                .expect("failed to spawn queue thread");
            queue_threads.push(handle);

            match ready_rx.recv() {
                Ok(Ok(tid)) => queue_thread_ids.push(tid),
                Ok(Err(e)) => {
                    Self::rollback(ctrl, dev_id, &shutdown, queue_threads);
                    return Err(e);
                }
                Err(_) => {
                    Self::rollback(ctrl, dev_id, &shutdown, queue_threads);
                    return Err(UblkError::WrongState("queue thread exited before priming"));
                }
            }
        }

        // Step 6: only now is every queue guaranteed to have an
        // outstanding fetch per tag.
        let pid = std::process::id() as i32;
        if let Err(e) = ctrl.start_dev(dev_id, pid) {
            Self::rollback(ctrl, dev_id, &shutdown, queue_threads);
            return Err(e);
        }
        info!("device {} started with {} queues", dev_id, self.config.nr_hw_queues);

        let record = DeviceRecord {
            dev_id,
            nr_hw_queues: self.config.nr_hw_queues,
            queue_depth: self.config.queue_depth,
            max_io_buf_bytes: self.config.buffer_size as u32,
            queue_thread_ids,
        };

        Ok(RunningDevice { dev_id, cdev, shutdown, queue_threads, record })
    }

    pub fn bdev_path(dev_id: u32) -> String {
        format!("{BDEV_PATH_PREFIX}{dev_id}")
    }

    /// Undo a partial bringup: signal every queue thread spawned so far,
    /// join them, then delete the device. Called whenever a later step
    /// (a sibling queue's setup, or `START_DEV`) fails after earlier
    /// queues already primed — a half-started device must not be left
    /// registered with the kernel.
    fn rollback(
        ctrl: &mut UblkCtrl,
        dev_id: u32,
        shutdown: &Arc<AtomicBool>,
        queue_threads: Vec<JoinHandle<()>>,
    ) {
        error!("device {} bringup failed, rolling back", dev_id);
        shutdown.store(true, std::sync::atomic::Ordering::Release);
        if let Err(e) = ctrl.stop_dev(dev_id) {
            error!("device {} rollback: stop_dev failed: {}", dev_id, e);
        }
        for handle in queue_threads {
            if handle.join().is_err() {
                error!("device {} rollback: a queue thread panicked", dev_id);
            }
        }
        if let Err(e) = ctrl.del_dev(dev_id) {
            error!("device {} rollback: del_dev failed: {}", dev_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_builder_chains() {
        let cfg = DeviceConfig::default().nr_hw_queues(4).queue_depth(256).buffer_size(8192);
        assert_eq!(cfg.nr_hw_queues, 4);
        assert_eq!(cfg.queue_depth, 256);
        assert_eq!(cfg.buffer_size, 8192);
    }

    #[test]
    fn bdev_path_uses_dev_id() {
        assert_eq!(BringupCoordinator::<ublk_backends_stub::Stub>::bdev_path(3), "/dev/ublkb3");
    }

    mod ublk_backends_stub {
        use std::io;
        pub struct Stub;
        impl ublk_core::backend::Backend for Stub {
            fn read_at(&self, _: u64, _: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn write_at(&self, _: u64, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn size(&self) -> u64 {
                0
            }
            fn flush(&self) -> io::Result<()> {
                Ok(())
            }
        }
    }
}
