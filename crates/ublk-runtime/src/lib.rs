//! The ublk data plane: the io_uring Ring, the mmap'd Descriptor Map,
//! the per-tag Buffer Pool, and the Queue Runner that ties them together
//! with a pluggable `Backend`.
//!
//! Everything here assumes it owns its queue's dedicated OS thread for
//! the queue's entire lifetime; nothing in this crate is meant to
//! be shared across threads beyond the `Arc<dyn Backend>` each runner
//! dispatches into.

pub mod buffer_pool;
pub mod descriptor_map;
pub mod queue_runner;
pub mod ring;
pub mod stats;
pub mod userdata;

pub use buffer_pool::{BufferPool, DEFAULT_BUFFER_SIZE};
pub use descriptor_map::DescriptorMap;
pub use queue_runner::QueueRunner;
pub use ring::Ring;
pub use stats::{QueueStats, QueueStatsSnapshot};
