//! Platform-agnostic types for a ublk userspace block-device server:
//! the wire layout of the Descriptor Map and I/O Command channel, the
//! per-tag state machine, the pluggable storage `Backend` trait, and the
//! data-plane error type.
//!
//! Nothing in this crate touches a file descriptor, a ring, or an mmap —
//! those live in `ublk-runtime`. Keeping this crate I/O-free lets the
//! wire types and the state machine be unit tested without a kernel.

pub mod backend;
pub mod command;
pub mod descriptor;
pub mod error;
pub mod state;

pub use backend::Backend;
pub use command::{cmd_op, IoCommand};
pub use descriptor::{flags, op, IoDescriptor, SECTOR_SIZE};
pub use error::{Result, UblkError};
pub use state::{TagState, TagTable, Transition};
