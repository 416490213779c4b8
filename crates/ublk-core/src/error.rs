//! Hand-rolled error type for the data plane, in the shape of the
//! teacher's `ksvc-core::error::KsvcError`: a plain enum carrying raw
//! errno / context, manual `Display`, no wrapping crate.

use std::fmt;

#[derive(Debug)]
pub enum UblkError {
    /// The submission ring had no free slots for a `prepare_uring_cmd`.
    RingFull,
    /// `io_uring_setup` (or the crate's `IoUring::builder().build()`)
    /// failed with this errno.
    IoUringSetup(i32),
    /// `io_uring_enter` (submit) failed with this errno.
    IoUringSubmit(i32),
    /// `mmap` of the Descriptor Map or a data buffer failed with this
    /// errno.
    MmapFailed(i32),
    /// An ioctl on the control device failed with this errno.
    IoctlFailed(i32),
    /// A backend operation failed; `errno` is the raw OS error if one was
    /// available, 0 otherwise.
    Backend { op: &'static str, errno: i32 },
    /// An illegal tag-state transition was attempted; the tag has been
    /// marked Dead.
    InvariantViolation(&'static str),
    /// A generic OS-level failure not covered by a more specific variant.
    Os(i32),
}

impl fmt::Display for UblkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UblkError::RingFull => write!(f, "submission ring is full"),
            UblkError::IoUringSetup(errno) => write!(f, "io_uring setup failed: errno {errno}"),
            UblkError::IoUringSubmit(errno) => write!(f, "io_uring submit failed: errno {errno}"),
            UblkError::MmapFailed(errno) => write!(f, "mmap failed: errno {errno}"),
            UblkError::IoctlFailed(errno) => write!(f, "ioctl failed: errno {errno}"),
            UblkError::Backend { op, errno } => write!(f, "backend {op} failed: errno {errno}"),
            UblkError::InvariantViolation(what) => write!(f, "tag state invariant violated: {what}"),
            UblkError::Os(errno) => write!(f, "os error: errno {errno}"),
        }
    }
}

impl std::error::Error for UblkError {}

pub type Result<T> = std::result::Result<T, UblkError>;

impl UblkError {
    pub fn from_io(op: &'static str, err: &std::io::Error) -> Self {
        UblkError::Backend { op, errno: err.raw_os_error().unwrap_or(0) }
    }
}
