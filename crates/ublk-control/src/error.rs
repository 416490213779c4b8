//! Structured control-plane error, `thiserror`-based: this crate follows
//! the real upstream ublk client's error shape rather than the hand-rolled
//! style of the data-plane crate, since a control command failure always
//! carries a specific, nameable cause worth matching on at the call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UblkError {
    #[error("failed to open {0}: {1}")]
    Open(&'static str, #[source] std::io::Error),

    #[error("io_uring setup failed: {0}")]
    UringSetup(#[source] std::io::Error),

    #[error("control command {0:#x} submission failed: {1}")]
    Submission(u32, #[source] std::io::Error),

    #[error("control command {op:#x} returned {res}")]
    CommandFailed { op: u32, res: i32 },

    #[error("device is not in the expected state for this operation: {0}")]
    WrongState(&'static str),

    #[error("json (de)serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("runtime error: {0}")]
    Runtime(#[from] ublk_core::error::UblkError),
}

pub type Result<T> = std::result::Result<T, UblkError>;
