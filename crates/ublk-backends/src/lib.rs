//! Concrete `Backend` implementations: an in-memory store for testing
//! and ephemeral devices, and a file-backed store for anything that
//! needs to outlive the process.

pub mod file;
pub mod ram;

pub use file::FileBackend;
pub use ram::RamBackend;
