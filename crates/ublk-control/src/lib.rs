//! The ublk control plane: wire types for the kernel control channel,
//! the `UblkCtrl` client, and the Device Bringup Coordinator that
//! sequences control commands against queue-thread lifecycle.

pub mod bringup;
pub mod ctrl;
pub mod error;
pub mod wire;

pub use bringup::{BringupCoordinator, DeviceConfig, DeviceRecord, RunningDevice};
pub use ctrl::UblkCtrl;
pub use error::{Result, UblkError};
