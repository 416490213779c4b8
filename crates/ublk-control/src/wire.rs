//! Control-channel opcodes and payload layouts. These mirror the
//! kernel's `ublksrv_ctrl_cmd` / `ublksrv_ctrl_dev_info` / `ublk_params`
//! structures closely enough to submit directly as a `UringCmd80`
//! payload; field names follow the kernel's own naming so a reader who
//! knows the ublk ABI recognizes them immediately.

pub const CTRL_PATH: &str = "/dev/ublk-control";
pub const CDEV_PATH_PREFIX: &str = "/dev/ublkc";
pub const BDEV_PATH_PREFIX: &str = "/dev/ublkb";

/// Control command opcodes, issued as the `cmd_op` of a `UringCmd80` SQE
/// against the fixed-registered control device.
pub mod ctrl_op {
    pub const GET_QUEUE_AFFINITY: u32 = 1;
    pub const GET_DEV_INFO: u32 = 2;
    pub const ADD_DEV: u32 = 4;
    pub const DEL_DEV: u32 = 5;
    pub const START_DEV: u32 = 6;
    pub const STOP_DEV: u32 = 7;
    pub const SET_PARAMS: u32 = 8;
    pub const GET_PARAMS: u32 = 9;
}

pub const NEW_DEV_ID: i32 = -1;

/// Device liveness as reported by `GET_DEV_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Dead,
    Live,
}

impl TryFrom<u16> for DeviceState {
    type Error = u16;

    fn try_from(v: u16) -> Result<Self, u16> {
        match v {
            0 => Ok(DeviceState::Dead),
            1 => Ok(DeviceState::Live),
            other => Err(other),
        }
    }
}

/// Negotiable device flags carried in `ublksrv_ctrl_dev_info.flags`.
pub mod dev_flags {
    pub const NEED_GET_DATA: u64 = 1 << 2;
    pub const USER_RECOVERY: u64 = 1 << 3;
}

/// The 80-byte `ADD_DEV` / `GET_DEV_INFO` payload: device identity and
/// negotiated queue geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DevInfo {
    pub nr_hw_queues: u16,
    pub queue_depth: u16,
    pub state: u16,
    pub pad: u16,
    pub max_io_buf_bytes: u32,
    pub dev_id: u32,
    pub ublksrv_pid: i32,
    pub flags: u64,
}

/// Device parameters negotiated via `SET_PARAMS` / `GET_PARAMS`: the
/// subset this project needs (basic geometry + discard alignment).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DevParams {
    pub logical_bs_shift: u8,
    pub physical_bs_shift: u8,
    pub io_opt_shift: u8,
    pub io_min_shift: u8,
    pub max_sectors: u32,
    pub dev_sectors: u64,
    pub discard_alignment: u32,
    pub discard_granularity: u32,
    pub max_discard_sectors: u32,
}

impl DevParams {
    pub fn basic(dev_bytes: u64) -> Self {
        DevParams {
            logical_bs_shift: 9,
            physical_bs_shift: 12,
            io_opt_shift: 12,
            io_min_shift: 9,
            max_sectors: 1024,
            dev_sectors: dev_bytes / ublk_core::descriptor::SECTOR_SIZE,
            discard_alignment: 4096,
            discard_granularity: 4096,
            max_discard_sectors: u32::MAX,
        }
    }
}
