//! Protocol module - Greybus firmware protocol definitions.

pub mod constants;
pub mod header;
pub mod operation;

pub use constants::*;
pub use header::{
    GetFirmwareRequest, GetVidPidResponse, HeaderError, OperationHeader, ReadyToBootRequest,
    SizeRequest, SizeResponse,
};
pub use operation::{BootStatus, OperationType, result_name};
