//! Typed views over operation types, boot stages and boot status codes.
//!
//! The wire carries raw `u8` values; these types give them names for
//! logging and matching without losing unknown values.

use std::fmt;

use super::constants::*;

/// Firmware protocol operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    FirmwareSize,
    GetFirmware,
    ReadyToBoot,
    ApReady,
    GetVidPid,
    /// Any type not defined by the firmware protocol.
    Unknown(u8),
}

impl OperationType {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            GB_FIRMWARE_TYPE_FIRMWARE_SIZE => Self::FirmwareSize,
            GB_FIRMWARE_TYPE_GET_FIRMWARE => Self::GetFirmware,
            GB_FIRMWARE_TYPE_READY_TO_BOOT => Self::ReadyToBoot,
            GB_FIRMWARE_TYPE_AP_READY => Self::ApReady,
            GB_FIRMWARE_TYPE_GET_VID_PID => Self::GetVidPid,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::FirmwareSize => GB_FIRMWARE_TYPE_FIRMWARE_SIZE,
            Self::GetFirmware => GB_FIRMWARE_TYPE_GET_FIRMWARE,
            Self::ReadyToBoot => GB_FIRMWARE_TYPE_READY_TO_BOOT,
            Self::ApReady => GB_FIRMWARE_TYPE_AP_READY,
            Self::GetVidPid => GB_FIRMWARE_TYPE_GET_VID_PID,
            Self::Unknown(v) => *v,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::FirmwareSize => write!(f, "FIRMWARE_SIZE"),
            OperationType::GetFirmware => write!(f, "GET_FIRMWARE"),
            OperationType::ReadyToBoot => write!(f, "READY_TO_BOOT"),
            OperationType::ApReady => write!(f, "AP_READY"),
            OperationType::GetVidPid => write!(f, "GET_VID_PID"),
            OperationType::Unknown(v) => write!(f, "UNKNOWN(0x{:02x})", v),
        }
    }
}

/// Status reported by the bootrom in a ready-to-boot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    Invalid,
    Insecure,
    Secure,
    Other(u8),
}

impl BootStatus {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            GB_FIRMWARE_BOOT_STATUS_INVALID => Self::Invalid,
            GB_FIRMWARE_BOOT_STATUS_INSECURE => Self::Insecure,
            GB_FIRMWARE_BOOT_STATUS_SECURE => Self::Secure,
            other => Self::Other(other),
        }
    }

    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::Invalid => GB_FIRMWARE_BOOT_STATUS_INVALID,
            Self::Insecure => GB_FIRMWARE_BOOT_STATUS_INSECURE,
            Self::Secure => GB_FIRMWARE_BOOT_STATUS_SECURE,
            Self::Other(v) => *v,
        }
    }
}

impl fmt::Display for BootStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootStatus::Invalid => write!(f, "INVALID"),
            BootStatus::Insecure => write!(f, "INSECURE"),
            BootStatus::Secure => write!(f, "SECURE"),
            BootStatus::Other(v) => write!(f, "0x{:02x}", v),
        }
    }
}

/// Human readable name of an operation result code.
pub fn result_name(result: u8) -> &'static str {
    match result {
        GB_OP_SUCCESS => "success",
        GB_OP_INTERRUPTED => "interrupted",
        GB_OP_TIMEOUT => "timeout",
        GB_OP_NO_MEMORY => "no memory",
        GB_OP_PROTOCOL_BAD => "protocol not supported",
        GB_OP_OVERFLOW => "overflow",
        GB_OP_INVALID => "invalid",
        GB_OP_RETRY => "retry",
        GB_OP_NONEXISTENT => "nonexistent",
        GB_OP_MALFUNCTION => "malfunction",
        _ => "unknown error",
    }
}
