//! Protocol constants for the Greybus firmware protocol.
//!
//! Values match the Greybus protocol headers shipped with the Ara bootrom.

// ============================================================================
// Protocol Identification
// ============================================================================

/// Greybus protocol id of the firmware protocol.
pub const GREYBUS_PROTOCOL_FIRMWARE: u8 = 0x15;

pub const GB_FIRMWARE_VERSION_MAJOR: u8 = 0x00;
pub const GB_FIRMWARE_VERSION_MINOR: u8 = 0x01;

// ============================================================================
// Operation Types
// ============================================================================

/// Firmware size request (module -> AP).
pub const GB_FIRMWARE_TYPE_FIRMWARE_SIZE: u8 = 0x02;

/// Get firmware chunk request (module -> AP).
pub const GB_FIRMWARE_TYPE_GET_FIRMWARE: u8 = 0x03;

/// Ready to boot report (module -> AP).
pub const GB_FIRMWARE_TYPE_READY_TO_BOOT: u8 = 0x04;

/// AP ready handshake (AP -> module), request with no payload.
pub const GB_FIRMWARE_TYPE_AP_READY: u8 = 0x05;

/// Get VID/PID request (AP -> module), request with no payload.
pub const GB_FIRMWARE_TYPE_GET_VID_PID: u8 = 0x06;

/// Bit set in the type field of every response message.
pub const GB_MESSAGE_TYPE_RESPONSE: u8 = 0x80;

// ============================================================================
// Boot Stages
// ============================================================================

pub const GB_FIRMWARE_BOOT_STAGE_ONE: u8 = 0x01;
pub const GB_FIRMWARE_BOOT_STAGE_TWO: u8 = 0x02;
pub const GB_FIRMWARE_BOOT_STAGE_THREE: u8 = 0x03;

// ============================================================================
// Ready To Boot Status
// ============================================================================

/// Firmware blob could not be validated.
pub const GB_FIRMWARE_BOOT_STATUS_INVALID: u8 = 0x00;

/// Firmware blob is valid but unsigned or signed with an untrusted key.
pub const GB_FIRMWARE_BOOT_STATUS_INSECURE: u8 = 0x01;

/// Firmware blob is valid and its signature verified.
pub const GB_FIRMWARE_BOOT_STATUS_SECURE: u8 = 0x02;

// ============================================================================
// Operation Results
// ============================================================================

pub const GB_OP_SUCCESS: u8 = 0x00;
pub const GB_OP_INTERRUPTED: u8 = 0x01;
pub const GB_OP_TIMEOUT: u8 = 0x02;
pub const GB_OP_NO_MEMORY: u8 = 0x03;
pub const GB_OP_PROTOCOL_BAD: u8 = 0x04;
pub const GB_OP_OVERFLOW: u8 = 0x05;
pub const GB_OP_INVALID: u8 = 0x06;
pub const GB_OP_RETRY: u8 = 0x07;
pub const GB_OP_NONEXISTENT: u8 = 0x08;
pub const GB_OP_UNKNOWN_ERROR: u8 = 0xFE;
pub const GB_OP_MALFUNCTION: u8 = 0xFF;

// ============================================================================
// Bridge Identification
// ============================================================================

/// DDBL1 manufacturer id reported by the ES2 bridge ASIC (Toshiba).
pub const ES2_DDBL1_MFR_ID: u32 = 0x0000_0126;

/// DDBL1 product id reported by the ES2 bridge ASIC.
pub const ES2_DDBL1_PROD_ID: u32 = 0x0000_1000;

/// USB vendor id of the ES2 bridge when attached to the AP.
pub const ES2_USB_VENDOR_ID: u16 = 0x18D1;

/// USB product id of the ES2 bridge when attached to the AP.
pub const ES2_USB_PRODUCT_ID: u16 = 0x1EAF;

// ============================================================================
// Size Constants
// ============================================================================

/// Size of the Greybus operation message header.
pub const GB_OPERATION_HEADER_SIZE: usize = 8;

/// Largest message (header included) the ES2 bridge can carry.
pub const ES2_GBUF_MSG_SIZE_MAX: usize = 2048;

/// Largest payload an operation message can carry over ES2.
pub const GB_OPERATION_PAYLOAD_SIZE_MAX: usize = ES2_GBUF_MSG_SIZE_MAX - GB_OPERATION_HEADER_SIZE;

/// Greybus default operation timeout.
pub const GB_OPERATION_TIMEOUT_DEFAULT_MS: u64 = 1000;

/// Default firmware search directory.
pub const DEFAULT_FIRMWARE_DIR: &str = "/lib/firmware";
