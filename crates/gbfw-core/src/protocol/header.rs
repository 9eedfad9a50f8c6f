//! Wire structures for the Greybus operation header and firmware payloads.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{GB_MESSAGE_TYPE_RESPONSE, GB_OPERATION_HEADER_SIZE};

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Illegal payload size: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Message size field {size} outside [{min}, {max}]")]
    BadMessageSize { size: usize, min: usize, max: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn expect_exact(data: &[u8], expected: usize) -> Result<(), HeaderError> {
    if data.len() != expected {
        return Err(HeaderError::SizeMismatch {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Greybus operation message header (8 bytes).
///
/// `size` covers the header and the payload. Responses carry the request
/// type with [`GB_MESSAGE_TYPE_RESPONSE`] set and a result code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct OperationHeader {
    pub size: u16,
    pub operation_id: u16,
    pub op_type: u8,
    pub result: u8,
    pub pad: [u8; 2],
}

impl OperationHeader {
    pub const SIZE: usize = GB_OPERATION_HEADER_SIZE;

    /// Header for a request of `op_type` carrying `payload_len` bytes.
    pub fn request(operation_id: u16, op_type: u8, payload_len: usize) -> Self {
        Self {
            size: (Self::SIZE + payload_len) as u16,
            operation_id,
            op_type,
            result: 0,
            pad: [0; 2],
        }
    }

    /// Header for the response to `request`.
    pub fn response_to(request: &OperationHeader, result: u8, payload_len: usize) -> Self {
        Self {
            size: (Self::SIZE + payload_len) as u16,
            operation_id: request.operation_id,
            op_type: request.op_type | GB_MESSAGE_TYPE_RESPONSE,
            result,
            pad: request.pad,
        }
    }

    pub fn is_response(&self) -> bool {
        self.op_type & GB_MESSAGE_TYPE_RESPONSE != 0
    }

    /// Request type with the response bit cleared.
    pub fn base_type(&self) -> u8 {
        self.op_type & !GB_MESSAGE_TYPE_RESPONSE
    }

    /// Unidirectional requests (operation id 0) expect no response.
    pub fn is_unidirectional(&self) -> bool {
        self.operation_id == 0
    }

    pub fn payload_size(&self) -> usize {
        (self.size as usize).saturating_sub(Self::SIZE)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u16(&mut buf[0..2], self.size);
        LittleEndian::write_u16(&mut buf[2..4], self.operation_id);
        buf[4] = self.op_type;
        buf[5] = self.result;
        buf[6..8].copy_from_slice(&self.pad);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            size: cursor.read_u16::<LittleEndian>()?,
            operation_id: cursor.read_u16::<LittleEndian>()?,
            op_type: cursor.read_u8()?,
            result: cursor.read_u8()?,
            pad: [cursor.read_u8()?, cursor.read_u8()?],
        })
    }

    /// Check the `size` field against the received buffer and the link limit.
    pub fn validate_size(&self, received: usize, max_message: usize) -> Result<(), HeaderError> {
        let size = self.size as usize;
        if size < Self::SIZE || size > max_message {
            return Err(HeaderError::BadMessageSize {
                size,
                min: Self::SIZE,
                max: max_message,
            });
        }
        if received < size {
            return Err(HeaderError::BufferTooSmall {
                expected: size,
                actual: received,
            });
        }
        Ok(())
    }
}

/// Firmware size request: the boot stage being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRequest {
    pub stage: u8,
}

impl SizeRequest {
    pub const SIZE: usize = 1;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        expect_exact(data, Self::SIZE)?;
        Ok(Self { stage: data[0] })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.stage]
    }
}

/// Firmware size response: image length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeResponse {
    pub size: u32,
}

impl SizeResponse {
    pub const SIZE: usize = 4;

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[..Self::SIZE], self.size);
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        expect_exact(data, Self::SIZE)?;
        Ok(Self {
            size: LittleEndian::read_u32(data),
        })
    }
}

/// Get firmware request: byte range of the held image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetFirmwareRequest {
    pub offset: u32,
    pub size: u32,
}

impl GetFirmwareRequest {
    pub const SIZE: usize = 8;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        expect_exact(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            offset: cursor.read_u32::<LittleEndian>()?,
            size: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.offset);
        LittleEndian::write_u32(&mut buf[4..8], self.size);
        buf
    }
}

/// Ready to boot request: validation status of the downloaded blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyToBootRequest {
    pub status: u8,
}

impl ReadyToBootRequest {
    pub const SIZE: usize = 1;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        expect_exact(data, Self::SIZE)?;
        Ok(Self { status: data[0] })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.status]
    }
}

/// Get VID/PID response sent by the module bootrom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetVidPidResponse {
    pub vendor_id: u32,
    pub product_id: u32,
}

impl GetVidPidResponse {
    pub const SIZE: usize = 8;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        expect_exact(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            vendor_id: cursor.read_u32::<LittleEndian>()?,
            product_id: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.vendor_id);
        LittleEndian::write_u32(&mut buf[4..8], self.product_id);
        buf
    }
}
