//! Error types of the firmware protocol handler.

use thiserror::Error;

use crate::protocol::OperationType;
use crate::protocol::constants::{GB_OP_INVALID, GB_OP_NO_MEMORY};
use crate::store::StoreError;
use crate::transport::TransportError;

/// Broad class of a request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad payload size, out of range request, unknown type, invalid blob.
    MalformedRequest,
    /// No image held, or the image could not be loaded.
    ResourceUnavailable,
    /// Response buffer could not be allocated.
    AllocationFailure,
}

/// Failure of a single request. Never changes the held image except where
/// noted on the variant.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Illegal size of {op} request ({actual} != {expected})")]
    IllegalPayloadSize {
        op: OperationType,
        expected: usize,
        actual: usize,
    },

    #[error("Bad firmware request (offs = {offset}, size = {size}, image = {image_len})")]
    OutOfRange {
        offset: u32,
        size: u32,
        image_len: usize,
    },

    #[error("Unsupported request: 0x{0:02x}")]
    UnsupportedRequest(u8),

    #[error("Firmware not available")]
    NotAvailable,

    /// The image was loaded and then dropped again.
    #[error("Firmware '{name}' is {len} bytes, too large to advertise")]
    ImageTooLarge { name: String, len: usize },

    #[error("Failed to download firmware: {0}")]
    Load(#[from] StoreError),

    /// On the size path the freshly loaded image has already been released.
    #[error("Error allocating response of {size} bytes")]
    OutOfMemory { size: usize },

    #[error("Bootrom reported an invalid firmware blob")]
    InvalidBlob,

    #[error("Insecure firmware rejected by boot policy")]
    InsecureRejected,
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::NotAvailable | HandlerError::Load(_) => ErrorKind::ResourceUnavailable,
            HandlerError::OutOfMemory { .. } => ErrorKind::AllocationFailure,
            HandlerError::IllegalPayloadSize { .. }
            | HandlerError::OutOfRange { .. }
            | HandlerError::UnsupportedRequest(_)
            | HandlerError::ImageTooLarge { .. }
            | HandlerError::InvalidBlob
            | HandlerError::InsecureRejected => ErrorKind::MalformedRequest,
        }
    }

    /// Greybus result code sent back to the bootrom.
    pub fn result_code(&self) -> u8 {
        match self {
            HandlerError::Load(e) => e.result_code(),
            HandlerError::OutOfMemory { .. } => GB_OP_NO_MEMORY,
            _ => GB_OP_INVALID,
        }
    }
}

/// Connection setup failure.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Failed to send AP_READY: {0}")]
    Handshake(#[source] TransportError),
}
