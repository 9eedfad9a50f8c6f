//! Greybus connection abstraction.
//!
//! Defines the `Connection` trait for a single Greybus connection (CPort),
//! allowing different implementations (ES2 over nusb, mock, etc.).

use crate::protocol::{HeaderError, OperationHeader};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation 0x{op_type:02x} failed with result 0x{result:02x}")]
    OperationFailed { op_type: u8, result: u8 },

    #[error("Payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    Header(#[from] HeaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request received from the remote end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub header: OperationHeader,
    pub payload: Vec<u8>,
}

impl IncomingRequest {
    pub fn op_type(&self) -> u8 {
        self.header.op_type
    }
}

/// Abstract Greybus connection interface.
///
/// This trait enables:
/// - Production implementation over the ES2 USB bridge
/// - Mock implementation for unit testing
///
/// Implementations serialize requests per connection: at most one incoming
/// request is handed out until its response has been sent.
pub trait Connection: Send + Sync {
    /// CPort this connection is bound to.
    fn cport_id(&self) -> u16;

    /// Largest payload a single message may carry on this connection.
    fn max_payload_size(&self) -> usize;

    /// Send a request and block until its response arrives.
    ///
    /// Returns the response payload. A non-success result in the response
    /// header is reported as [`TransportError::OperationFailed`].
    fn operation_sync(&self, op_type: u8, request: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Block until the remote end sends a request.
    fn recv_request(&self) -> Result<IncomingRequest, TransportError>;

    /// Send the response to a previously received request.
    fn send_response(
        &self,
        request: &OperationHeader,
        result: u8,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Check if the remote end is still reachable.
    fn is_connected(&self) -> bool;
}

impl<T: Connection + ?Sized> Connection for &T {
    fn cport_id(&self) -> u16 {
        (**self).cport_id()
    }

    fn max_payload_size(&self) -> usize {
        (**self).max_payload_size()
    }

    fn operation_sync(&self, op_type: u8, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).operation_sync(op_type, request)
    }

    fn recv_request(&self) -> Result<IncomingRequest, TransportError> {
        (**self).recv_request()
    }

    fn send_response(
        &self,
        request: &OperationHeader,
        result: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        (**self).send_response(request, result, payload)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
