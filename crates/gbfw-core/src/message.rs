//! Incoming operation with its response buffer.

use tracing::debug;

use crate::error::HandlerError;
use crate::protocol::OperationHeader;
use crate::transport::IncomingRequest;

/// A request from the bootrom, plus the response being built for it.
///
/// Handlers read the request payload and allocate the response through
/// [`response_alloc`](Self::response_alloc), which fails the same way the
/// link would: a payload larger than the connection can carry, or memory
/// that cannot be reserved.
#[derive(Debug)]
pub struct Operation {
    header: OperationHeader,
    request: Vec<u8>,
    response: Option<Vec<u8>>,
    max_payload: usize,
}

impl Operation {
    pub fn new(header: OperationHeader, request: Vec<u8>, max_payload: usize) -> Self {
        Self {
            header,
            request,
            response: None,
            max_payload,
        }
    }

    pub fn from_incoming(incoming: IncomingRequest, max_payload: usize) -> Self {
        Self::new(incoming.header, incoming.payload, max_payload)
    }

    /// Build a request of `op_type` with a fresh header. Mostly for tests.
    pub fn request(op_type: u8, payload: &[u8], max_payload: usize) -> Self {
        Self::new(
            OperationHeader::request(1, op_type, payload.len()),
            payload.to_vec(),
            max_payload,
        )
    }

    pub fn header(&self) -> &OperationHeader {
        &self.header
    }

    pub fn op_type(&self) -> u8 {
        self.header.op_type
    }

    pub fn request_payload(&self) -> &[u8] {
        &self.request
    }

    /// Allocate a zeroed response payload of `size` bytes.
    pub fn response_alloc(&mut self, size: usize) -> Result<&mut [u8], HandlerError> {
        if size > self.max_payload {
            debug!(size, max = self.max_payload, "Response exceeds link payload");
            return Err(HandlerError::OutOfMemory { size });
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| HandlerError::OutOfMemory { size })?;
        buf.resize(size, 0);

        Ok(self.response.insert(buf).as_mut_slice())
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Response payload, empty when none was allocated.
    pub fn response_payload(&self) -> &[u8] {
        self.response.as_deref().unwrap_or(&[])
    }

    /// Drop any response built so far.
    pub fn clear_response(&mut self) {
        self.response = None;
    }
}
