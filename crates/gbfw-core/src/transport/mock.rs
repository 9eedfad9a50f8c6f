//! Mock Greybus connection for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};

use super::traits::{Connection, IncomingRequest, TransportError};
use crate::protocol::constants::{
    GB_OP_SUCCESS, GB_OPERATION_PAYLOAD_SIZE_MAX, GB_OPERATION_TIMEOUT_DEFAULT_MS,
};
use crate::protocol::OperationHeader;

/// Response captured by [`MockConnection::send_response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentResponse {
    pub header: OperationHeader,
    pub payload: Vec<u8>,
}

impl SentResponse {
    pub fn result(&self) -> u8 {
        self.header.result
    }
}

/// Mock connection for unit testing the protocol handler.
///
/// Plays the part of the module bootrom: incoming requests are scripted with
/// [`queue_request`](Self::queue_request), answers to AP initiated requests
/// with [`queue_sync_response`](Self::queue_sync_response). When the request
/// script runs dry the mock reports a disconnect.
pub struct MockConnection {
    cport_id: u16,
    max_payload: usize,
    /// Scripted requests from the bootrom.
    incoming: Mutex<VecDeque<IncomingRequest>>,
    /// Scripted answers keyed by request type: payload or failing result.
    sync_responses: Mutex<HashMap<u8, VecDeque<Result<Vec<u8>, u8>>>>,
    /// Captured AP initiated requests.
    sent_requests: Mutex<Vec<(u8, Vec<u8>)>>,
    /// Captured responses.
    responses: Mutex<Vec<SentResponse>>,
    connected: Mutex<bool>,
    next_operation_id: AtomicU16,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::with_max_payload(GB_OPERATION_PAYLOAD_SIZE_MAX)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            cport_id: 1,
            max_payload,
            incoming: Mutex::new(VecDeque::new()),
            sync_responses: Mutex::new(HashMap::new()),
            sent_requests: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            connected: Mutex::new(true),
            next_operation_id: AtomicU16::new(1),
        }
    }

    /// Queue a request from the bootrom. Returns its operation id.
    pub fn queue_request(&self, op_type: u8, payload: &[u8]) -> u16 {
        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
        self.push_request(OperationHeader::request(id, op_type, payload.len()), payload);
        id
    }

    /// Queue a request that expects no response.
    pub fn queue_unidirectional(&self, op_type: u8, payload: &[u8]) {
        self.push_request(OperationHeader::request(0, op_type, payload.len()), payload);
    }

    fn push_request(&self, header: OperationHeader, payload: &[u8]) {
        self.incoming.lock().unwrap().push_back(IncomingRequest {
            header,
            payload: payload.to_vec(),
        });
    }

    /// Queue a successful response payload for the next `op_type` request.
    pub fn queue_sync_response(&self, op_type: u8, payload: &[u8]) {
        self.sync_responses
            .lock()
            .unwrap()
            .entry(op_type)
            .or_default()
            .push_back(Ok(payload.to_vec()));
    }

    /// Queue a failing result for the next `op_type` request.
    pub fn queue_sync_failure(&self, op_type: u8, result: u8) {
        self.sync_responses
            .lock()
            .unwrap()
            .entry(op_type)
            .or_default()
            .push_back(Err(result));
    }

    /// Get all AP initiated requests.
    pub fn sent_requests(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent_requests.lock().unwrap().clone()
    }

    /// Get all responses sent back to the bootrom.
    pub fn responses(&self) -> Vec<SentResponse> {
        self.responses.lock().unwrap().clone()
    }

    /// Number of scripted requests not yet received.
    pub fn pending_requests(&self) -> usize {
        self.incoming.lock().unwrap().len()
    }

    /// Simulate module removal.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate module reinsertion.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MockConnection {
    fn cport_id(&self) -> u16 {
        self.cport_id
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    fn operation_sync(&self, op_type: u8, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if request.len() > self.max_payload {
            return Err(TransportError::PayloadTooLarge {
                size: request.len(),
                max: self.max_payload,
            });
        }
        self.sent_requests
            .lock()
            .unwrap()
            .push((op_type, request.to_vec()));

        let scripted = self
            .sync_responses
            .lock()
            .unwrap()
            .get_mut(&op_type)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(result)) => Err(TransportError::OperationFailed { op_type, result }),
            None => Err(TransportError::Timeout {
                timeout_ms: GB_OPERATION_TIMEOUT_DEFAULT_MS,
            }),
        }
    }

    fn recv_request(&self) -> Result<IncomingRequest, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.incoming
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Disconnected)
    }

    fn send_response(
        &self,
        request: &OperationHeader,
        result: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let payload = if result == GB_OP_SUCCESS {
            payload.to_vec()
        } else {
            Vec::new()
        };
        self.responses.lock().unwrap().push(SentResponse {
            header: OperationHeader::response_to(request, result, payload.len()),
            payload,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}
