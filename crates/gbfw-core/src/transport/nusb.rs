//! Greybus over the ES2 USB bridge, using nusb.
//!
//! The ES2 bridge carries one Greybus operation message per bulk transfer.
//! The destination/source CPort travels in the first pad byte of the
//! operation header.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use nusb::io::EndpointRead;
use nusb::transfer::{Bulk, In, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{Connection, IncomingRequest, TransportError};
use crate::protocol::OperationHeader;
use crate::protocol::constants::{
    ES2_GBUF_MSG_SIZE_MAX, ES2_USB_PRODUCT_ID, ES2_USB_VENDOR_ID, GB_OP_SUCCESS,
    GB_OPERATION_PAYLOAD_SIZE_MAX, GB_OPERATION_TIMEOUT_DEFAULT_MS,
};

/// Message as read off the bulk IN endpoint, CPort already stripped.
struct RawMessage {
    header: OperationHeader,
    payload: Vec<u8>,
}

/// One Greybus connection tunnelled through an ES2 bridge.
pub struct Es2Connection {
    interface: Interface,
    /// Kept open across reads so transfers in flight at a timeout are not lost.
    reader: Mutex<EndpointRead<Bulk>>,
    out_endpoint: u8,
    cport_id: u16,
    /// Requests that arrived while waiting for a synchronous response.
    pending: Mutex<VecDeque<IncomingRequest>>,
    next_operation_id: AtomicU16,
}

impl Es2Connection {
    /// Open the first ES2 bridge found and bind to `cport_id`.
    #[instrument(level = "info")]
    pub fn open(cport_id: u16) -> Result<Self, TransportError> {
        Self::open_with_ids(ES2_USB_VENDOR_ID, ES2_USB_PRODUCT_ID, cport_id)
    }

    /// Open a bridge with a specific VID/PID and bind to `cport_id`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16, cport_id: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Self::open_device_info(device_info, cport_id)
    }

    fn open_device_info(
        device_info: nusb::DeviceInfo,
        cport_id: u16,
    ) -> Result<Self, TransportError> {
        if cport_id > u8::MAX as u16 {
            return Err(TransportError::OpenFailed(format!(
                "CPort {} cannot be addressed through ES2",
                cport_id
            )));
        }

        info!(
            vendor_id = %format!("{:04X}", device_info.vendor_id()),
            product_id = %format!("{:04X}", device_info.product_id()),
            cport = cport_id,
            "Found ES2 bridge"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        // Find BULK endpoints
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != 0 {
                    continue;
                }
                for alt in iface.alt_settings() {
                    for ep in alt.endpoints() {
                        if ep.transfer_type() != nusb::descriptors::TransferType::Bulk {
                            continue;
                        }
                        if ep.direction() == nusb::transfer::Direction::In {
                            in_endpoint = ep.address();
                        } else {
                            out_endpoint = ep.address();
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let reader = interface
            .endpoint::<Bulk, In>(in_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .reader(ES2_GBUF_MSG_SIZE_MAX)
            .with_read_timeout(Duration::from_millis(GB_OPERATION_TIMEOUT_DEFAULT_MS));

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Bridge opened successfully"
        );

        Ok(Self {
            interface,
            reader: Mutex::new(reader),
            out_endpoint,
            cport_id,
            pending: Mutex::new(VecDeque::new()),
            next_operation_id: AtomicU16::new(1),
        })
    }

    /// Allocate an operation id, skipping 0 (reserved for unidirectional).
    fn next_id(&self) -> u16 {
        loop {
            let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn write_message(
        &self,
        mut header: OperationHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if payload.len() > GB_OPERATION_PAYLOAD_SIZE_MAX {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: GB_OPERATION_PAYLOAD_SIZE_MAX,
            });
        }
        header.pad = [self.cport_id as u8, 0];

        let mut message = Vec::with_capacity(OperationHeader::SIZE + payload.len());
        message.extend_from_slice(&header.to_bytes());
        message.extend_from_slice(payload);

        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(ES2_GBUF_MSG_SIZE_MAX);
        writer.write_all(&message).map_err(write_error)?;
        writer.flush().map_err(write_error)?;

        trace!(
            op_type = %format!("0x{:02x}", header.op_type),
            id = header.operation_id,
            len = message.len(),
            "Message sent"
        );
        Ok(())
    }

    /// Read the next message addressed to our CPort.
    fn read_message(&self) -> Result<RawMessage, TransportError> {
        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            let mut buf = vec![0u8; ES2_GBUF_MSG_SIZE_MAX];
            let n = reader
                .read(&mut buf)
                .map_err(|e| read_error(e, GB_OPERATION_TIMEOUT_DEFAULT_MS))?;
            if n == 0 {
                return Err(TransportError::Disconnected);
            }

            let mut header = OperationHeader::from_bytes(&buf[..n])?;
            header.validate_size(n, ES2_GBUF_MSG_SIZE_MAX)?;

            let cport = header.pad[0] as u16;
            if cport != self.cport_id {
                debug!(cport, "Dropping message for another CPort");
                continue;
            }
            header.pad = [0; 2];

            let payload = buf[OperationHeader::SIZE..header.size as usize].to_vec();
            return Ok(RawMessage { header, payload });
        }
    }
}

/// Map a bulk IN failure. nusb reports an unplugged device as
/// `ConnectionAborted` and an expired read timeout as `TimedOut`.
fn read_error(e: io::Error, timeout_ms: u64) -> TransportError {
    match e.kind() {
        io::ErrorKind::ConnectionAborted => TransportError::Disconnected,
        io::ErrorKind::TimedOut => TransportError::Timeout { timeout_ms },
        _ => TransportError::ReadFailed(e.to_string()),
    }
}

/// Map a bulk OUT failure.
fn write_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::ConnectionAborted => TransportError::Disconnected,
        _ => TransportError::WriteFailed(e.to_string()),
    }
}

impl Connection for Es2Connection {
    fn cport_id(&self) -> u16 {
        self.cport_id
    }

    fn max_payload_size(&self) -> usize {
        GB_OPERATION_PAYLOAD_SIZE_MAX
    }

    #[instrument(skip(self, request), fields(op_type = %format!("0x{:02x}", op_type), len = request.len()))]
    fn operation_sync(&self, op_type: u8, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let id = self.next_id();
        self.write_message(OperationHeader::request(id, op_type, request.len()), request)?;

        loop {
            let message = self.read_message()?;
            if !message.header.is_response() {
                debug!(
                    op_type = %format!("0x{:02x}", message.header.op_type),
                    "Queueing request received during synchronous operation"
                );
                self.pending.lock().unwrap_or_else(|e| e.into_inner()).push_back(IncomingRequest {
                    header: message.header,
                    payload: message.payload,
                });
                continue;
            }
            if message.header.operation_id != id || message.header.base_type() != op_type {
                warn!(
                    id = message.header.operation_id,
                    expected = id,
                    "Dropping unexpected response"
                );
                continue;
            }
            if message.header.result != GB_OP_SUCCESS {
                return Err(TransportError::OperationFailed {
                    op_type,
                    result: message.header.result,
                });
            }
            debug!(bytes = message.payload.len(), "Operation complete");
            return Ok(message.payload);
        }
    }

    fn recv_request(&self) -> Result<IncomingRequest, TransportError> {
        if let Some(request) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Ok(request);
        }

        loop {
            let message = self.read_message()?;
            if message.header.is_response() {
                warn!(
                    id = message.header.operation_id,
                    "Dropping response with no outstanding request"
                );
                continue;
            }
            return Ok(IncomingRequest {
                header: message.header,
                payload: message.payload,
            });
        }
    }

    fn send_response(
        &self,
        request: &OperationHeader,
        result: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let payload = if result == GB_OP_SUCCESS { payload } else { &[] };
        self.write_message(
            OperationHeader::response_to(request, result, payload.len()),
            payload,
        )
    }

    fn is_connected(&self) -> bool {
        // nusb has no cheap liveness probe; failures surface on the next transfer.
        true
    }
}
