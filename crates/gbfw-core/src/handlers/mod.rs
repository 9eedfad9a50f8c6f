//! Request handlers - dispatch logic for each firmware operation.
//!
//! This module is split into submodules by operation:
//! - `size`: firmware size request (loads the image)
//! - `get_firmware`: chunk reads from the held image
//! - `ready_to_boot`: final status report from the bootrom

mod get_firmware;
mod ready_to_boot;
mod size;

use tracing::error;

use crate::context::FirmwareContext;
use crate::error::HandlerError;
use crate::events::{FirmwareEvent, FirmwareObserver};
use crate::message::Operation;
use crate::protocol::constants::*;
use crate::protocol::{BootStatus, HeaderError, OperationType};
use crate::store::FirmwareStore;
use crate::transport::Connection;

pub use get_firmware::handle_get_firmware;
pub use ready_to_boot::handle_ready_to_boot;
pub use size::handle_firmware_size;

/// Result of handling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// Request served, more are expected.
    Continue,
    /// Bootrom accepted the image and is about to boot it.
    ReadyToBoot(BootStatus),
}

/// Handle one request from the bootrom.
///
/// On success the response payload, if the operation has one, has been
/// allocated in `op`. On failure the returned error says which result to
/// report.
pub fn handle_request<C, S, O>(
    ctx: &mut FirmwareContext<'_, C, S, O>,
    op: &mut Operation,
) -> Result<HandleResult, HandlerError>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    let result = match op.op_type() {
        GB_FIRMWARE_TYPE_FIRMWARE_SIZE => handle_firmware_size(ctx, op),
        GB_FIRMWARE_TYPE_GET_FIRMWARE => handle_get_firmware(ctx, op),
        GB_FIRMWARE_TYPE_READY_TO_BOOT => handle_ready_to_boot(ctx, op),
        other => {
            error!("Unsupported request: {}", other);
            Err(HandlerError::UnsupportedRequest(other))
        }
    };

    if let Err(e) = &result {
        op.clear_response();
        ctx.emit(FirmwareEvent::RequestFailed {
            op_type: OperationType::from_u8(op.op_type()),
            result: e.result_code(),
            message: e.to_string(),
        });
    }
    result
}

impl<C, S, O> FirmwareContext<'_, C, S, O>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    /// Dispatch one request; see [`handle_request`].
    pub fn handle_request(&mut self, op: &mut Operation) -> Result<HandleResult, HandlerError> {
        handle_request(self, op)
    }
}

/// Parse a fixed size request payload, rejecting any other length.
fn parse_request<T>(
    op: &Operation,
    op_type: OperationType,
    expected: usize,
    parse: impl FnOnce(&[u8]) -> Result<T, HeaderError>,
) -> Result<T, HandlerError> {
    parse(op.request_payload()).map_err(|_| {
        let err = HandlerError::IllegalPayloadSize {
            op: op_type,
            expected,
            actual: op.request_payload().len(),
        };
        error!("{}", err);
        err
    })
}
