//! GET_FIRMWARE - serve a chunk of the held image.

use tracing::{error, trace};

use crate::context::FirmwareContext;
use crate::error::HandlerError;
use crate::events::{FirmwareEvent, FirmwareObserver};
use crate::message::Operation;
use crate::protocol::{GetFirmwareRequest, OperationType};
use crate::store::FirmwareStore;
use crate::transport::Connection;

use super::{HandleResult, parse_request};

/// Copies `size` bytes at `offset` of the held image into the response.
/// The held image is never changed here.
pub fn handle_get_firmware<C, S, O>(
    ctx: &mut FirmwareContext<'_, C, S, O>,
    op: &mut Operation,
) -> Result<HandleResult, HandlerError>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    let GetFirmwareRequest { offset, size } = parse_request(
        op,
        OperationType::GetFirmware,
        GetFirmwareRequest::SIZE,
        GetFirmwareRequest::from_bytes,
    )?;

    let Some(firmware) = ctx.firmware() else {
        error!("Firmware not available");
        return Err(HandlerError::NotAvailable);
    };
    let total = firmware.len();

    let Some(chunk) = firmware.chunk(offset, size) else {
        let err = HandlerError::OutOfRange {
            offset,
            size,
            image_len: total,
        };
        error!("{}", err);
        return Err(err);
    };

    let buf = op.response_alloc(chunk.len()).inspect_err(|_| {
        error!(size, "Error allocating firmware chunk response");
    })?;
    buf.copy_from_slice(chunk);

    trace!(offset, size, "Chunk copied");
    ctx.emit(FirmwareEvent::ChunkServed {
        offset,
        size,
        total,
    });
    Ok(HandleResult::Continue)
}
