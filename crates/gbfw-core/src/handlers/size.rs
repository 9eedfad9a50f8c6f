//! FIRMWARE_SIZE - load the image for a boot stage and report its length.

use tracing::{error, info};

use crate::context::FirmwareContext;
use crate::error::HandlerError;
use crate::events::{FirmwareEvent, FirmwareObserver, FirmwarePhase};
use crate::message::Operation;
use crate::protocol::{OperationType, SizeRequest, SizeResponse};
use crate::store::FirmwareStore;
use crate::transport::Connection;

use super::{HandleResult, parse_request};

/// Replaces any held image with the one named for the requested stage and
/// answers with its size. Every failure leaves no image held.
pub fn handle_firmware_size<C, S, O>(
    ctx: &mut FirmwareContext<'_, C, S, O>,
    op: &mut Operation,
) -> Result<HandleResult, HandlerError>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    let request = parse_request(
        op,
        OperationType::FirmwareSize,
        SizeRequest::SIZE,
        SizeRequest::from_bytes,
    )?;

    let (name, len) = {
        let blob = ctx.download_firmware(request.stage)?;
        (blob.name().to_string(), blob.len())
    };

    let Ok(size) = u32::try_from(len) else {
        error!(name = %name, len, "Firmware image does not fit a 32-bit size");
        ctx.free_firmware();
        return Err(HandlerError::ImageTooLarge { name, len });
    };

    let buf = match op.response_alloc(SizeResponse::SIZE) {
        Ok(buf) => buf,
        Err(e) => {
            error!("Error allocating response");
            ctx.free_firmware();
            return Err(e);
        }
    };
    SizeResponse { size }.write_to(buf);

    info!(name = %name, size, stage = request.stage, "Firmware size reported");
    ctx.emit(FirmwareEvent::FirmwareLoaded { name, size: len });
    ctx.set_phase(FirmwarePhase::Transfer);
    Ok(HandleResult::Continue)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::context::HandlerOptions;
    use crate::error::ErrorKind;
    use crate::naming::firmware_name;
    use crate::protocol::constants::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_size_loads_and_reports_length() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), vec![0xAA; 1000]);
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        let mut op = size_op(1);
        assert_eq!(
            handle_firmware_size(&mut ctx, &mut op).unwrap(),
            HandleResult::Continue
        );
        let reported = SizeResponse::from_bytes(op.response_payload()).unwrap();
        assert_eq!(reported.size, 1000);
        assert_eq!(ctx.firmware().unwrap().len(), 1000);
        assert_eq!(ctx.phase(), FirmwarePhase::Transfer);
        drop(ctx);

        assert_eq!(
            store.requested(),
            vec!["ara_11111111_22222222_33333333_44444444_01.tftf".to_string()]
        );
    }

    #[test]
    fn test_size_replaces_previous_image() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), vec![1; 10]);
        store.insert(firmware_name(&identity, 2), vec![2; 20]);
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        handle_firmware_size(&mut ctx, &mut size_op(1)).unwrap();
        let mut op = size_op(2);
        handle_firmware_size(&mut ctx, &mut op).unwrap();

        assert_eq!(op.response_payload(), &20u32.to_le_bytes());
        assert_eq!(ctx.firmware().unwrap().data()[0], 2);
        assert_eq!(store.live(), 1);
        assert_eq!(store.releases(), 1);
    }

    #[test]
    fn test_size_missing_image_drops_previous() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), vec![1; 10]);
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        handle_firmware_size(&mut ctx, &mut size_op(1)).unwrap();
        let mut op = size_op(3);
        let err = handle_firmware_size(&mut ctx, &mut op).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert_eq!(err.result_code(), GB_OP_NONEXISTENT);
        assert!(ctx.firmware().is_none());
        assert!(!op.has_response());
        assert_eq!(store.live(), 0);
    }

    #[test]
    fn test_size_rejects_bad_payload_length() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        for payload in [&[][..], &[1, 0][..]] {
            let mut request = op(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, payload);
            let err = handle_firmware_size(&mut ctx, &mut request).unwrap_err();
            assert!(matches!(
                err,
                HandlerError::IllegalPayloadSize { expected: 1, .. }
            ));
            assert_eq!(err.result_code(), GB_OP_INVALID);
        }
        drop(ctx);
        assert!(store.requested().is_empty());
    }

    #[test]
    fn test_size_response_alloc_failure_releases_image() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), vec![0; 64]);
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        let mut op = Operation::request(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[1], 2);
        let err = handle_firmware_size(&mut ctx, &mut op).unwrap_err();

        assert!(matches!(err, HandlerError::OutOfMemory { size: 4 }));
        assert_eq!(err.result_code(), GB_OP_NO_MEMORY);
        assert!(ctx.firmware().is_none());
        assert_eq!(store.loads(), 1);
        assert_eq!(store.live(), 0);
    }
}
