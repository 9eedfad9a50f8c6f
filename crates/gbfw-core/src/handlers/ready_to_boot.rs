//! READY_TO_BOOT - final status report of the bootrom.

use tracing::{error, info, warn};

use crate::context::{BootPolicy, FirmwareContext};
use crate::error::HandlerError;
use crate::events::{FirmwareEvent, FirmwareObserver, FirmwarePhase};
use crate::message::Operation;
use crate::protocol::{BootStatus, OperationType, ReadyToBootRequest};
use crate::store::FirmwareStore;
use crate::transport::Connection;

use super::{HandleResult, parse_request};

/// Checks the reported status against the boot policy. The held image is
/// left in place either way; teardown releases it.
pub fn handle_ready_to_boot<C, S, O>(
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
        OperationType::ReadyToBoot,
        ReadyToBootRequest::SIZE,
        ReadyToBootRequest::from_bytes,
    )?;
    let status = BootStatus::from_u8(request.status);

    match status {
        BootStatus::Invalid => {
            error!("Firmware blob could not be validated");
            return Err(HandlerError::InvalidBlob);
        }
        BootStatus::Insecure if ctx.options().boot_policy == BootPolicy::RequireSecure => {
            error!("Insecure firmware rejected");
            return Err(HandlerError::InsecureRejected);
        }
        BootStatus::Insecure => warn!("Firmware blob is insecure"),
        BootStatus::Secure => info!("Firmware blob is secure"),
        BootStatus::Other(v) => warn!(status = v, "Unknown boot status, accepting"),
    }

    ctx.emit(FirmwareEvent::ReadyToBoot { status });
    ctx.set_phase(FirmwarePhase::Booting);
    Ok(HandleResult::ReadyToBoot(status))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::context::HandlerOptions;
    use crate::handlers::handle_firmware_size;
    use crate::naming::firmware_name;
    use crate::protocol::constants::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_secure_and_insecure_accepted_by_default() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        let mut op = boot_op(GB_FIRMWARE_BOOT_STATUS_SECURE);
        assert_eq!(
            handle_ready_to_boot(&mut ctx, &mut op).unwrap(),
            HandleResult::ReadyToBoot(BootStatus::Secure)
        );
        assert!(!op.has_response());
        assert_eq!(ctx.phase(), FirmwarePhase::Booting);

        let mut op = boot_op(GB_FIRMWARE_BOOT_STATUS_INSECURE);
        assert_eq!(
            handle_ready_to_boot(&mut ctx, &mut op).unwrap(),
            HandleResult::ReadyToBoot(BootStatus::Insecure)
        );
    }

    #[test]
    fn test_accepted_status_keeps_image() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, GB_FIRMWARE_BOOT_STAGE_ONE), vec![5; 32]);
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());
        handle_firmware_size(&mut ctx, &mut size_op(GB_FIRMWARE_BOOT_STAGE_ONE)).unwrap();
        let name = ctx.firmware().unwrap().name().to_string();

        for status in [
            GB_FIRMWARE_BOOT_STATUS_SECURE,
            GB_FIRMWARE_BOOT_STATUS_INSECURE,
            0x09,
        ] {
            let result = handle_ready_to_boot(&mut ctx, &mut boot_op(status)).unwrap();
            assert_eq!(result, HandleResult::ReadyToBoot(BootStatus::from_u8(status)));

            let held = ctx.firmware().unwrap();
            assert_eq!(held.name(), name);
            assert_eq!(held.data(), &[5; 32]);
        }
        drop(ctx);

        assert_eq!(store.loads(), 1);
        assert_eq!(store.releases(), 1);
    }

    #[test]
    fn test_invalid_status_keeps_image() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        store.insert(firmware_name(&identity, 1), vec![7; 16]);
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());
        handle_firmware_size(&mut ctx, &mut size_op(1)).unwrap();

        let err = handle_ready_to_boot(&mut ctx, &mut boot_op(GB_FIRMWARE_BOOT_STATUS_INVALID))
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidBlob));
        assert_eq!(err.result_code(), GB_OP_INVALID);
        assert_eq!(ctx.firmware().unwrap().len(), 16);
        assert_eq!(ctx.phase(), FirmwarePhase::Transfer);
    }

    #[test]
    fn test_require_secure_rejects_insecure() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        let options = HandlerOptions {
            boot_policy: BootPolicy::RequireSecure,
        };
        let mut ctx = context(&mock, &store, &mut identity, options);

        let err = handle_ready_to_boot(&mut ctx, &mut boot_op(GB_FIRMWARE_BOOT_STATUS_INSECURE))
            .unwrap_err();
        assert!(matches!(err, HandlerError::InsecureRejected));
        assert_eq!(err.result_code(), GB_OP_INVALID);

        assert!(handle_ready_to_boot(&mut ctx, &mut boot_op(GB_FIRMWARE_BOOT_STATUS_SECURE)).is_ok());
    }

    #[test]
    fn test_unknown_status_accepted() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        assert_eq!(
            handle_ready_to_boot(&mut ctx, &mut boot_op(0x09)).unwrap(),
            HandleResult::ReadyToBoot(BootStatus::Other(0x09))
        );
    }

    #[test]
    fn test_bad_payload_length() {
        let mock = mock();
        let store = MemoryStore::new();
        let mut identity = identity();
        let mut ctx = context(&mock, &store, &mut identity, HandlerOptions::default());

        let mut request = op(GB_FIRMWARE_TYPE_READY_TO_BOOT, &[1, 1]);
        let err = handle_ready_to_boot(&mut ctx, &mut request).unwrap_err();
        assert!(matches!(
            err,
            HandlerError::IllegalPayloadSize {
                op: OperationType::ReadyToBoot,
                expected: 1,
                actual: 2,
            }
        ));
    }
}
