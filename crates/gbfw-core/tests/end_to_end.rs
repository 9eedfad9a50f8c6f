//! Full firmware download against a scripted bootrom.

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use gbfw_core::protocol::constants::*;
use gbfw_core::{
    DirectoryStore, ErrorKind, FirmwareContext, FirmwareEvent, FirmwarePhase, FirmwareSession,
    HandleResult, HandlerError, HandlerOptions, InterfaceIdentity, MemoryStore, MockConnection,
    NullObserver, Operation, RecordingObserver, SessionConfig, SessionOutcome, firmware_name,
};

fn identity() -> InterfaceIdentity {
    InterfaceIdentity::new(0x1111_1111, 0x2222_2222, 0x3333_3333, 0x4444_4444)
}

fn chunk_request(offset: u32, size: u32) -> Operation {
    let mut payload = offset.to_le_bytes().to_vec();
    payload.extend_from_slice(&size.to_le_bytes());
    Operation::request(GB_FIRMWARE_TYPE_GET_FIRMWARE, &payload, GB_OPERATION_PAYLOAD_SIZE_MAX)
}

#[test]
fn test_download_scenario() {
    let mock = MockConnection::new();
    mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
    let store = MemoryStore::new();
    let mut identity = identity();

    let name = firmware_name(&identity, GB_FIRMWARE_BOOT_STAGE_ONE);
    assert_eq!(name, "ara_11111111_22222222_33333333_44444444_01.tftf");
    store.insert(name.clone(), (0u8..10).collect::<Vec<_>>());

    let mut ctx = FirmwareContext::connection_init(
        &mock,
        &store,
        &mut identity,
        &NullObserver,
        HandlerOptions::default(),
    )
    .unwrap();

    let mut size = Operation::request(
        GB_FIRMWARE_TYPE_FIRMWARE_SIZE,
        &[GB_FIRMWARE_BOOT_STAGE_ONE],
        GB_OPERATION_PAYLOAD_SIZE_MAX,
    );
    assert_eq!(ctx.handle_request(&mut size).unwrap(), HandleResult::Continue);
    assert_eq!(size.response_payload(), &10u32.to_le_bytes());

    let mut chunk = chunk_request(3, 4);
    ctx.handle_request(&mut chunk).unwrap();
    assert_eq!(chunk.response_payload(), &[3, 4, 5, 6]);

    let mut past_end = chunk_request(8, 5);
    let err = ctx.handle_request(&mut past_end).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    assert!(!past_end.has_response());

    let mut boot = Operation::request(
        GB_FIRMWARE_TYPE_READY_TO_BOOT,
        &[GB_FIRMWARE_BOOT_STATUS_INVALID],
        GB_OPERATION_PAYLOAD_SIZE_MAX,
    );
    assert!(matches!(
        ctx.handle_request(&mut boot),
        Err(HandlerError::InvalidBlob)
    ));
    assert_eq!(ctx.firmware().map(|f| f.name()), Some(name.as_str()));

    ctx.connection_exit();
    assert_eq!(store.loads(), 1);
    assert_eq!(store.live(), 0);
}

#[test]
fn test_es2_session_from_directory() {
    let dir = tempdir().unwrap();

    let mut identity = InterfaceIdentity::es2_unresolved();
    let resolved = InterfaceIdentity::new(ES2_DDBL1_MFR_ID, ES2_DDBL1_PROD_ID, 0xAB, 0xCD);
    let image: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
    fs::write(
        dir.path().join(firmware_name(&resolved, GB_FIRMWARE_BOOT_STAGE_TWO)),
        &image,
    )
    .unwrap();

    let mock = MockConnection::new();
    let mut vid_pid = 0xABu32.to_le_bytes().to_vec();
    vid_pid.extend_from_slice(&0xCDu32.to_le_bytes());
    mock.queue_sync_response(GB_FIRMWARE_TYPE_GET_VID_PID, &vid_pid);
    mock.queue_sync_response(GB_FIRMWARE_TYPE_AP_READY, &[]);
    mock.queue_request(GB_FIRMWARE_TYPE_FIRMWARE_SIZE, &[GB_FIRMWARE_BOOT_STAGE_TWO]);
    for offset in (0..3000u32).step_by(1000) {
        let mut payload = offset.to_le_bytes().to_vec();
        payload.extend_from_slice(&1000u32.to_le_bytes());
        mock.queue_request(GB_FIRMWARE_TYPE_GET_FIRMWARE, &payload);
    }
    mock.queue_request(GB_FIRMWARE_TYPE_READY_TO_BOOT, &[GB_FIRMWARE_BOOT_STATUS_SECURE]);

    let config = SessionConfig {
        firmware_dirs: vec![dir.path().to_path_buf()],
        ..Default::default()
    };
    let observer = Arc::new(RecordingObserver::new());
    let session = FirmwareSession::with_observer(config, observer.clone());
    let store: DirectoryStore = session.config().store();
    assert_eq!(store.search_path(), &[dir.path().to_path_buf()]);

    let outcome = session.serve(&mock, &store, &mut identity).unwrap();

    assert_eq!(outcome, SessionOutcome::Booted(gbfw_core::BootStatus::Secure));
    assert_eq!(identity, resolved);

    let responses = mock.responses();
    assert_eq!(responses.len(), 5);
    assert_eq!(responses[0].payload, 3000u32.to_le_bytes());
    let served: Vec<u8> = responses[1..4]
        .iter()
        .flat_map(|r| r.payload.iter().copied())
        .collect();
    assert_eq!(served, image);
    for r in &responses {
        assert_eq!(r.header.op_type & GB_MESSAGE_TYPE_RESPONSE, GB_MESSAGE_TYPE_RESPONSE);
        assert_eq!(r.result(), GB_OP_SUCCESS);
    }

    let events = observer.events();
    let phases: Vec<FirmwarePhase> = events
        .iter()
        .filter_map(|e| match e {
            FirmwareEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            FirmwarePhase::WaitingForRequest,
            FirmwarePhase::Transfer,
            FirmwarePhase::Booting,
            FirmwarePhase::Closed,
        ]
    );
    assert!(matches!(
        events.last(),
        Some(FirmwareEvent::PhaseChanged {
            to: FirmwarePhase::Closed,
            ..
        })
    ));
}
