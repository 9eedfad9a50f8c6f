//! Event system for UI decoupling.
//!
//! Allows CLI or other front ends to follow a firmware download without
//! tight coupling to the protocol handler.

use std::fmt;

use crate::protocol::{BootStatus, OperationType, result_name};

/// Firmware download phases of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwarePhase {
    /// Connection set up, identity being resolved.
    Init,
    /// AP_READY sent, waiting for the bootrom to ask for firmware.
    WaitingForRequest,
    /// Image loaded and being served in chunks.
    Transfer,
    /// Bootrom reported the image it is about to boot.
    Booting,
    /// Connection torn down.
    Closed,
}

impl fmt::Display for FirmwarePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwarePhase::Init => write!(f, "Init"),
            FirmwarePhase::WaitingForRequest => write!(f, "Waiting for Request"),
            FirmwarePhase::Transfer => write!(f, "Transfer"),
            FirmwarePhase::Booting => write!(f, "Booting"),
            FirmwarePhase::Closed => write!(f, "Closed"),
        }
    }
}

/// Events emitted by the firmware protocol handler.
#[derive(Debug, Clone)]
pub enum FirmwareEvent {
    /// Phase changed.
    PhaseChanged {
        from: FirmwarePhase,
        to: FirmwarePhase,
    },
    /// ES2 VID/PID fetched from the bootrom.
    IdentityResolved { vendor_id: u32, product_id: u32 },
    /// AP_READY handshake accepted by the bootrom.
    HandshakeComplete,
    /// Bootrom asked for a firmware file.
    FirmwareRequested { name: String, stage: u8 },
    /// Firmware file loaded and its size reported.
    FirmwareLoaded { name: String, size: usize },
    /// Chunk copied into a response.
    ChunkServed {
        offset: u32,
        size: u32,
        total: usize,
    },
    /// Bootrom finished with the image.
    ReadyToBoot { status: BootStatus },
    /// Held image handed back to the store.
    FirmwareReleased { name: String },
    /// A request failed and its result was sent back.
    RequestFailed {
        op_type: OperationType,
        result: u8,
        message: String,
    },
}

/// Observer trait for receiving firmware events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FirmwareObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FirmwareEvent);
}

impl<T: FirmwareObserver + ?Sized> FirmwareObserver for std::sync::Arc<T> {
    fn on_event(&self, event: &FirmwareEvent) {
        (**self).on_event(event)
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FirmwareObserver for NullObserver {
    fn on_event(&self, _event: &FirmwareEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FirmwareObserver for TracingObserver {
    fn on_event(&self, event: &FirmwareEvent) {
        match event {
            FirmwareEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            FirmwareEvent::IdentityResolved {
                vendor_id,
                product_id,
            } => {
                tracing::info!(
                    vid = %format!("0x{:08x}", vendor_id),
                    pid = %format!("0x{:08x}", product_id),
                    "Identity resolved"
                );
            }
            FirmwareEvent::HandshakeComplete => {
                tracing::debug!("AP_READY acknowledged");
            }
            FirmwareEvent::FirmwareRequested { name, stage } => {
                tracing::info!(name = %name, stage = stage, "Firmware file requested");
            }
            FirmwareEvent::FirmwareLoaded { name, size } => {
                tracing::debug!(name = %name, size = size, "Firmware loaded");
            }
            FirmwareEvent::ChunkServed {
                offset,
                size,
                total,
            } => {
                let end = *offset as u64 + *size as u64;
                let pct = if *total > 0 {
                    (end * 100) / *total as u64
                } else {
                    0
                };
                tracing::debug!(
                    offset = offset,
                    size = size,
                    progress = %format!("{}%", pct),
                    "Chunk served"
                );
            }
            FirmwareEvent::ReadyToBoot { status } => {
                tracing::info!(status = %status, "Ready to boot");
            }
            FirmwareEvent::FirmwareReleased { name } => {
                tracing::debug!(name = %name, "Firmware released");
            }
            FirmwareEvent::RequestFailed {
                op_type,
                result,
                message,
            } => {
                tracing::warn!(
                    op = %op_type,
                    result = result_name(*result),
                    "Request failed: {}",
                    message
                );
            }
        }
    }
}

/// Observer that records every event, for tests and scripting.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<FirmwareEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FirmwareEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl FirmwareObserver for RecordingObserver {
    fn on_event(&self, event: &FirmwareEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
