//! Per-connection firmware protocol state.
//!
//! One [`FirmwareContext`] exists per firmware connection. It is created by
//! [`FirmwareContext::connection_init`], passed by `&mut` into every request
//! dispatch, and releases whatever image it still holds when it goes away.
//! Exclusive borrows serialize image replacement against chunk reads; a
//! front end that dispatches from several threads must put the context
//! behind a `Mutex`.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::error::{HandlerError, InitError};
use crate::events::{FirmwareEvent, FirmwareObserver, FirmwarePhase};
use crate::identity::{IdentityRecord, es2_fixup_vid_pid};
use crate::naming::firmware_name;
use crate::protocol::HeaderError;
use crate::protocol::constants::GB_FIRMWARE_TYPE_AP_READY;
use crate::store::{FirmwareBlob, FirmwareStore};
use crate::transport::{Connection, TransportError};

/// What to do with a ready-to-boot report of an insecure image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootPolicy {
    /// Accept unsigned or untrusted images.
    #[default]
    AcceptInsecure,
    /// Fail the report unless the image verified as secure.
    RequireSecure,
}

/// Tunables of the request handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    pub boot_policy: BootPolicy,
}

/// Firmware protocol state of one connection.
pub struct FirmwareContext<'a, C, S, O>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    connection: &'a C,
    store: &'a S,
    identity: &'a mut dyn IdentityRecord,
    observer: &'a O,
    options: HandlerOptions,
    phase: FirmwarePhase,
    /// Image served to the bootrom; replaced on every size request.
    firmware: Option<FirmwareBlob>,
}

impl<'a, C, S, O> FirmwareContext<'a, C, S, O>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    /// Set up the firmware protocol on a freshly enabled connection.
    ///
    /// Resolves ES2 identity, then tells the bootrom the AP is ready. A
    /// failed handshake fails the whole setup.
    #[instrument(skip_all, fields(cport = connection.cport_id()))]
    pub fn connection_init(
        connection: &'a C,
        store: &'a S,
        identity: &'a mut dyn IdentityRecord,
        observer: &'a O,
        options: HandlerOptions,
    ) -> Result<Self, InitError> {
        let mut ctx = Self {
            connection,
            store,
            identity,
            observer,
            options,
            phase: FirmwarePhase::Init,
            firmware: None,
        };

        es2_fixup_vid_pid(ctx.connection, &mut *ctx.identity, ctx.observer);

        // Tell bootrom we're ready. The response carries no payload.
        let handshake = ctx
            .connection
            .operation_sync(GB_FIRMWARE_TYPE_AP_READY, &[])
            .and_then(|payload| match payload.len() {
                0 => Ok(()),
                n => Err(TransportError::Header(HeaderError::SizeMismatch {
                    expected: 0,
                    actual: n,
                })),
            });
        if let Err(e) = handshake {
            error!(error = %e, "Failed to send AP_READY");
            return Err(InitError::Handshake(e));
        }
        debug!("AP_READY sent");

        ctx.emit(FirmwareEvent::HandshakeComplete);
        ctx.set_phase(FirmwarePhase::WaitingForRequest);
        Ok(ctx)
    }

    /// Tear the protocol down, releasing any held image.
    pub fn connection_exit(mut self) {
        self.free_firmware();
        self.set_phase(FirmwarePhase::Closed);
        debug!(cport = self.connection.cport_id(), "Firmware connection closed");
    }

    pub fn connection(&self) -> &C {
        self.connection
    }

    pub fn identity(&self) -> &dyn IdentityRecord {
        &*self.identity
    }

    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }

    pub fn phase(&self) -> FirmwarePhase {
        self.phase
    }

    /// Currently held image, if any.
    pub fn firmware(&self) -> Option<&FirmwareBlob> {
        self.firmware.as_ref()
    }

    pub(crate) fn emit(&self, event: FirmwareEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn set_phase(&mut self, to: FirmwarePhase) {
        if self.phase != to {
            let from = std::mem::replace(&mut self.phase, to);
            self.emit(FirmwareEvent::PhaseChanged { from, to });
        }
    }

    /// Replace the held image with the one for `stage`.
    ///
    /// The old image is released before the lookup, so on failure no image
    /// is held.
    pub(crate) fn download_firmware(&mut self, stage: u8) -> Result<&FirmwareBlob, HandlerError> {
        self.free_firmware();

        let name = firmware_name(&*self.identity, stage);
        info!(name = %name, "Firmware file requested");
        self.emit(FirmwareEvent::FirmwareRequested {
            name: name.clone(),
            stage,
        });

        match self.store.load(&name) {
            Ok(blob) => Ok(self.firmware.insert(blob)),
            Err(e) => {
                error!(name = %name, error = %e, "Firmware request has failed");
                Err(HandlerError::Load(e))
            }
        }
    }

    /// Hand the held image back to the store, if there is one.
    pub(crate) fn free_firmware(&mut self) {
        if let Some(blob) = self.firmware.take() {
            let name = blob.name().to_string();
            self.store.release(blob);
            self.emit(FirmwareEvent::FirmwareReleased { name });
        }
    }
}

impl<C, S, O> Drop for FirmwareContext<'_, C, S, O>
where
    C: Connection + ?Sized,
    S: FirmwareStore + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    fn drop(&mut self) {
        self.free_firmware();
    }
}
