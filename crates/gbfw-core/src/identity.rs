//! Module identity and the ES2 VID/PID fixup.
//!
//! The ES2 bridge has no VID/PID programmed, so interfaces built on it
//! enumerate with zero ids. The bootrom knows the real ids and reports them
//! through the GET_VID_PID operation; the fixup patches them into the
//! identity record before any firmware name is derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::events::{FirmwareEvent, FirmwareObserver};
use crate::protocol::GetVidPidResponse;
use crate::protocol::constants::{ES2_DDBL1_MFR_ID, ES2_DDBL1_PROD_ID, GB_FIRMWARE_TYPE_GET_VID_PID};
use crate::transport::{Connection, TransportError};

/// Narrow view of an interface identity record.
///
/// Bridge ids are read-only; vendor/product ids may be patched by the fixup.
pub trait IdentityRecord {
    fn ddbl1_manufacturer_id(&self) -> u32;
    fn ddbl1_product_id(&self) -> u32;
    fn vendor_id(&self) -> u32;
    fn product_id(&self) -> u32;
    fn set_vendor_product(&mut self, vendor_id: u32, product_id: u32);
}

/// Identity of an interface as reported at hotplug.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceIdentity {
    pub ddbl1_manufacturer_id: u32,
    pub ddbl1_product_id: u32,
    pub vendor_id: u32,
    pub product_id: u32,
}

impl InterfaceIdentity {
    pub fn new(
        ddbl1_manufacturer_id: u32,
        ddbl1_product_id: u32,
        vendor_id: u32,
        product_id: u32,
    ) -> Self {
        Self {
            ddbl1_manufacturer_id,
            ddbl1_product_id,
            vendor_id,
            product_id,
        }
    }

    /// ES2 interface that has not been told its VID/PID yet.
    pub fn es2_unresolved() -> Self {
        Self::new(ES2_DDBL1_MFR_ID, ES2_DDBL1_PROD_ID, 0, 0)
    }
}

impl IdentityRecord for InterfaceIdentity {
    fn ddbl1_manufacturer_id(&self) -> u32 {
        self.ddbl1_manufacturer_id
    }

    fn ddbl1_product_id(&self) -> u32 {
        self.ddbl1_product_id
    }

    fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    fn product_id(&self) -> u32 {
        self.product_id
    }

    fn set_vendor_product(&mut self, vendor_id: u32, product_id: u32) {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
    }
}

impl fmt::Display for InterfaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mfr 0x{:08x} prod 0x{:08x} vid 0x{:08x} pid 0x{:08x}",
            self.ddbl1_manufacturer_id, self.ddbl1_product_id, self.vendor_id, self.product_id
        )
    }
}

/// Outcome of [`es2_fixup_vid_pid`].
#[derive(Debug)]
pub enum FixupOutcome {
    /// Not an ES2 bridge, or ids were already provided at hotplug.
    NotApplicable,
    /// Ids fetched from the bootrom and written to the record.
    Resolved { vendor_id: u32, product_id: u32 },
    /// Query failed; record left untouched.
    Failed(TransportError),
}

impl FixupOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, FixupOutcome::Resolved { .. })
    }
}

/// Whether `identity` is an ES2 interface still carrying placeholder ids.
pub fn needs_vid_pid_fixup<I: IdentityRecord + ?Sized>(identity: &I) -> bool {
    identity.ddbl1_manufacturer_id() == ES2_DDBL1_MFR_ID
        && identity.ddbl1_product_id() == ES2_DDBL1_PROD_ID
        && identity.vendor_id() == 0
        && identity.product_id() == 0
}

/// Fetch VID/PID from the bootrom for ES2 interfaces that enumerated without them.
///
/// Failure is logged and otherwise ignored; connection setup goes on with the
/// zero ids. Observers reading the identity before this runs see the zeros.
#[instrument(skip_all, fields(cport = connection.cport_id()))]
pub fn es2_fixup_vid_pid<C, I, O>(connection: &C, identity: &mut I, observer: &O) -> FixupOutcome
where
    C: Connection + ?Sized,
    I: IdentityRecord + ?Sized,
    O: FirmwareObserver + ?Sized,
{
    if !needs_vid_pid_fixup(identity) {
        debug!("Keeping VID/PID from hotplug");
        return FixupOutcome::NotApplicable;
    }

    let response = connection
        .operation_sync(GB_FIRMWARE_TYPE_GET_VID_PID, &[])
        .and_then(|payload| GetVidPidResponse::from_bytes(&payload).map_err(TransportError::from));

    match response {
        Ok(ids) => {
            identity.set_vendor_product(ids.vendor_id, ids.product_id);
            info!(
                vid = %format!("0x{:x}", ids.vendor_id),
                pid = %format!("0x{:x}", ids.product_id),
                "Firmware got VID/PID"
            );
            observer.on_event(&FirmwareEvent::IdentityResolved {
                vendor_id: ids.vendor_id,
                product_id: ids.product_id,
            });
            FixupOutcome::Resolved {
                vendor_id: ids.vendor_id,
                product_id: ids.product_id,
            }
        }
        Err(e) => {
            error!(error = %e, "Firmware get vid/pid operation failed");
            FixupOutcome::Failed(e)
        }
    }
}
