//! Firmware file naming.

use crate::identity::IdentityRecord;

/// File name extension of firmware blobs (TFTF container).
pub const FIRMWARE_EXTENSION: &str = "tftf";

/// Name of the firmware blob for `identity` at boot `stage`.
///
/// `ara_<mfr>_<bridge prod>_<vid>_<pid>_<stage>.tftf`, ids as eight lower
/// case hex digits and the stage as two.
pub fn firmware_name<I: IdentityRecord + ?Sized>(identity: &I, stage: u8) -> String {
    format!(
        "ara_{:08x}_{:08x}_{:08x}_{:08x}_{:02x}.{}",
        identity.ddbl1_manufacturer_id(),
        identity.ddbl1_product_id(),
        identity.vendor_id(),
        identity.product_id(),
        stage,
        FIRMWARE_EXTENSION
    )
}
