//! Device identifier canonicalization.
//!
//! A physical id's canonical textual form is 8 uppercase hex digits. Devices
//! in the `0x04xxxxxx` range are also addressable by the decimal value of
//! their low 24 bits (the user-facing number printed on the pile). The
//! control plane may send either form; everything internal uses the 8-hex
//! form.

use thiserror::Error;

/// Physical-id prefix of the decimally-addressable device family.
const DECIMAL_FAMILY_PREFIX: u32 = 0x0400_0000;

/// Largest user-facing decimal number (24 bits).
const DECIMAL_MAX: u32 = 0x00FF_FFFF;

/// A device id that is neither 8-hex nor a valid decimal number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bad device id: '{0}'")]
pub struct DeviceIdError(pub String);

/// Normalize a control-plane device id to the canonical 8-hex form.
///
/// Decimal input maps into the `0x04` family via the low 24 bits; an
/// all-digit string that does not fit 24 bits is treated as hex.
///
/// # Errors
///
/// [`DeviceIdError`] when the input is neither form.
pub fn canonical_device_id(input: &str) -> Result<String, DeviceIdError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DeviceIdError(input.to_string()));
    }

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(decimal) = trimmed.parse::<u32>() {
            if decimal <= DECIMAL_MAX {
                return Ok(format!("{:08X}", DECIMAL_FAMILY_PREFIX | decimal));
            }
        }
    }

    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(trimmed.to_ascii_uppercase());
    }

    Err(DeviceIdError(input.to_string()))
}

/// Canonical textual form of a physical id.
#[must_use]
pub fn device_id_of(physical_id: u32) -> String {
    format!("{physical_id:08X}")
}

/// Parse a canonical device id back to the physical id.
#[must_use]
pub fn physical_id_of(device_id: &str) -> Option<u32> {
    if device_id.len() != 8 {
        return None;
    }
    u32::from_str_radix(device_id, 16).ok()
}

/// User-facing decimal number, for devices in the `0x04` family only.
#[must_use]
pub fn decimal_id_of(physical_id: u32) -> Option<u32> {
    if physical_id & 0xFF00_0000 == DECIMAL_FAMILY_PREFIX {
        Some(physical_id & DECIMAL_MAX)
    } else {
        None
    }
}
