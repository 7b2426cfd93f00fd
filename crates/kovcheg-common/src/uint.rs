//! Range checks against unsigned field widths.
//!
//! ZIP records store sizes, counts and offsets in 16, 32 or 64 bit unsigned
//! fields. Before a value is encoded it must be checked against the width of
//! its field, and a failure names the field so the caller can report which
//! record was malformed.

use crate::{Error, Result};

/// Largest value of an unsigned 8 bit field.
pub const UINT8_MAX: u64 = u8::MAX as u64;
/// Largest value of an unsigned 16 bit field.
pub const UINT16_MAX: u64 = u16::MAX as u64;
/// Largest value of an unsigned 32 bit field.
pub const UINT32_MAX: u64 = u32::MAX as u64;

#[inline]
fn check(value: i128, max: u64, field: &'static str) -> Result<u64> {
    if value < 0 {
        return Err(Error::Negative { field, value });
    }
    if value > max as i128 {
        return Err(Error::OutOfRange { field, value, max });
    }
    Ok(value as u64)
}

/// Check that `value` fits an unsigned 8 bit field.
#[inline]
pub fn check_u8(value: impl Into<i128>, field: &'static str) -> Result<u8> {
    check(value.into(), UINT8_MAX, field).map(|v| v as u8)
}

/// Check that `value` fits an unsigned 16 bit field.
#[inline]
pub fn check_u16(value: impl Into<i128>, field: &'static str) -> Result<u16> {
    check(value.into(), UINT16_MAX, field).map(|v| v as u16)
}

/// Check that `value` fits an unsigned 32 bit field.
#[inline]
pub fn check_u32(value: impl Into<i128>, field: &'static str) -> Result<u32> {
    check(value.into(), UINT32_MAX, field).map(|v| v as u32)
}

/// Check that `value` fits an unsigned 64 bit field.
#[inline]
pub fn check_u64(value: impl Into<i128>, field: &'static str) -> Result<u64> {
    check(value.into(), u64::MAX, field)
}
