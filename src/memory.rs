//! Memory size normalization.

use crate::pb::memory::Unit;
use crate::pb::Memory;

/// Returns the power-of-two shift that converts one `unit` into bits.
///
/// `None` for units that have no defined size.
pub fn bit_shift(unit: Unit) -> Option<u32> {
    match unit {
        Unit::Bit => Some(0),
        Unit::Byte => Some(3),
        Unit::Kilobyte => Some(13),
        Unit::Megabyte => Some(23),
        Unit::Gigabyte => Some(33),
        Unit::Terabyte => Some(43),
        Unit::Unknown => None,
    }
}

/// Normalizes a memory size to bits.
///
/// Unrecognized units normalize to zero. Sizes past `u64::MAX` bits saturate.
pub fn to_bits(memory: &Memory) -> u64 {
    match bit_shift(memory.unit()) {
        Some(shift) => memory.value.saturating_mul(1u64 << shift),
        None => 0,
    }
}
