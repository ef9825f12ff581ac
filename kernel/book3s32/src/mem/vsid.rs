//! Mapping of address space contexts to virtual segment ids
//!
//! Both the context and the effective segment number are skewed in order to spread the entries of different segments
//! and different address spaces over the whole hash table.
//! Whoever recomputes a VSID from a faulting address (the hash table walk) must use [`compute_vsid`] as well,
//! otherwise every lookup silently misses.

use super::addr::{effective_segment, VAddr};
use core::fmt::{Debug, Formatter, LowerHex};
use static_assertions::const_assert_eq;

/// Skew applied to the context id
pub const CONTEXT_SKEW: u32 = 897 * 16;

/// Skew applied to the effective segment number
pub const SEGMENT_SKEW: u32 = 0x111;

pub(crate) const VSID_BITS: u32 = 24;

/// Mask of all bits that make up a VSID
pub const VSID_MASK: u32 = (1 << VSID_BITS) - 1;

const_assert_eq!(VSID_MASK, 0x00ff_ffff);

/// A 24-bit virtual segment id.
///
/// Distinct `(context, segment)` pairs may well map to the same VSID.
/// That is a normal hash table property and handled by the secondary hash, not an error.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Vsid(u32);

impl Vsid {
    /// Wrap a raw value, returning `None` if it does not fit into 24 bits
    pub const fn try_from_raw(raw: u32) -> Option<Self> {
        if raw & !VSID_MASK != 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    #[inline]
    pub(crate) const fn from_masked(raw: u32) -> Self {
        Self(raw & VSID_MASK)
    }

    /// The raw 24-bit value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Debug for Vsid {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("Vsid({:#08x})", self.0))
    }
}

impl LowerHex for Vsid {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

/// Compute the VSID of segment `segment` (0-15) of the address space identified by `context`.
///
/// This is pure arithmetic and never fails; the result is truncated to 24 bits.
/// Only the low 4 bits of `segment` are used, just like only the top 4 bits of an effective address select a segment.
#[inline]
pub const fn compute_vsid(context: u32, segment: usize) -> Vsid {
    let segment = (segment % super::NUM_SEGMENTS) as u32;
    Vsid::from_masked(
        context
            .wrapping_mul(CONTEXT_SKEW)
            .wrapping_add(segment.wrapping_mul(SEGMENT_SKEW)),
    )
}

/// Compute the VSID which translates `ea` in the address space identified by `context`
#[inline]
pub fn vsid_for_ea(context: u32, ea: VAddr) -> Vsid {
    compute_vsid(context, effective_segment(ea))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_vsids() {
        assert_eq!(compute_vsid(0, 0).raw(), 0);
        assert_eq!(compute_vsid(0, 15).raw(), 0xfff);
        assert_eq!(compute_vsid(1, 0).raw(), 0x3810);
        assert_eq!(compute_vsid(1, 1).raw(), 0x3921);
        assert_eq!(compute_vsid(2, 4).raw(), 0x7464);
        assert_eq!(compute_vsid(4095, 0).raw(), 0x80_c7f0);
        assert_eq!(compute_vsid(32767, 15).raw(), 0x07_d7ef);
    }

    #[test]
    fn test_vsid_is_always_24_bit() {
        for context in [0, 1, 0x1234, 0xffff, 0x00ff_ffff, 0x8000_0000, u32::MAX] {
            for segment in 0..16 {
                let vsid = compute_vsid(context, segment);
                assert!(vsid.raw() <= VSID_MASK);
                assert_eq!(vsid, compute_vsid(context, segment));
            }
        }
    }

    #[test]
    fn test_adjacent_segments_differ_by_skew() {
        for segment in 1..16 {
            assert_eq!(
                compute_vsid(7, segment).raw() - compute_vsid(7, segment - 1).raw(),
                SEGMENT_SKEW
            );
        }
    }

    #[test]
    fn test_no_collisions_among_live_contexts() {
        let mut seen = HashSet::new();
        for context in 0..4096 {
            for segment in 0..16 {
                seen.insert(compute_vsid(context, segment));
            }
        }
        assert_eq!(seen.len(), 4096 * 16);
    }

    #[test]
    fn test_vsid_for_ea_uses_top_nibble() {
        assert_eq!(vsid_for_ea(3, 0x3000_1234), compute_vsid(3, 3));
        assert_eq!(vsid_for_ea(3, 0xffff_ffff), compute_vsid(3, 15));
    }

    #[test]
    fn test_segment_number_is_masked() {
        assert_eq!(compute_vsid(9, 16), compute_vsid(9, 0));
        assert_eq!(compute_vsid(9, 0x1f), compute_vsid(9, 15));
        assert_eq!(compute_vsid(9, usize::MAX), compute_vsid(9, 15));
    }

    #[test]
    fn test_raw_values_are_range_checked() {
        assert_eq!(Vsid::try_from_raw(0xff_ffff).map(Vsid::raw), Some(0xff_ffff));
        assert_eq!(Vsid::try_from_raw(0x100_0000), None);
    }
}
