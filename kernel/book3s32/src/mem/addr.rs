/// Type alias for effective (virtual) addresses.
pub type VAddr = u32;

/// Type alias for physical addresses.
///
/// Physical addresses may be wider than 32 bit when built with extended addressing.
pub type PAddr = u64;

pub(crate) const PAGE_OFFSET_BITS: u32 = 12;
pub(crate) const PAGE_OFFSET_MASK: u32 = (1 << PAGE_OFFSET_BITS) - 1;

pub(crate) const PAGE_INDEX_BITS: u32 = 16;
pub(crate) const PAGE_INDEX_MASK: u32 = ((1 << PAGE_INDEX_BITS) - 1) << PAGE_OFFSET_BITS;

/// The effective address bit at which the segment number starts
pub const SEGMENT_SHIFT: u32 = PAGE_OFFSET_BITS + PAGE_INDEX_BITS;

pub(crate) const API_BITS: u32 = 6;

/// Get the effective segment number (the top 4 bits) of an effective address
#[inline]
pub fn effective_segment(ea: VAddr) -> usize {
    (ea >> SEGMENT_SHIFT) as usize
}

/// Get the page index of an effective address inside its segment
#[inline]
pub fn page_index(ea: VAddr) -> u32 {
    (ea & PAGE_INDEX_MASK) >> PAGE_OFFSET_BITS
}

/// Get the abbreviated page index of an effective address.
///
/// These are the most significant 6 bits of the page index which are stored in a [`HashPte`](super::HashPte) to tell
/// apart the entries of one VSID that hash to the same group.
#[inline]
pub fn abbreviated_page_index(ea: VAddr) -> u8 {
    (page_index(ea) >> (PAGE_INDEX_BITS - API_BITS)) as u8
}

/// Get the page offset from an effective address
#[inline]
pub fn page_offset(ea: VAddr) -> u32 {
    ea & PAGE_OFFSET_MASK
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_effective_address_is_split() {
        let ea = 0xc012_3456;
        assert_eq!(effective_segment(ea), 0xc);
        assert_eq!(page_index(ea), 0x0123);
        assert_eq!(page_offset(ea), 0x456);
    }

    #[test]
    fn test_api_is_top_of_page_index() {
        assert_eq!(abbreviated_page_index(0x0fff_f000), 0x3f);
        assert_eq!(abbreviated_page_index(0x0040_0000), 0x01);
        assert_eq!(abbreviated_page_index(0x003f_f000), 0x00);
    }
}
