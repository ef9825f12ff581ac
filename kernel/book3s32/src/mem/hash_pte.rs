use super::addr::{abbreviated_page_index, PAddr, VAddr, API_BITS, PAGE_OFFSET_BITS};
use super::vsid::{Vsid, VSID_BITS};
use bitflags::bitflags;
use core::fmt::{Binary, Debug, Formatter, LowerHex, UpperHex, Write};
use static_assertions::{assert_eq_size, const_assert_eq};
use thiserror_no_std::Error;

/// An entry of the hardware hash page table, translating one page of one VSID.
///
/// # Format
/// The entry consists of two big-endian 32-bit words.
/// `XPN` and `X` are only used by processors with extended (36-bit) physical addressing.
/// Otherwise those bits are reserved and must be zero.
///
/// ```text
///   0  1                        24  25  26    31
/// ┌───┬───────────────────────────┬───┬─────────┐
/// │ V │           VSID            │ H │   API   │   word 0
/// └───┴───────────────────────────┴───┴─────────┘
///  1bit          24bit             1bit   6bit
///
///   0                   19 20  22  23  24  25  26  27  28  29  30 31
/// ┌───────────────────────┬──────┬───┬───┬───┬───┬───┬───┬───┬────┐
/// │          RPN          │ XPN  │ R │ C │ W │ I │ M │ G │ X │ PP │   word 1
/// └───────────────────────┴──────┴───┴───┴───┴───┴───┴───┴───┴────┘
///          20bit           3bit                                2bit
/// ```
///
/// The layout is a hardware contract which is why it is encoded explicitly instead of relying on the compiler's
/// bitfield order.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
#[repr(C, align(8))]
pub struct HashPte {
    hi: u32,
    lo: u32,
}

assert_eq_size!(HashPte, u64);

const HI_VALID: u32 = 1 << 31;
const HI_VSID_OFFSET: u32 = 7;
const HI_VSID_MASK: u32 = ((1 << VSID_BITS) - 1) << HI_VSID_OFFSET;
const HI_HASH: u32 = 1 << 6;
const HI_API_MASK: u32 = (1 << API_BITS) - 1;

const_assert_eq!(HI_VALID | HI_VSID_MASK | HI_HASH | HI_API_MASK, u32::MAX);

const LO_RPN_OFFSET: u32 = 12;
const LO_RPN_BITS: u32 = 20;
const LO_RPN_MASK: u32 = ((1 << LO_RPN_BITS) - 1) << LO_RPN_OFFSET;
const LO_XPN_OFFSET: u32 = 9;
const LO_XPN_MASK: u32 = 0b111 << LO_XPN_OFFSET;
const LO_X: u32 = 1 << 2;
const LO_PP_MASK: u32 = 0b11;

/// Bits of word 1 that only carry meaning with extended physical addressing
const LO_EXTENDED_MASK: u32 = LO_XPN_MASK | LO_X;

const_assert_eq!(
    LO_RPN_MASK | LO_EXTENDED_MASK | PteFlags::all().bits() | LO_PP_MASK,
    u32::MAX
);

/// How many bits wide a physical page number may be
#[cfg(feature = "phys-64bit")]
pub const PPN_BITS: u32 = LO_RPN_BITS + 4;
/// How many bits wide a physical page number may be
#[cfg(not(feature = "phys-64bit"))]
pub const PPN_BITS: u32 = LO_RPN_BITS;

const PPN_MAX: u32 = (1 << PPN_BITS) - 1;

bitflags! {
    /// Storage access and history flags of a [`HashPte`].
    ///
    /// The bit positions are the ones used in word 1 of the entry.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct PteFlags: u32 {
        /// Set by the MMU when the page has been accessed
        const Referenced = 1 << 8;
        /// Set by the MMU when the page has been written to
        const Changed = 1 << 7;
        /// Stores are written through to memory
        const WriteThrough = 1 << 6;
        /// Accesses bypass the cache
        const CacheInhibited = 1 << 5;
        /// Memory coherence is enforced by hardware
        const Coherent = 1 << 4;
        /// No speculative accesses are performed to the page
        const Guarded = 1 << 3;

        const WIMG = Self::WriteThrough.bits() | Self::CacheInhibited.bits() | Self::Coherent.bits() | Self::Guarded.bits();
    }
}

impl Debug for PteFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        fn write_bit(
            flags: PteFlags,
            bit: PteFlags,
            c: char,
            f: &mut Formatter<'_>,
        ) -> core::fmt::Result {
            if flags.contains(bit) {
                f.write_char(c)
            } else {
                f.write_char(' ')
            }
        }
        write_bit(*self, PteFlags::Referenced, 'R', f)?;
        write_bit(*self, PteFlags::Changed, 'C', f)?;
        write_bit(*self, PteFlags::WriteThrough, 'W', f)?;
        write_bit(*self, PteFlags::CacheInhibited, 'I', f)?;
        write_bit(*self, PteFlags::Coherent, 'M', f)?;
        write_bit(*self, PteFlags::Guarded, 'G', f)?;
        Ok(())
    }
}

/// Which kind of access a privilege level is granted on a page
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    None,
    Read,
    ReadWrite,
}

/// The 2-bit page protection code of a [`HashPte`].
///
/// The meaning assumes supervisor key `Ks = 0` and user key `Kp = 1` in the segment register.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum PageProtection {
    /// Supervisor read/write, user none
    RwNone = 0,
    /// Supervisor read/write, user read
    RwRead = 1,
    /// Supervisor read/write, user read/write
    RwRw = 2,
    /// Supervisor read, user read
    ReadRead = 3,
}

impl PageProtection {
    fn from_bits(bits: u32) -> Self {
        match bits & LO_PP_MASK {
            0 => Self::RwNone,
            1 => Self::RwRead,
            2 => Self::RwRw,
            _ => Self::ReadRead,
        }
    }

    pub fn supervisor_access(self) -> Access {
        match self {
            Self::ReadRead => Access::Read,
            _ => Access::ReadWrite,
        }
    }

    pub fn user_access(self) -> Access {
        match self {
            Self::RwNone => Access::None,
            Self::RwRead | Self::ReadRead => Access::Read,
            Self::RwRw => Access::ReadWrite,
        }
    }
}

/// Errors that can occur when encoding or decoding a [`HashPte`]
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PteError {
    /// A field value does not fit into the bits the hardware reserves for it
    #[error("{field} value {value:#x} does not fit into {bits} bits")]
    FieldTooWide {
        field: &'static str,
        value: u32,
        bits: u32,
    },
    /// A raw entry has bits set that are reserved on this platform
    #[error("reserved bits {bits:#x} are set in word {word} of the entry")]
    ReservedBitsSet { word: u8, bits: u32 },
}

/// The decoded content of a [`HashPte`]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HashPteFields {
    pub valid: bool,
    pub vsid: Vsid,
    /// Whether the entry was placed using the secondary hash function
    pub hash_select: bool,
    /// Abbreviated page index, 6 bit
    pub api: u8,
    /// Physical page number, [`PPN_BITS`] wide
    pub ppn: u32,
    pub flags: PteFlags,
    pub pp: PageProtection,
}

impl HashPte {
    /// An entry that is not valid and translates nothing
    pub const fn empty() -> Self {
        Self { hi: 0, lo: 0 }
    }

    /// Encode the given fields into an entry.
    ///
    /// Values that do not fit into their field are rejected instead of being truncated.
    pub fn encode(fields: &HashPteFields) -> Result<Self, PteError> {
        if (fields.api as u32) > HI_API_MASK {
            return Err(PteError::FieldTooWide {
                field: "api",
                value: fields.api as u32,
                bits: API_BITS,
            });
        }
        if fields.ppn > PPN_MAX {
            return Err(PteError::FieldTooWide {
                field: "ppn",
                value: fields.ppn,
                bits: PPN_BITS,
            });
        }
        let unknown_flags = fields.flags.bits() & !PteFlags::all().bits();
        if unknown_flags != 0 {
            return Err(PteError::FieldTooWide {
                field: "flags",
                value: fields.flags.bits(),
                bits: 6,
            });
        }

        let mut hi = (fields.vsid.raw() << HI_VSID_OFFSET) | fields.api as u32;
        if fields.valid {
            hi |= HI_VALID;
        }
        if fields.hash_select {
            hi |= HI_HASH;
        }

        let lo = encode_ppn(fields.ppn) | fields.flags.bits() | fields.pp as u32;

        log::trace!("encoded hash pte {fields:?} as {hi:08x}_{lo:08x}");
        Ok(Self { hi, lo })
    }

    /// Decode a raw 64-bit entry (word 0 in the upper half) into its fields.
    ///
    /// Entries with reserved bits set are rejected.
    pub fn decode(raw: u64) -> Result<HashPteFields, PteError> {
        Ok(Self::from_raw(raw)?.fields())
    }

    /// Wrap a raw 64-bit entry after checking that no reserved bits are set
    pub fn from_raw(raw: u64) -> Result<Self, PteError> {
        let hi = (raw >> 32) as u32;
        let lo = raw as u32;
        let reserved = lo & reserved_lo_bits();
        if reserved != 0 {
            return Err(PteError::ReservedBitsSet {
                word: 1,
                bits: reserved,
            });
        }
        Ok(Self { hi, lo })
    }

    /// The raw 64-bit representation with word 0 in the upper half
    pub fn raw(&self) -> u64 {
        (self.hi as u64) << 32 | self.lo as u64
    }

    pub fn fields(&self) -> HashPteFields {
        HashPteFields {
            valid: self.is_valid(),
            vsid: self.vsid(),
            hash_select: self.hi & HI_HASH != 0,
            api: (self.hi & HI_API_MASK) as u8,
            ppn: self.ppn(),
            flags: self.flags(),
            pp: self.protection(),
        }
    }

    /// Whether this entry is currently valid (in other words whether the MMU uses it)
    pub fn is_valid(&self) -> bool {
        self.hi & HI_VALID != 0
    }

    pub fn vsid(&self) -> Vsid {
        Vsid::from_masked((self.hi & HI_VSID_MASK) >> HI_VSID_OFFSET)
    }

    /// Return the physical page number which this entry translates to
    pub fn ppn(&self) -> u32 {
        decode_ppn(self.lo)
    }

    /// Return the physical address of the page which this entry translates to
    pub fn phys_addr(&self) -> PAddr {
        (self.ppn() as PAddr) << PAGE_OFFSET_BITS
    }

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.lo)
    }

    pub fn protection(&self) -> PageProtection {
        PageProtection::from_bits(self.lo)
    }

    /// Whether this entry is a hit for a lookup of `ea` with the given VSID through the primary
    /// (`secondary = false`) or secondary hash function.
    pub fn matches(&self, vsid: Vsid, ea: VAddr, secondary: bool) -> bool {
        let expected = HI_VALID
            | (vsid.raw() << HI_VSID_OFFSET)
            | if secondary { HI_HASH } else { 0 }
            | abbreviated_page_index(ea) as u32;
        self.hi == expected
    }
}

#[cfg(feature = "phys-64bit")]
const fn reserved_lo_bits() -> u32 {
    0
}

#[cfg(not(feature = "phys-64bit"))]
const fn reserved_lo_bits() -> u32 {
    LO_EXTENDED_MASK
}

/// Split a physical page number into the RPN, XPN and X fields of word 1.
///
/// XPN holds the 3 most significant bits of a 24-bit page number and X the one after them.
fn encode_ppn(ppn: u32) -> u32 {
    let rpn = (ppn << LO_RPN_OFFSET) & LO_RPN_MASK;
    let x = if ppn & (1 << LO_RPN_BITS) != 0 {
        LO_X
    } else {
        0
    };
    let xpn = ((ppn >> (LO_RPN_BITS + 1)) << LO_XPN_OFFSET) & LO_XPN_MASK;
    rpn | x | xpn
}

fn decode_ppn(lo: u32) -> u32 {
    let rpn = (lo & LO_RPN_MASK) >> LO_RPN_OFFSET;
    let x = if lo & LO_X != 0 { 1 << LO_RPN_BITS } else { 0 };
    let xpn = ((lo & LO_XPN_MASK) >> LO_XPN_OFFSET) << (LO_RPN_BITS + 1);
    rpn | x | xpn
}

impl Debug for HashPte {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if !self.is_valid() {
            return f.write_str("HashPte (invalid) { .. }");
        }
        f.write_fmt(format_args!(
            "HashPte {{ vsid: {:06x}, h: {}, api: {:02x}, ppn: {:06x}, flags: {:?}, pp: {:?} }}",
            self.vsid(),
            (self.hi & HI_HASH != 0) as u8,
            self.hi & HI_API_MASK,
            self.ppn(),
            self.flags(),
            self.protection()
        ))
    }
}

impl Binary for HashPte {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Binary::fmt(&self.raw(), f)
    }
}

impl LowerHex for HashPte {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        LowerHex::fmt(&self.raw(), f)
    }
}

impl UpperHex for HashPte {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        UpperHex::fmt(&self.raw(), f)
    }
}
