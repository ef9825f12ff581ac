//! Block address translation
//!
//! A BAT maps a naturally aligned block of 128 KiB up to 256 MiB directly from an effective to a physical address,
//! bypassing segment registers and the hash table.
//! The processor only has a few of them (4 or 8 instruction/data pairs) which is why they are reserved for large
//! fixed mappings like the kernel's linear mapping of RAM.
//!
//! This module only computes register contents and keeps them in a [`BatTable`].
//! Loading the table into the actual special purpose registers is done by the early boot code.

use super::addr::{PAddr, VAddr};
use crate::cpu::MmuFeatures;
use bitflags::bitflags;
use core::cmp::min;
use core::fmt::{Debug, Formatter};
use static_assertions::{assert_eq_size, const_assert_eq};
use thiserror_no_std::Error;

/// How many instruction/data BAT pairs the largest processors of the family have
pub const MAX_BATS: usize = 8;

/// How many instruction/data BAT pairs every processor of the family has
pub const BASE_BATS: usize = 4;

const BLOCK_SHIFT: u32 = 17;

/// Errors that can occur when selecting or programming a BAT
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BatError {
    /// No supported block size fits into the range
    #[error("the range {base:#x}..{top:#x} is too small to be mapped by a BAT")]
    RangeTooSmall { base: PAddr, top: PAddr },
    /// The physical address cannot be expressed in the BRPN field
    #[error("physical address {0:#x} cannot be represented in a BAT")]
    UnrepresentableAddress(PAddr),
    /// An address is not aligned to the size of the block that should map it
    #[error("address {addr:#x} is not aligned to the block size {size:#x}")]
    UnalignedAddress { addr: PAddr, size: u64 },
    /// All BATs are already in use
    #[error("no free BAT is available")]
    NoFreeBat,
    /// The BAT index does not exist on this processor
    #[error("BAT {0} does not exist on this processor")]
    IndexOutOfRange(usize),
}

/// The supported BAT block sizes.
///
/// The discriminant is the `BL` mask that is written into the upper BAT register.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u32)]
pub enum BlockSize {
    Size128K = 0x000,
    Size256K = 0x001,
    Size512K = 0x003,
    Size1M = 0x007,
    Size2M = 0x00f,
    Size4M = 0x01f,
    Size8M = 0x03f,
    Size16M = 0x07f,
    Size32M = 0x0ff,
    Size64M = 0x1ff,
    Size128M = 0x3ff,
    Size256M = 0x7ff,
}

impl BlockSize {
    /// All block sizes in ascending order
    pub const ALL: [BlockSize; 12] = [
        Self::Size128K,
        Self::Size256K,
        Self::Size512K,
        Self::Size1M,
        Self::Size2M,
        Self::Size4M,
        Self::Size8M,
        Self::Size16M,
        Self::Size32M,
        Self::Size64M,
        Self::Size128M,
        Self::Size256M,
    ];

    pub const MIN: BlockSize = Self::Size128K;
    pub const MAX: BlockSize = Self::Size256M;

    /// The `BL` mask of this block size
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// How many bytes a block of this size covers
    #[inline]
    pub const fn bytes(self) -> u64 {
        ((self.code() as u64) + 1) << BLOCK_SHIFT
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|size| size.code() == code)
    }

    /// Return the block size covering exactly `bytes`, if there is one
    pub fn from_bytes(bytes: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|size| size.bytes() == bytes)
    }
}

const_assert_eq!(BlockSize::MIN.bytes(), 128 << 10);
const_assert_eq!(BlockSize::MAX.bytes(), 256 << 20);

/// Select the largest block that can map the start of the physical range `base..top`.
///
/// The block must neither extend beyond `top` nor be larger than the alignment of `base` allows, so the result is the
/// smallest of the maximum block size, the largest power of two that `base` is aligned to and the largest power of
/// two not exceeding `top - base`.
///
/// Fails if the result would be smaller than the smallest supported block.
pub fn select_block_size(base: PAddr, top: PAddr) -> Result<BlockSize, BatError> {
    if top <= base {
        return Err(BatError::RangeTooSmall { base, top });
    }

    let base_align = if base == 0 {
        u64::MAX
    } else {
        1 << base.trailing_zeros()
    };
    let len = top - base;
    let fitting = 1 << (u64::BITS - 1 - len.leading_zeros());
    let size = min(BlockSize::MAX.bytes(), min(base_align, fitting));

    BlockSize::from_bytes(size).ok_or(BatError::RangeTooSmall { base, top })
}

/// Physical address bits that can be stored in a BAT
#[cfg(feature = "phys-64bit")]
pub const BAT_PHYS_MASK: PAddr = 0x0000_000f_fffe_0000;
/// Physical address bits that can be stored in a BAT
#[cfg(not(feature = "phys-64bit"))]
pub const BAT_PHYS_MASK: PAddr = 0x0000_0000_fffe_0000;

const BRPN_MASK: u64 = 0xfffe_0000;

/// Contort a physical address into the format of the BRPN field of a lower BAT register.
///
/// With extended addressing, physical address bits 33-35 are stored in register bits 9-11 and bit 32 in register
/// bit 2.
pub fn encode_bat_phys(addr: PAddr) -> Result<u32, BatError> {
    if addr & !BAT_PHYS_MASK != 0 {
        return Err(BatError::UnrepresentableAddress(addr));
    }
    Ok(fold_phys(addr))
}

#[cfg(feature = "phys-64bit")]
fn fold_phys(addr: PAddr) -> u32 {
    ((addr & BRPN_MASK)
        | ((addr & 0x0000_000e_0000_0000) >> 24)
        | ((addr & 0x0000_0001_0000_0000) >> 30)) as u32
}

#[cfg(not(feature = "phys-64bit"))]
fn fold_phys(addr: PAddr) -> u32 {
    addr as u32
}

/// Reconstruct the physical address stored in a lower BAT register.
///
/// All bits that do not belong to the physical address are ignored.
#[cfg(feature = "phys-64bit")]
pub fn decode_bat_phys(bits: u32) -> PAddr {
    let bits = bits as u64;
    (bits & BRPN_MASK) | ((bits << 24) & 0x0000_000e_0000_0000) | ((bits << 30) & 0x0000_0001_0000_0000)
}

/// Reconstruct the physical address stored in a lower BAT register.
///
/// All bits that do not belong to the physical address are ignored.
#[cfg(not(feature = "phys-64bit"))]
pub fn decode_bat_phys(bits: u32) -> PAddr {
    bits as u64 & BRPN_MASK
}

/// Access protection of a block
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum BatProtection {
    None = 0,
    ReadOnly = 1,
    ReadWrite = 2,
}

bitflags! {
    /// Attributes requested for a block mapping.
    ///
    /// The WIMG bits are at the positions used in the lower BAT register.
    /// The remaining flags describe the access that should be granted and are translated into valid and protection
    /// bits.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct BatFlags: u32 {
        const WriteThrough = 1 << 6;
        const CacheInhibited = 1 << 5;
        const Coherent = 1 << 4;
        const Guarded = 1 << 3;

        /// Allow writing to the block
        const Write = 1 << 8;
        /// Make the block accessible from user mode
        const User = 1 << 9;
        /// Allow executing from the block (also programs the instruction BAT)
        const Exec = 1 << 10;

        const WIMG = Self::WriteThrough.bits() | Self::CacheInhibited.bits() | Self::Coherent.bits() | Self::Guarded.bits();
    }
}

impl BatFlags {
    /// Flags used for mapping kernel RAM
    pub const KERNEL_RWX: BatFlags = BatFlags::Write
        .union(BatFlags::Exec)
        .union(BatFlags::Coherent);
}

const UPPER_BEPI_MASK: u32 = 0xfffe_0000;
const UPPER_BL_OFFSET: u32 = 2;
const UPPER_BL_MASK: u32 = 0x7ff << UPPER_BL_OFFSET;
/// Valid in supervisor mode
const UPPER_VS: u32 = 1 << 1;
/// Valid in user mode
const UPPER_VP: u32 = 1 << 0;
const LOWER_PP_MASK: u32 = 0b11;

/// One upper/lower BAT register pair.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
#[repr(C)]
pub struct BatRegisterPair {
    pub upper: u32,
    pub lower: u32,
}

assert_eq_size!(BatRegisterPair, u64);

impl BatRegisterPair {
    pub const fn empty() -> Self {
        Self { upper: 0, lower: 0 }
    }

    /// Whether the block is valid in supervisor or user mode
    pub fn is_valid(&self) -> bool {
        self.upper & (UPPER_VS | UPPER_VP) != 0
    }

    pub fn is_user_valid(&self) -> bool {
        self.upper & UPPER_VP != 0
    }

    /// Effective address at which the block starts
    pub fn virt_base(&self) -> VAddr {
        self.upper & UPPER_BEPI_MASK
    }

    /// Physical address at which the block starts
    pub fn phys_base(&self) -> PAddr {
        decode_bat_phys(self.lower)
    }

    pub fn block_size(&self) -> Option<BlockSize> {
        BlockSize::from_code((self.upper & UPPER_BL_MASK) >> UPPER_BL_OFFSET)
    }

    pub fn wimg(&self) -> BatFlags {
        BatFlags::from_bits_truncate(self.lower) & BatFlags::WIMG
    }

    pub fn protection(&self) -> BatProtection {
        match self.lower & LOWER_PP_MASK {
            0 => BatProtection::None,
            1 | 3 => BatProtection::ReadOnly,
            _ => BatProtection::ReadWrite,
        }
    }

    /// Whether `va` lies inside the block of a valid BAT
    fn covers_virt(&self, va: VAddr) -> bool {
        match self.block_size() {
            Some(size) if self.is_valid() => {
                let offset = va.wrapping_sub(self.virt_base()) as u64;
                va >= self.virt_base() && offset < size.bytes()
            }
            _ => false,
        }
    }

    /// Whether `pa` lies inside the block of a valid BAT
    fn covers_phys(&self, pa: PAddr) -> bool {
        match self.block_size() {
            Some(size) if self.is_valid() => {
                pa >= self.phys_base() && pa - self.phys_base() < size.bytes()
            }
            _ => false,
        }
    }
}

impl Debug for BatRegisterPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if !self.is_valid() {
            return f.write_str("BatRegisterPair (invalid) { .. }");
        }
        f.write_fmt(format_args!(
            "BatRegisterPair {{ virt: {:#010x}, phys: {:#x}, size: {:?}, wimg: {:?}, pp: {:?} }}",
            self.virt_base(),
            self.phys_base(),
            self.block_size(),
            self.wimg(),
            self.protection()
        ))
    }
}

/// The instruction and data BAT that share one index
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Bat {
    pub instruction: BatRegisterPair,
    pub data: BatRegisterPair,
}

/// Software copy of all BAT register pairs of the processor
pub struct BatTable {
    bats: [Bat; MAX_BATS],
    available: usize,
    coherent: bool,
}

impl BatTable {
    /// Create an empty table for a processor with the given features
    pub fn new(features: MmuFeatures) -> Self {
        Self {
            bats: [Bat::default(); MAX_BATS],
            available: if features.contains(MmuFeatures::USE_HIGH_BATS) {
                MAX_BATS
            } else {
                BASE_BATS
            },
            coherent: features.contains(MmuFeatures::NEED_COHERENT),
        }
    }

    /// How many BATs the processor has
    pub fn available(&self) -> usize {
        self.available
    }

    /// The programmed BATs
    pub fn bats(&self) -> &[Bat] {
        &self.bats[..self.available]
    }

    pub fn get(&self, index: usize) -> Option<&Bat> {
        self.bats().get(index)
    }

    /// Return the index of the first BAT whose data half is not in use
    pub fn find_free_bat(&self) -> Option<usize> {
        self.bats().iter().position(|bat| !bat.data.is_valid())
    }

    /// Program BAT `index` (or the first free one if `None`) to map `size` bytes at `virt` to `phys`.
    ///
    /// Returns the index of the programmed BAT.
    pub fn set_bat(
        &mut self,
        index: Option<usize>,
        virt: VAddr,
        phys: PAddr,
        size: BlockSize,
        mut flags: BatFlags,
    ) -> Result<usize, BatError> {
        let index = match index {
            Some(index) if index >= self.available => return Err(BatError::IndexOutOfRange(index)),
            Some(index) => index,
            None => self.find_free_bat().ok_or_else(|| {
                log::error!("no BAT available for mapping {phys:#x}");
                BatError::NoFreeBat
            })?,
        };

        let align = size.bytes() - 1;
        if virt as u64 & align != 0 {
            return Err(BatError::UnalignedAddress {
                addr: virt as u64,
                size: size.bytes(),
            });
        }
        if phys & align != 0 {
            return Err(BatError::UnalignedAddress {
                addr: phys,
                size: size.bytes(),
            });
        }
        let brpn = encode_bat_phys(phys)?;

        if flags.contains(BatFlags::CacheInhibited) || !self.coherent {
            flags.remove(BatFlags::Coherent);
        }
        let pp = if flags.contains(BatFlags::Write) {
            BatProtection::ReadWrite
        } else {
            BatProtection::ReadOnly
        };

        let mut data = BatRegisterPair {
            upper: virt | (size.code() << UPPER_BL_OFFSET) | UPPER_VS,
            lower: brpn | (flags & BatFlags::WIMG).bits() | pp as u32,
        };
        if flags.contains(BatFlags::User) {
            data.upper |= UPPER_VP;
        }
        // guarded blocks must not be used for instruction fetches
        if flags.contains(BatFlags::Guarded) {
            flags.remove(BatFlags::Exec);
        }
        let instruction = if flags.contains(BatFlags::Exec) {
            data
        } else {
            BatRegisterPair::empty()
        };

        log::debug!(
            "setting BAT {index} to map {virt:#010x} -> {phys:#x} ({size:?}, {flags:?})"
        );
        self.bats[index] = Bat { instruction, data };
        Ok(index)
    }

    /// Invalidate BAT `index`
    pub fn clear_bat(&mut self, index: usize) -> Result<(), BatError> {
        if index >= self.available {
            return Err(BatError::IndexOutOfRange(index));
        }
        log::debug!("clearing BAT {index}");
        self.bats[index] = Bat::default();
        Ok(())
    }

    /// Map as much as possible of the physical range `base..top` at `virt_offset + base` using the largest blocks
    /// that fit.
    ///
    /// Stops when no BAT is left, the remainder is too small for a block or the next block would not fit below the top
    /// of the effective address space.
    /// Returns the physical address up to which the range has been mapped; the caller has to map the rest through
    /// the hash table.
    pub fn map_range(
        &mut self,
        virt_offset: VAddr,
        mut base: PAddr,
        top: PAddr,
        flags: BatFlags,
    ) -> PAddr {
        while base < top {
            let Some(index) = self.find_free_bat() else {
                break;
            };
            let Ok(size) = select_block_size(base, top) else {
                break;
            };
            let virt = (virt_offset as u64).checked_add(base).filter(|virt| {
                virt.checked_add(size.bytes())
                    .map_or(false, |end| end <= 1 << VAddr::BITS)
            });
            let Some(virt) = virt else {
                log::warn!("{base:#x} cannot be block mapped above {virt_offset:#010x}");
                break;
            };
            let virt = virt as VAddr;
            if let Err(e) = self.set_bat(Some(index), virt, base, size, flags) {
                log::warn!("cannot map {base:#x} using a BAT: {e}");
                break;
            }
            base += size.bytes();
        }

        if base < top {
            log::warn!("BATs only cover physical memory up to {base:#x} of {top:#x}");
        }
        base
    }

    /// Translate `va` if it is covered by a BAT
    pub fn virt_to_phys(&self, va: VAddr) -> Option<PAddr> {
        self.bats()
            .iter()
            .map(|bat| &bat.data)
            .find(|bat| bat.covers_virt(va))
            .map(|bat| bat.phys_base() + (va - bat.virt_base()) as PAddr)
    }

    /// Find the effective address at which `pa` is block mapped
    pub fn phys_to_virt(&self, pa: PAddr) -> Option<VAddr> {
        self.bats()
            .iter()
            .map(|bat| &bat.data)
            .find(|bat| bat.covers_phys(pa))
            .map(|bat| bat.virt_base() + (pa - bat.phys_base()) as VAddr)
    }
}
