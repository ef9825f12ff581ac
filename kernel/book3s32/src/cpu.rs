//! Handling of MMU related processor state
//!
//! Segment registers are per-core state that is only accessible through dedicated privileged instructions.
//! Code that programs them is written against [`SegmentRegisterWriter`] so that it can be exercised without the
//! actual hardware.

use bitflags::bitflags;

bitflags! {
    /// MMU capabilities of the processor the kernel runs on.
    ///
    /// These are probed once during early boot and then handed to the structures that depend on them.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct MmuFeatures: u32 {
        /// The MMU uses a hashed page table (as opposed to software loaded TLBs)
        const HPTE_TABLE = 1 << 0;
        /// The processor has 8 instead of 4 instruction/data BAT pairs
        const USE_HIGH_BATS = 1 << 1;
        /// Memory coherence has to be requested explicitly via the `M` bit
        const NEED_COHERENT = 1 << 2;
    }
}

/// The primitive of loading one segment register.
pub trait SegmentRegisterWriter {
    /// Load segment register `segment` (0-15) with `value`.
    ///
    /// # Safety
    /// Changing a segment register changes the translation of a whole 256 MiB slice of the address space.
    /// This can make other, completely unrelated, references and pointers invalid and must always be done with care.
    unsafe fn write_segment(&mut self, segment: usize, value: u32);

    /// Issue a context synchronizing instruction so that no stale segment register content is used afterwards.
    ///
    /// # Safety
    /// Must only be called in supervisor mode.
    unsafe fn isync(&mut self);
}

/// The segment registers of the executing core
#[cfg(target_arch = "powerpc")]
pub struct HardwareSegments {
    _private: (),
}

#[cfg(target_arch = "powerpc")]
impl HardwareSegments {
    /// # Safety
    /// There must only be one instance per core and it must not be used concurrently on the same core,
    /// for example by disabling interrupts around its use.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "powerpc")]
impl SegmentRegisterWriter for HardwareSegments {
    #[inline(always)]
    unsafe fn write_segment(&mut self, segment: usize, value: u32) {
        // mtsrin selects the register through the top 4 bits of an effective address
        let ea = (segment as u32) << crate::mem::SEGMENT_SHIFT;
        core::arch::asm!("mtsrin {0}, {1}", in(reg) value, in(reg) ea, options(nostack));
    }

    #[inline(always)]
    unsafe fn isync(&mut self) {
        core::arch::asm!("isync", options(nostack));
    }
}
