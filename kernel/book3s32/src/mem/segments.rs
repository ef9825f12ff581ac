//! Installation of the per address space segment registers
//!
//! When an address space becomes active, all segment registers that user addresses can select are loaded with the
//! VSIDs of that address space.
//! Because the VSIDs of one context only differ by [`SEGMENT_SKEW`] per segment, a single seed value (the segment
//! register 0 value of the context) is enough to compute all of them.

use super::vsid::SEGMENT_SKEW;
use super::{NUM_SEGMENTS, SEGMENT_SHIFT};
use crate::cpu::{MmuFeatures, SegmentRegisterWriter};
use bitflags::bitflags;

bitflags! {
    /// Flag bits of a segment register value
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct SegmentFlags: u32 {
        /// No execute
        const NX = 0x1000_0000;
        /// User (problem state) key
        const KP = 0x2000_0000;
        /// Supervisor key
        const KS = 0x4000_0000;
    }
}

/// Mask applied to a seed value before the per segment skew is added.
///
/// Bits 24-27 sit between the VSID and the flags and are cleared so that the skew never carries into the flags.
pub const SEGMENT_SEED_MASK: u32 = 0xf0ff_ffff;

/// Whether `segment` covers any effective address below `task_size`
#[inline]
pub const fn is_user_segment(segment: usize, task_size: u64) -> bool {
    ((segment as u64) << SEGMENT_SHIFT) < task_size
}

/// Compute the values of all 16 segment registers from a seed
pub fn segment_values(seed: u32) -> [u32; NUM_SEGMENTS] {
    let seed = seed & SEGMENT_SEED_MASK;
    core::array::from_fn(|segment| seed.wrapping_add(segment as u32 * SEGMENT_SKEW))
}

/// Loads the segment registers of user address spaces.
///
/// Which segments are user segments and whether a synchronizing instruction is needed after loading them is decided
/// once when the installer is created.
pub struct SegmentInstaller<W> {
    writer: W,
    user_segments: usize,
    sync: bool,
}

impl<W: SegmentRegisterWriter> SegmentInstaller<W> {
    /// Create an installer for user address spaces ending at `task_size`.
    ///
    /// The `isync` after loading the registers is only issued by builds supporting 604-class cores and only when
    /// running on a hash table MMU. 603-class cores don't need it.
    pub fn new(writer: W, task_size: u64, features: MmuFeatures) -> Self {
        let user_segments = (0..NUM_SEGMENTS)
            .take_while(|&segment| is_user_segment(segment, task_size))
            .count();
        let sync = cfg!(feature = "book3s-604") && features.contains(MmuFeatures::HPTE_TABLE);
        log::debug!("{user_segments} user segments, isync after update: {sync}");

        Self {
            writer,
            user_segments,
            sync,
        }
    }

    /// How many segment registers are loaded per context switch
    pub fn user_segments(&self) -> usize {
        self.user_segments
    }

    pub fn syncs(&self) -> bool {
        self.sync
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Load all user segment registers from `seed`, lowest segment first.
    ///
    /// Segment `n` receives `(seed & 0xf0ffffff) + n * 0x111`.
    /// Segments above the user address ceiling are left untouched since no user address can select them.
    ///
    /// # Safety
    /// This switches the active user address space.
    /// The caller must ensure that this is not interrupted by anything else touching the segment registers of this
    /// core and that no reference into the previous user address space is used afterwards.
    pub unsafe fn install_context(&mut self, seed: u32) {
        for (segment, value) in segment_values(seed)
            .into_iter()
            .enumerate()
            .take(self.user_segments)
        {
            log::trace!("loading segment register {segment} with {value:#010x}");
            self.writer.write_segment(segment, value);
        }
        if self.sync {
            self.writer.isync();
        }
    }
}
