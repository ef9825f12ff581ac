//! Address space contexts
//!
//! Every address space is identified by a context id from which the VSIDs of all its segments are derived.
//! Two live address spaces sharing an id would silently share their translations, so ids are handed out by a
//! [`ContextIdAllocator`] which never returns an id that is still in use.

use super::addr::VAddr;
use super::segments::{SegmentFlags, SegmentInstaller};
use super::vsid::{compute_vsid, Vsid};
use crate::cpu::SegmentRegisterWriter;
use thiserror_no_std::Error;

pub type ContextId = u32;

/// Context used by the kernel itself, never handed out
pub const NO_CONTEXT: ContextId = 0;
pub const FIRST_CONTEXT: ContextId = 1;
pub const LAST_CONTEXT: ContextId = 32767;

const CONTEXT_COUNT: usize = LAST_CONTEXT as usize + 1;
const MAP_WORDS: usize = CONTEXT_COUNT / u64::BITS as usize;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ContextError {
    /// Every context id is in use
    #[error("all context ids are in use")]
    Exhausted,
    /// The context id is not currently allocated
    #[error("context {0} is not allocated")]
    NotAllocated(ContextId),
}

/// The MMU relevant state of one address space
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AddressSpaceContext {
    id: ContextId,
    sr0: u32,
    vdso: Option<VAddr>,
}

impl AddressSpaceContext {
    /// Create the context for address space `id`.
    ///
    /// `flags` are merged into the segment register values, usually [`SegmentFlags::NX`] to prevent the kernel
    /// from executing user pages and [`SegmentFlags::KS`] to prevent it from accessing them.
    pub fn new(id: ContextId, flags: SegmentFlags) -> Self {
        Self {
            id,
            sr0: compute_vsid(id, 0).raw() | flags.bits(),
            vdso: None,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The value of segment register 0 while this address space is active.
    ///
    /// This is the seed from which all other segment register values are derived.
    pub fn sr0(&self) -> u32 {
        self.sr0
    }

    pub fn vsid(&self, segment: usize) -> Vsid {
        compute_vsid(self.id, segment)
    }

    pub fn vdso(&self) -> Option<VAddr> {
        self.vdso
    }

    pub fn set_vdso(&mut self, vdso: VAddr) {
        self.vdso = Some(vdso);
    }

    /// Make this the active user address space of the executing core.
    ///
    /// # Safety
    /// See [`SegmentInstaller::install_context`].
    pub unsafe fn activate<W: SegmentRegisterWriter>(&self, installer: &mut SegmentInstaller<W>) {
        log::debug!("activating context {} (sr0 {:#010x})", self.id, self.sr0);
        installer.install_context(self.sr0);
    }
}

/// Hands out context ids in a round-robin fashion.
///
/// Callers must serialize access themselves, for example by holding the lock protecting address space creation.
pub struct ContextIdAllocator {
    map: [u64; MAP_WORDS],
    next: ContextId,
}

impl ContextIdAllocator {
    /// Create an allocator with all ids below [`FIRST_CONTEXT`] reserved
    pub const fn new() -> Self {
        let mut map = [0u64; MAP_WORDS];
        map[0] = (1 << FIRST_CONTEXT) - 1;
        Self {
            map,
            next: FIRST_CONTEXT,
        }
    }

    /// Whether `id` currently belongs to a live address space (or is reserved)
    pub fn is_live(&self, id: ContextId) -> bool {
        match self.map.get(id as usize / 64) {
            Some(&word) => word & (1 << (id % 64)) != 0,
            None => false,
        }
    }

    /// Allocate an unused context id
    pub fn alloc(&mut self) -> Result<ContextId, ContextError> {
        let id = (0..CONTEXT_COUNT as ContextId)
            .map(|offset| (self.next + offset) & LAST_CONTEXT)
            .find(|&id| !self.is_live(id))
            .ok_or(ContextError::Exhausted)?;

        self.map[id as usize / 64] |= 1 << (id % 64);
        self.next = (id + 1) & LAST_CONTEXT;
        log::trace!("allocated context {id}");
        Ok(id)
    }

    /// Release `id` so that it may be handed out again
    pub fn free(&mut self, id: ContextId) -> Result<(), ContextError> {
        if id < FIRST_CONTEXT || !self.is_live(id) {
            return Err(ContextError::NotAllocated(id));
        }
        self.map[id as usize / 64] &= !(1 << (id % 64));
        log::trace!("freed context {id}");
        Ok(())
    }
}

impl Default for ContextIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::boxed::Box;

    #[test]
    fn test_sr0_carries_vsid_and_flags() {
        let ctx = AddressSpaceContext::new(1, SegmentFlags::NX | SegmentFlags::KS);
        assert_eq!(ctx.sr0(), 0x5000_3810);
        assert_eq!(ctx.vsid(1).raw(), 0x3921);

        let ctx = AddressSpaceContext::new(NO_CONTEXT, SegmentFlags::empty());
        assert_eq!(ctx.sr0(), 0);
    }

    #[test]
    fn test_vdso_is_not_interpreted() {
        let mut ctx = AddressSpaceContext::new(5, SegmentFlags::empty());
        assert_eq!(ctx.vdso(), None);
        ctx.set_vdso(0x7fff_0000);
        assert_eq!(ctx.vdso(), Some(0x7fff_0000));
        assert_eq!(ctx.sr0(), compute_vsid(5, 0).raw());
    }

    #[test]
    fn test_ids_are_handed_out_round_robin() {
        let mut allocator = Box::new(ContextIdAllocator::new());
        assert!(allocator.is_live(NO_CONTEXT));
        assert_eq!(allocator.alloc(), Ok(1));
        assert_eq!(allocator.alloc(), Ok(2));
        allocator.free(1).unwrap();
        // freed ids are only reused after wrapping around
        assert_eq!(allocator.alloc(), Ok(3));
        assert!(!allocator.is_live(1));
        assert!(allocator.is_live(3));
    }

    #[test]
    fn test_live_ids_are_never_reused() {
        let mut allocator = Box::new(ContextIdAllocator::new());
        for expected in FIRST_CONTEXT..=LAST_CONTEXT {
            assert_eq!(allocator.alloc(), Ok(expected));
        }
        assert_eq!(allocator.alloc(), Err(ContextError::Exhausted));

        allocator.free(1234).unwrap();
        assert_eq!(allocator.alloc(), Ok(1234));
        assert_eq!(allocator.alloc(), Err(ContextError::Exhausted));
    }

    #[test]
    fn test_unallocated_ids_cannot_be_freed() {
        let mut allocator = Box::new(ContextIdAllocator::new());
        assert_eq!(allocator.free(7), Err(ContextError::NotAllocated(7)));
        assert_eq!(
            allocator.free(NO_CONTEXT),
            Err(ContextError::NotAllocated(NO_CONTEXT))
        );
        assert_eq!(
            allocator.free(LAST_CONTEXT + 1),
            Err(ContextError::NotAllocated(LAST_CONTEXT + 1))
        );
    }
}
