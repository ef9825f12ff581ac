use book3s32::cpu::{MmuFeatures, SegmentRegisterWriter};
use book3s32::mem::bat::{BatFlags, BatTable};
use book3s32::mem::context::{AddressSpaceContext, ContextIdAllocator};
use book3s32::mem::segments::{SegmentFlags, SegmentInstaller};
use book3s32::mem::*;

/// Records segment register loads instead of executing them
#[derive(Default)]
struct SegmentRecorder {
    registers: [Option<u32>; NUM_SEGMENTS],
    writes: usize,
}

impl SegmentRegisterWriter for SegmentRecorder {
    unsafe fn write_segment(&mut self, segment: usize, value: u32) {
        self.registers[segment] = Some(value);
        self.writes += 1;
    }

    unsafe fn isync(&mut self) {}
}

fn installer() -> SegmentInstaller<SegmentRecorder> {
    SegmentInstaller::new(
        SegmentRecorder::default(),
        DEFAULT_TASK_SIZE,
        MmuFeatures::HPTE_TABLE,
    )
}

#[test]
fn switching_contexts_reloads_user_segments() {
    let mut allocator = Box::new(ContextIdAllocator::new());
    let a = AddressSpaceContext::new(allocator.alloc().unwrap(), SegmentFlags::NX);
    let b = AddressSpaceContext::new(allocator.alloc().unwrap(), SegmentFlags::NX);
    let mut installer = installer();

    unsafe { a.activate(&mut installer) };
    unsafe { b.activate(&mut installer) };

    let recorder = installer.writer();
    assert_eq!(recorder.writes, 2 * 11);
    for segment in 0..11 {
        let value = recorder.registers[segment].unwrap();
        assert_eq!(value & VSID_MASK, b.vsid(segment).raw());
        assert_eq!(value & !VSID_MASK, SegmentFlags::NX.bits());
    }
    // kernel segments are never touched
    assert!(recorder.registers[11..].iter().all(Option::is_none));
}

#[test]
fn loaded_segments_agree_with_fault_time_vsids() {
    let ctx = AddressSpaceContext::new(777, SegmentFlags::NX | SegmentFlags::KS);
    let mut installer = installer();
    unsafe { ctx.activate(&mut installer) };

    for ea in [0x0000_0000, 0x1000_2000, 0x7fff_f000, 0xafff_ffff] {
        let sr = installer.writer().registers[effective_segment(ea)].unwrap();
        let vsid = vsid_for_ea(ctx.id(), ea);
        assert_eq!(sr & VSID_MASK, vsid.raw());

        let pte = HashPte::encode(&HashPteFields {
            valid: true,
            vsid,
            hash_select: false,
            api: abbreviated_page_index(ea),
            ppn: 0x1234,
            flags: PteFlags::Coherent,
            pp: PageProtection::RwRw,
        })
        .unwrap();
        assert!(pte.matches(Vsid::try_from_raw(sr & VSID_MASK).unwrap(), ea, false));
        assert_eq!(pte.phys_addr(), 0x0123_4000);
    }
}

#[test]
fn kernel_linear_mapping_falls_back_to_hash_table() {
    let mut bats = BatTable::new(MmuFeatures::HPTE_TABLE | MmuFeatures::NEED_COHERENT);
    let ram_top = 0x1800_0000;
    let mapped = bats.map_range(0xc000_0000, 0, ram_top, BatFlags::KERNEL_RWX);

    assert_eq!(mapped, ram_top);
    assert_eq!(bats.virt_to_phys(0xd000_0000), Some(0x1000_0000));
    assert_eq!(bats.phys_to_virt(0x17ff_ffff), Some(0xd7ff_ffff));
    assert_eq!(bats.find_free_bat(), Some(2));

    // RAM with an odd size only gets covered partially
    let mut bats = BatTable::new(MmuFeatures::empty());
    let mapped = bats.map_range(0xc000_0000, 0, 0x0ffe_0000, BatFlags::KERNEL_RWX);
    assert!(mapped < 0x0ffe_0000);
    assert_eq!(bats.find_free_bat(), None);
}
