mod common;

use common::{FakeDevice, capture_logs, hop_counts, logged, small_config};
use log::Level;
use mmu_pgt::{HopEntry, Mmu, MmuError, PageClass, PhysicalAddress, VirtualAddress};

const HOST: VirtualAddress = VirtualAddress::new(0x1_0000_0000_0000);

#[test]
fn first_page_builds_a_chain_and_neighbours_share_it() {
    let mmu = Mmu::init(small_config(16), FakeDevice::default()).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    c.map(VirtualAddress::new(0x1000), PhysicalAddress::new(0x20000), 0x1000, true)
        .unwrap();
    assert_eq!(c.hop_count(), 4);
    assert!(hop_counts(&c).iter().all(|&(_, n)| n == 1));

    c.map(VirtualAddress::new(0x2000), PhysicalAddress::new(0x21000), 0x1000, true)
        .unwrap();
    assert_eq!(c.hop_count(), 4);

    let chain = c.walk(VirtualAddress::new(0x2000), PageClass::Regular);
    let leaf_hop = chain.leaf().unwrap().slot.hop;
    assert_eq!(c.hop_info(leaf_hop).unwrap().num_of_ptes(), 2);
    assert_eq!(
        c.translate(VirtualAddress::new(0x2abc)),
        Some(PhysicalAddress::new(0x21abc))
    );

    c.unmap(VirtualAddress::new(0x1000), 0x2000, true).unwrap();
    assert_eq!(c.hop_count(), 0);
}

#[test]
fn map_then_unmap_restores_everything() {
    let dev = FakeDevice::default();
    let mmu = Mmu::init(small_config(16), &dev).unwrap();
    let ctx = mmu.ctx_init(2).unwrap();
    let mut c = ctx.lock();

    c.map(HOST, PhysicalAddress::new(0x4000_0000), 0x1000, false)
        .unwrap();
    let hops = hop_counts(&c);
    let device = dev.snapshot();
    let free = mmu.pool().available();

    let va = HOST + 0x10_0000;
    c.map(va, PhysicalAddress::new(0x5000_0000), 16 * 0x1000, true)
        .unwrap();
    assert_ne!(hop_counts(&c), hops);
    c.unmap(va, 16 * 0x1000, true).unwrap();

    assert_eq!(hop_counts(&c), hops);
    assert_eq!(dev.snapshot(), device);
    assert_eq!(mmu.pool().available(), free);

    c.unmap(HOST, 0x1000, true).unwrap();
}

#[test]
fn counts_track_present_entries() {
    let mmu = Mmu::init(small_config(16), FakeDevice::default()).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    for i in 0..8u64 {
        c.map(HOST + i * 0x1000, PhysicalAddress::new(0x4000_0000 + i * 0x1000), 0x1000, false)
            .unwrap();
    }
    let chain = c.walk(HOST, PageClass::Regular);
    let hops: Vec<_> = chain.hops().skip(1).collect();
    let count = |c: &mmu_pgt::MmuContext<'_, FakeDevice>, i: usize| {
        c.hop_info(hops[i]).unwrap().num_of_ptes()
    };
    assert_eq!((count(&*c, 0), count(&*c, 1), count(&*c, 2), count(&*c, 3)), (1, 1, 1, 8));

    for i in (1..8u64).rev() {
        c.unmap(HOST + i * 0x1000, 0x1000, false).unwrap();
        assert_eq!(count(&*c, 3), u32::try_from(i).unwrap());
        assert_eq!(count(&*c, 2), 1);
    }
    c.unmap(HOST, 0x1000, true).unwrap();
    assert_eq!(c.hop_count(), 0);
}

#[test]
fn double_map_is_refused_without_changes() {
    capture_logs();
    let dev = FakeDevice::default();
    let mmu = Mmu::init(small_config(16), &dev).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    c.map(HOST, PhysicalAddress::new(0x4000_0000), 0x1000, true)
        .unwrap();
    let hops = hop_counts(&c);
    let device = dev.snapshot();

    assert_eq!(
        c.map(HOST, PhysicalAddress::new(0x5000_0000), 0x1000, true),
        Err(MmuError::AlreadyMapped { va: HOST })
    );
    assert!(logged(Level::Error, "mapping already exists"));
    assert!(logged(Level::Debug, "hop4 pte"));
    assert_eq!(hop_counts(&c), hops);
    assert_eq!(dev.snapshot(), device);
    assert_eq!(c.translate(HOST), Some(PhysicalAddress::new(0x4000_0000)));

    c.unmap(HOST, 0x1000, true).unwrap();
}

#[test]
fn unmapping_unmapped_addresses_changes_nothing() {
    capture_logs();
    let dev = FakeDevice::default();
    let mmu = Mmu::init(small_config(16), &dev).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    assert_eq!(
        c.unmap(HOST, 0x1000, true),
        Err(MmuError::NotMapped { va: HOST })
    );
    assert!(logged(Level::Error, "is not mapped"));
    assert_eq!(c.hop_count(), 0);

    c.map(HOST, PhysicalAddress::new(0x4000_0000), 0x1000, true)
        .unwrap();
    let hops = hop_counts(&c);
    let device = dev.snapshot();

    // same leaf hop, empty slot
    let va = HOST + 0x3000;
    assert_eq!(c.unmap(va, 0x1000, true), Err(MmuError::NotMapped { va }));
    assert_eq!(hop_counts(&c), hops);
    assert_eq!(dev.snapshot(), device);

    c.unmap(HOST, 0x1000, true).unwrap();
}

#[test]
fn unmap_stops_at_the_first_hole() {
    let mmu = Mmu::init(small_config(16), FakeDevice::default()).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    c.map(HOST, PhysicalAddress::new(0x4000_0000), 0x1000, false)
        .unwrap();
    c.map(HOST + 0x2000, PhysicalAddress::new(0x4000_2000), 0x1000, false)
        .unwrap();

    assert_eq!(
        c.unmap(HOST, 0x3000, true),
        Err(MmuError::NotMapped { va: HOST + 0x1000 })
    );
    assert_eq!(c.translate(HOST), None);
    assert_eq!(c.translate(HOST + 0x2000), Some(PhysicalAddress::new(0x4000_2000)));

    c.unmap(HOST + 0x2000, 0x1000, true).unwrap();
    assert_eq!(c.hop_count(), 0);
}

#[test]
fn failed_range_is_rolled_back() {
    capture_logs();
    let dev = FakeDevice::default();
    let mmu = Mmu::init(small_config(4), &dev).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    // two pages below a hop4 boundary, two above: the fifth hop is missing
    let va = HOST + (0x20_0000 - 0x2000);
    assert_eq!(
        c.map(va, PhysicalAddress::new(0x4000_0000), 0x4000, true),
        Err(MmuError::Exhausted)
    );
    assert!(logged(Level::Error, "map failed"));
    assert!(!logged(Level::Warn, "rollback"));

    assert_eq!(c.hop_count(), 0);
    assert_eq!(mmu.pool().available(), 4);
    assert_eq!(c.translate(va), None);
    assert!(dev.snapshot().is_empty());
}

#[test]
fn misaligned_size_and_physical_address() {
    capture_logs();
    let mmu = Mmu::init(small_config(16), FakeDevice::default()).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    assert_eq!(
        c.unmap(HOST, 0x800, true),
        Err(MmuError::MisalignedSize {
            size: 0x800,
            page_size: 0x1000
        })
    );

    c.map(HOST, PhysicalAddress::new(0x4000_0010), 0x1000, true)
        .unwrap();
    assert!(logged(Level::Warn, "is not aligned"));
    assert_eq!(c.translate(HOST + 0x20), Some(PhysicalAddress::new(0x4000_0020)));
    c.unmap(HOST, 0x1000, true).unwrap();
}

#[test]
fn huge_pages_end_in_hop3() {
    let mmu = Mmu::init(small_config(16), FakeDevice::default()).unwrap();
    let ctx = mmu.ctx_init(1).unwrap();
    let mut c = ctx.lock();

    c.map(HOST, PhysicalAddress::new(0x8000_0000), 0x40_0000, true)
        .unwrap();
    assert_eq!(c.hop_count(), 3);

    let chain = c.walk(HOST + 0x20_0000, PageClass::Huge);
    let leaf = chain.leaf().unwrap();
    assert_eq!(leaf.level, 3);
    assert_eq!(leaf.entry, HopEntry::leaf(PhysicalAddress::new(0x8020_0000)));
    assert_eq!(c.hop_info(leaf.slot.hop).unwrap().num_of_ptes(), 2);
    assert_eq!(
        c.translate(HOST + 0x21_2345),
        Some(PhysicalAddress::new(0x8021_2345))
    );

    c.unmap(HOST, 0x40_0000, true).unwrap();
    assert_eq!(c.hop_count(), 0);
}

#[test]
fn device_links_physical_hops_shadow_links_shadow_hops() {
    let dev = FakeDevice::default();
    let mmu = Mmu::init(small_config(16), &dev).unwrap();
    let ctx = mmu.ctx_init(3).unwrap();
    let mut c = ctx.lock();

    let pa = PhysicalAddress::new(0x4000_0000);
    c.map(HOST, pa, 0x1000, true).unwrap();
    let chain = c.walk(HOST, PageClass::Regular);
    assert_eq!(chain.len(), 5);

    let steps: Vec<_> = chain.iter().copied().collect();
    assert_eq!(steps[0].hop_phys_addr, mmu.config().hop0_phys_addr(3));
    for pair in steps.windows(2) {
        let (parent, child) = (pair[0], pair[1]);
        let device = dev.read(c.slot_phys_addr(parent.slot).unwrap());
        assert_eq!(parent.entry.next_hop(), Some(child.slot.hop));
        assert_eq!(device, child.hop_phys_addr.as_u64() | 1);
        assert_ne!(child.slot.hop.as_u64(), child.hop_phys_addr.as_u64());
        assert!(mmu.pool().contains(child.hop_phys_addr));
    }

    let leaf = steps[4];
    assert_eq!(dev.read(c.slot_phys_addr(leaf.slot).unwrap()), leaf.entry.raw());
    assert_eq!(leaf.entry.page(), Some(pa));

    c.unmap(HOST, 0x1000, true).unwrap();
}
