//! Fixtures shared by the unit tests.

use crate::{MmuConfig, PhysicalAddress, PteIo};
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicUsize, Ordering};
use mmu_info::pte::HOP_TABLE_SIZE;
use mmu_sync::SpinLock;

/// Device memory as a sparse map of 64-bit entries.
#[derive(Debug, Default)]
pub struct FakeDevice {
    mem: SpinLock<BTreeMap<u64, u64>>,
    reads: AtomicUsize,
    last_read: SpinLock<Option<PhysicalAddress>>,
}

impl FakeDevice {
    /// Entry as last written by the page-table manager.
    pub fn read(&self, addr: PhysicalAddress) -> u64 {
        self.mem.with_lock(|m| m.get(&addr.as_u64()).copied().unwrap_or(0))
    }

    /// Number of non-zero entries in device memory.
    pub fn nonzero(&self) -> usize {
        self.mem.with_lock(|m| m.values().filter(|v| **v != 0).count())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn last_read(&self) -> Option<PhysicalAddress> {
        *self.last_read.lock()
    }
}

impl PteIo for FakeDevice {
    fn write_pte(&self, addr: PhysicalAddress, value: u64) {
        self.mem.with_lock(|m| m.insert(addr.as_u64(), value));
    }

    fn read_pte(&self, addr: PhysicalAddress) -> u64 {
        self.reads.fetch_add(1, Ordering::Relaxed);
        *self.last_read.lock() = Some(addr);
        self.read(addr)
    }
}

/// Four address spaces and a pool of `pool_hops` hops; no default mapping.
pub fn small_config(pool_hops: u64) -> MmuConfig {
    MmuConfig::reference()
        .with_max_asid(4)
        .with_hop0_tables_total_size(4 * HOP_TABLE_SIZE)
        .with_pgt_size((4 + pool_hops) * HOP_TABLE_SIZE)
        .with_dram_default_page_mapping(false)
}

/// [`small_config`] with a 1 GiB default mapping (one hop3 table).
pub fn default_mapping_config(pool_hops: u64) -> MmuConfig {
    small_config(pool_hops)
        .with_dram_default_page_mapping(true)
        .with_dram_size_for_default_page_mapping(1 << 30)
}
