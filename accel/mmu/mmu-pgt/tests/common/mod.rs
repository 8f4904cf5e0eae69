#![allow(dead_code)]

use log::{Level, LevelFilter, Log, Metadata, Record};
use mmu_pgt::{MmuConfig, MmuContext, PhysicalAddress, PteIo};
use mmu_sync::SpinLock;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const HOP: u64 = 0x1000;

/// Device memory as a sparse map of 64-bit entries.
#[derive(Debug, Default)]
pub struct FakeDevice {
    mem: SpinLock<BTreeMap<u64, u64>>,
}

impl FakeDevice {
    pub fn read(&self, addr: PhysicalAddress) -> u64 {
        self.mem.with_lock(|m| m.get(&addr.as_u64()).copied().unwrap_or(0))
    }

    /// Every non-zero entry, by device address.
    pub fn snapshot(&self) -> BTreeMap<u64, u64> {
        self.mem.with_lock(|m| m.iter().filter(|(_, v)| **v != 0).map(|(k, v)| (*k, *v)).collect())
    }
}

impl PteIo for FakeDevice {
    fn write_pte(&self, addr: PhysicalAddress, value: u64) {
        self.mem.with_lock(|m| m.insert(addr.as_u64(), value));
    }

    fn read_pte(&self, addr: PhysicalAddress) -> u64 {
        self.read(addr)
    }
}

/// Four address spaces, `pool_hops` hops, no default mapping.
pub fn small_config(pool_hops: u64) -> MmuConfig {
    MmuConfig::reference()
        .with_max_asid(4)
        .with_hop0_tables_total_size(4 * HOP)
        .with_pgt_size((4 + pool_hops) * HOP)
        .with_dram_default_page_mapping(false)
}

/// A 1 GiB default mapping: hop1, hop2 and one hop3.
pub fn default_mapping_config(pool_hops: u64) -> MmuConfig {
    small_config(pool_hops)
        .with_dram_default_page_mapping(true)
        .with_dram_size_for_default_page_mapping(1 << 30)
}

/// `(physical address, count)` of every hop, sorted.
pub fn hop_counts<D: PteIo>(ctx: &MmuContext<'_, D>) -> Vec<(PhysicalAddress, u32)> {
    let mut hops: Vec<_> = ctx.hops().map(|h| (h.phys_addr(), h.num_of_ptes())).collect();
    hops.sort_unstable();
    hops
}

thread_local! {
    static LINES: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct Capture;

impl Log for Capture {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        LINES.with(|l| l.borrow_mut().push((record.level(), record.args().to_string())));
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture;

/// Starts capturing this thread's log lines.
pub fn capture_logs() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Trace);
    });
    LINES.with(|l| l.borrow_mut().clear());
}

/// Whether a line at `level` containing `needle` was logged on this thread.
pub fn logged(level: Level, needle: &str) -> bool {
    LINES.with(|l| l.borrow().iter().any(|(lv, s)| *lv == level && s.contains(needle)))
}
