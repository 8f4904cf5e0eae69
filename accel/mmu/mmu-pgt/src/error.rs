use crate::config::PageClass;
use mmu_addresses::{PhysicalAddress, ShadowAddress, VirtualAddress};

/// Failures of the page-table manager.
///
/// Every variant is recoverable; the page tables are left in a consistent
/// state when one is returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MmuError {
    #[error("no free hop in the page-table pool")]
    Exhausted,
    #[error("failed to allocate a shadow hop table")]
    ShadowOutOfMemory,
    #[error("mapping already exists for {va}")]
    AlreadyMapped { va: VirtualAddress },
    #[error("{va} is not mapped")]
    NotMapped { va: VirtualAddress },
    #[error("size {size:#x} is not a multiple of the {page_size:#x} page size")]
    MisalignedSize { size: u64, page_size: u64 },
    #[error("range of {size:#x} bytes at {va} overflows the address space")]
    RangeOverflow { va: VirtualAddress, size: u64 },
    #[error("inconsistent page tables: {0}")]
    InconsistentState(&'static str),
    #[error("{0} is not a hop of this context")]
    UnknownHop(ShadowAddress),
    #[error("ASID {0} is out of range")]
    AsidOutOfRange(u32),
    #[error("ASID {0} is already in use")]
    AsidInUse(u32),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("hop pool: {0}")]
    Pool(#[from] PoolError),
}

/// Failures of the physical hop pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("pool exhausted")]
    Exhausted,
    #[error("{0} was not allocated from this pool")]
    InvalidRelease(PhysicalAddress),
    #[error("pool region is empty or misaligned")]
    InvalidRegion,
}

/// Rejected device geometry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("hop table size {0:#x} is not supported")]
    HopTableSize(u64),
    #[error("at least one address space is required")]
    NoAddressSpaces,
    #[error("root hop region is {actual:#x} bytes, expected {expected:#x}")]
    Hop0TablesSize { actual: u64, expected: u64 },
    #[error("invalid page-table region: {0}")]
    PageTableRegion(&'static str),
    #[error("invalid {class:?} geometry: {reason}")]
    Geometry {
        class: PageClass,
        reason: &'static str,
    },
    #[error("invalid DRAM default mapping: {0}")]
    DefaultMapping(&'static str),
}
