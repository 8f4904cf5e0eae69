//! # Default Device Address Layout
//!
//! Values for the reference device geometry. Consumers build their runtime
//! configuration from these and may override any of them.
//!
//! ```text
//! Device virtual address space:
//!
//! 0x0000_0000_0000_0000 ┌──────────────────────────────┐
//!                       │          (unused)            │
//! VA_DDR_SPACE_START    ├──────────────────────────────┤ 0x0000_0008_0000_0000
//!                       │   DRAM (2 MiB pages, hop3)   │
//! VA_DDR_SPACE_END      ├──────────────────────────────┤ 0x0000_0020_0000_0000
//!                       │          (unused)            │
//! VA_HOST_SPACE_START   ├──────────────────────────────┤ 0x0001_0000_0000_0000
//!                       │  host memory (4 KiB / 2 MiB) │
//! VA_HOST_SPACE_END     └──────────────────────────────┘ 0x0003_FF80_0000_0000
//! ```

use crate::pte::{HOP_TABLE_SIZE, HOP2_SHIFT, PAGE_SIZE_2MB, PTE_ENTRIES_IN_HOP};
use mmu_addresses::{PhysicalAddress, VirtualAddress};

/// Address-space identifier of the kernel (driver) context.
///
/// The kernel context never carries a DRAM default mapping.
pub const KERNEL_ASID: u32 = 0;

/// Number of address spaces; one root hop is reserved per ASID.
pub const MAX_ASID: u32 = 1024;

/// Bytes reserved at the start of the page-table region for root hops.
pub const HOP0_TABLES_TOTAL_SIZE: u64 = HOP_TABLE_SIZE * MAX_ASID as u64;

/// Device physical base of the page-table region.
pub const MMU_PAGE_TABLES_ADDR: PhysicalAddress = PhysicalAddress::new(0x2000_0000);

/// Size of the page-table region (root hops followed by the hop pool).
pub const MMU_PAGE_TABLES_SIZE: u64 = 0x0FE0_0000;

/// Device physical address of the shared DRAM default page.
pub const MMU_DRAM_DEFAULT_PAGE_ADDR: PhysicalAddress =
    PhysicalAddress::new(0x2000_0000 + MMU_PAGE_TABLES_SIZE);

pub const VA_HOST_SPACE_START: VirtualAddress = VirtualAddress::new(0x1_0000_0000_0000);
pub const VA_HOST_SPACE_END: VirtualAddress = VirtualAddress::new(0x3_FF80_0000_0000);

pub const VA_DDR_SPACE_START: VirtualAddress = VirtualAddress::new(0x8_0000_0000);
pub const VA_DDR_SPACE_END: VirtualAddress = VirtualAddress::new(0x20_0000_0000);

/// DRAM page size.
pub const DRAM_PAGE_SIZE: u64 = PAGE_SIZE_2MB;

/// DRAM VA span kept pointed at the default page in every user context.
pub const DRAM_SIZE_FOR_DEFAULT_PAGE_MAPPING: u64 =
    VA_DDR_SPACE_END.as_u64() - VA_DDR_SPACE_START.as_u64();

const _: () = {
    assert!(MMU_PAGE_TABLES_SIZE > HOP0_TABLES_TOTAL_SIZE);
    assert!((MMU_PAGE_TABLES_SIZE - HOP0_TABLES_TOTAL_SIZE).is_multiple_of(HOP_TABLE_SIZE));
    assert!(MMU_DRAM_DEFAULT_PAGE_ADDR.is_aligned(DRAM_PAGE_SIZE));
    assert!(VA_DDR_SPACE_START.is_aligned(1 << HOP2_SHIFT));
    assert!(VA_DDR_SPACE_END.as_u64() <= VA_HOST_SPACE_START.as_u64());

    // the default mapping must fit a single hop2 table
    let hop3_tables = DRAM_SIZE_FOR_DEFAULT_PAGE_MAPPING / DRAM_PAGE_SIZE / PTE_ENTRIES_IN_HOP as u64;
    let first = (VA_DDR_SPACE_START.as_u64() >> HOP2_SHIFT) & (PTE_ENTRIES_IN_HOP as u64 - 1);
    assert!(first + hop3_tables <= PTE_ENTRIES_IN_HOP as u64);
};
