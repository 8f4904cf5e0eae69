//! # Page-Table Entry Layout

/// Entry is valid.
pub const PAGE_PRESENT_MASK: u64 = 0x1;

/// Reserved for page eviction; never set by the page-table manager.
pub const SWAP_OUT_MASK: u64 = 0x4;

/// Entry maps a page (leaf) rather than pointing at the next hop.
pub const LAST_MASK: u64 = 0x800;

/// All flag bits below the address field.
pub const FLAGS_MASK: u64 = 0xFFF;

/// Address field of an entry (next hop or mapped page).
pub const HOP_PHYS_ADDR_MASK: u64 = !FLAGS_MASK;

/// Size of one entry in bytes.
pub const PTE_SIZE: u64 = 8;

/// Size of one hop table in bytes.
pub const HOP_TABLE_SIZE: u64 = 0x1000; // 4 KiB

/// Entries per hop table.
pub const PTE_ENTRIES_IN_HOP: usize = (HOP_TABLE_SIZE / PTE_SIZE) as usize;

/// Number of hop levels (hop0 ..= hop4).
pub const MMU_HOPS: usize = 5;

pub const HOP0_MASK: u64 = 0x3_0000_0000_0000;
pub const HOP1_MASK: u64 = 0x0_FF80_0000_0000;
pub const HOP2_MASK: u64 = 0x0_007F_C000_0000;
pub const HOP3_MASK: u64 = 0x0_0000_3FE0_0000;
pub const HOP4_MASK: u64 = 0x0_0000_001F_F000;

pub const HOP0_SHIFT: u32 = 48;
pub const HOP1_SHIFT: u32 = 39;
pub const HOP2_SHIFT: u32 = 30;
pub const HOP3_SHIFT: u32 = 21;
pub const HOP4_SHIFT: u32 = 12;

/// Per-level masks, indexed by hop level.
pub const HOP_MASKS: [u64; MMU_HOPS] = [HOP0_MASK, HOP1_MASK, HOP2_MASK, HOP3_MASK, HOP4_MASK];

/// Per-level shifts, indexed by hop level.
pub const HOP_SHIFTS: [u32; MMU_HOPS] = [HOP0_SHIFT, HOP1_SHIFT, HOP2_SHIFT, HOP3_SHIFT, HOP4_SHIFT];

/// Regular device page.
pub const PAGE_SIZE_4KB: u64 = 0x1000;

/// Huge host page and DRAM page.
pub const PAGE_SIZE_2MB: u64 = 0x20_0000;

const _: () = {
    assert!(HOP_TABLE_SIZE.is_power_of_two());
    assert!(PTE_ENTRIES_IN_HOP == 512);
    assert!(PAGE_PRESENT_MASK & LAST_MASK & SWAP_OUT_MASK == 0);
    assert!(LAST_MASK & HOP_PHYS_ADDR_MASK == 0);

    // masks are disjoint and their shifts land on bit 0
    let mut i = 0;
    while i < MMU_HOPS {
        assert!(HOP_MASKS[i].trailing_zeros() == HOP_SHIFTS[i]);
        let mut j = i + 1;
        while j < MMU_HOPS {
            assert!(HOP_MASKS[i] & HOP_MASKS[j] == 0);
            j += 1;
        }
        i += 1;
    }

    // one level spans exactly the next level's table
    assert!(1u64 << HOP4_SHIFT == PAGE_SIZE_4KB);
    assert!(1u64 << HOP3_SHIFT == PAGE_SIZE_2MB);
    assert!(HOP4_MASK >> HOP4_SHIFT == PTE_ENTRIES_IN_HOP as u64 - 1);
};
