//! # Memory Layout

/// Size of the smallest mapping granule handed out by the physical page allocator.
pub const PAGE_SIZE: u64 = 4096;

/// [`PAGE_SIZE`] as a buffer length.
pub const PAGE_BYTES: usize = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

/// End of the canonical lower half; user mappings never reach past this address.
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Physical memory is reachable by the kernel at [`HHDM_BASE`] + `pa`.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Upper bound for the per-process high-water mark.
///
/// Lazily populated regions are carved out of `[process size, USER_MMAP_CEILING)`.
/// The kernel keeps the topmost page below [`USERSPACE_END`] unmapped as a guard.
pub const USER_MMAP_CEILING: u64 = USERSPACE_END - PAGE_SIZE;

/// Where the user image of a freshly created process ends by default.
///
/// Test processes start their mappings right above a three page image.
pub const DEFAULT_PROCESS_SIZE: u64 = 3 * PAGE_SIZE;

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(PAGE_BYTES as u64 == PAGE_SIZE);
    assert!(USER_MMAP_CEILING.is_multiple_of(PAGE_SIZE));
    assert!(DEFAULT_PROCESS_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(DEFAULT_PROCESS_SIZE < USER_MMAP_CEILING);
    assert!(HHDM_BASE >= USERSPACE_END);
};
