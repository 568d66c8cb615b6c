//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and 4 KiB page bases used by the
//! allocator, the page-table contracts and the mapping subsystem.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] / [`VirtualPage`] | User virtual memory, translated by the page table. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Physical frames handed out by the frame allocator. |
//!
//! All types are `#[repr(transparent)]` over `u64` and `Copy`, `Eq`, `Ord` and
//! `Hash`, so they can be used as map keys. Rounding helpers operate on the
//! single page size configured in [`kernel_info::memory::PAGE_SIZE`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4000_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x4000_1000);
//! assert_eq!(va.page_offset(), 0x234);
//! assert_eq!(round_up_to_page(0x1001), Some(0x2000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use kernel_info::memory::PAGE_SIZE;
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::{PageSpan, VirtualPage};

const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Rounds `value` down to a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn round_down_to_page(value: u64) -> u64 {
    value & !PAGE_MASK
}

/// Rounds `value` up to a multiple of [`PAGE_SIZE`], or `None` on overflow.
#[inline]
#[must_use]
pub const fn round_up_to_page(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_MASK) {
        Some(v) => Some(v & !PAGE_MASK),
        None => None,
    }
}

/// Returns `true` if `value` is a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn is_page_aligned(value: u64) -> bool {
    value & PAGE_MASK == 0
}
