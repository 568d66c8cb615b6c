//! # Virtual Memory Contracts
//!
//! The memory-mapping subsystem never walks page tables or hands out frames
//! itself. It talks to three collaborators, all defined here:
//!
//! - [`FrameAlloc`] hands out and takes back physical 4 KiB frames.
//! - [`PhysMapper`] makes a physical frame temporarily addressable by the kernel
//!   (identity map in tests, [`HhdmPhysMapper`] in the kernel).
//! - [`UserPageTable`] installs, removes and queries leaf mappings of one
//!   process and exposes the hardware-maintained dirty bit.
//!
//! Leaf permissions are expressed as [`PageEntryBits`].
//!
//! ## x86-64 Leaf Entry
//!
//! ```text
//! 63  62        12 11  9 8 7 6 5 4 3 2 1 0
//! NX | frame base  | avl |G|PS|D|A|..|U|W|P
//! ```
//!
//! Only `P`, `W`, `U`, `A` and `D` matter for user mappings; `D` is set by the
//! CPU on the first store and drives write-back in `msync`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

mod hhdm;
mod page_entry_bits;
mod user_page_table;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::hhdm::HhdmPhysMapper;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::user_page_table::{MapError, UserPageTable};

use kernel_info::memory::PAGE_BYTES;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Physical frame allocator.
///
/// The implementation decides where frames come from (bootloader pool,
/// bitmap, etc.). Returned frames **must** be 4 KiB aligned and are not
/// guaranteed to be zeroed.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame. Returns `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;

    /// Return a frame previously obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, frame: PhysicalPage);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (e.g., via identity map or a higher-half direct map, HHDM).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference in the current address space.
    ///
    /// # Safety
    /// The caller owns the memory at `pa` for `'a` and no other reference to it is live.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// The bytes of a whole frame.
    ///
    /// # Safety
    /// Same contract as [`phys_to_mut`](Self::phys_to_mut).
    #[inline(always)]
    unsafe fn frame_bytes<'a>(&self, frame: PhysicalPage) -> &'a mut [u8; PAGE_BYTES] {
        unsafe { self.phys_to_mut::<[u8; PAGE_BYTES]>(frame.base()) }
    }
}

/// Fill a frame with zeroes.
///
/// # Safety
/// The caller owns `frame` and nothing else references its contents.
#[inline]
pub unsafe fn zero_frame<M: PhysMapper>(mapper: &M, frame: PhysicalPage) {
    let bytes = unsafe { mapper.frame_bytes(frame) };
    bytes.fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestFrames, TestPhys};

    #[test]
    fn zero_frame_clears_previous_contents() {
        let phys = TestPhys::with_frames(2);
        let mut frames = TestFrames::new(2);
        let frame = frames.alloc_4k().expect("frame");

        unsafe { phys.frame_bytes(frame) }.fill(0xAB);
        unsafe { zero_frame(&phys, frame) };

        assert!(unsafe { phys.frame_bytes(frame) }.iter().all(|&b| b == 0));
    }

    #[test]
    fn frame_bytes_and_phys_to_mut_agree() {
        let phys = TestPhys::with_frames(1);
        let frame = PhysicalPage::containing_address(PhysicalAddress::new(0));

        let word: &mut u64 = unsafe { phys.phys_to_mut(PhysicalAddress::new(8)) };
        *word = 0x1122_3344_5566_7788;

        let bytes = unsafe { phys.frame_bytes(frame) };
        assert_eq!(bytes[8], 0x88);
        assert_eq!(bytes[15], 0x11);
    }
}
