//! # Host-side fakes
//!
//! Simulated physical memory, a frame pool and a page table so the allocator
//! and the mapping code can be exercised without hardware.
//!
//! Physical addresses are simple byte offsets into a vector of 4 KiB-aligned
//! frames, so `pa / 4096` selects the frame and `pa % 4096` the byte inside it.

#![allow(clippy::missing_panics_doc, clippy::cast_possible_truncation)]

use crate::{FrameAlloc, MapError, PageEntryBits, PhysMapper, UserPageTable};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_info::memory::{PAGE_BYTES, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
#[repr(align(4096))]
struct Aligned4K([u8; PAGE_BYTES]);

/// A tiny in-memory "RAM" with an identity-style mapper.
pub struct TestPhys {
    frames: Vec<UnsafeCell<Aligned4K>>,
}

impl TestPhys {
    /// RAM made of `n` zeroed frames at physical addresses `0..n * 4096`.
    #[must_use]
    pub fn with_frames(n: usize) -> Self {
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            v.push(UnsafeCell::new(Aligned4K([0; PAGE_BYTES])));
        }
        Self { frames: v }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn byte_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let idx = (pa.as_u64() / PAGE_SIZE) as usize;
        let off = pa.page_offset() as usize;
        assert!(idx < self.frames.len(), "{pa} is outside of test RAM");
        self.frames[idx].get().cast::<u8>().wrapping_add(off)
    }

    /// Copy of a frame's contents.
    #[must_use]
    pub fn snapshot(&self, frame: PhysicalPage) -> Vec<u8> {
        // SAFETY: shared read of a frame owned by this fake.
        unsafe { self.frame_bytes(frame) }.to_vec()
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.byte_ptr(pa);
        debug_assert!(ptr.cast::<T>().is_aligned());
        // SAFETY: The caller promises `T` matches the bytes in the frame.
        unsafe { &mut *ptr.cast::<T>() }
    }
}

/// Frame pool over the frames of a [`TestPhys`].
///
/// Hands out fresh frames bump-style, then recycles freed ones. Tracks which
/// frames are outstanding so leaks and double frees show up in tests.
pub struct TestFrames {
    next: u64,
    end: u64,
    recycled: Vec<PhysicalPage>,
    outstanding: BTreeSet<PhysicalPage>,
    remaining: Option<usize>,
}

impl TestFrames {
    /// Pool covering the first `n` frames of test RAM.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            next: 0,
            end: n as u64 * PAGE_SIZE,
            recycled: Vec::new(),
            outstanding: BTreeSet::new(),
            remaining: None,
        }
    }

    /// Let only `n` more allocations succeed.
    pub fn limit(&mut self, n: usize) {
        self.remaining = Some(n);
    }

    /// Remove any allocation limit.
    pub fn unlimit(&mut self) {
        self.remaining = None;
    }

    /// Number of frames handed out and not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    #[must_use]
    pub fn is_outstanding(&self, frame: PhysicalPage) -> bool {
        self.outstanding.contains(&frame)
    }
}

impl FrameAlloc for TestFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let frame = if let Some(frame) = self.recycled.pop() {
            frame
        } else {
            if self.next + PAGE_SIZE > self.end {
                return None;
            }
            let p = self.next;
            self.next += PAGE_SIZE;
            PhysicalAddress::new(p).page()
        };

        self.outstanding.insert(frame);
        Some(frame)
    }

    fn free_4k(&mut self, frame: PhysicalPage) {
        assert!(self.outstanding.remove(&frame), "double free of {frame:?}");
        self.recycled.push(frame);
    }
}

/// Why a simulated user access did not complete.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UserAccessFault {
    /// No present leaf; the CPU would raise a not-present page fault.
    NotPresent(VirtualAddress),
    /// Store to a read-only leaf; the CPU would raise a protection fault.
    ReadOnly(VirtualAddress),
}

/// Page table fake keyed by virtual page.
#[derive(Default)]
pub struct TestPageTable {
    entries: BTreeMap<VirtualPage, (PhysicalPage, PageEntryBits)>,
    fail_unmap: Option<VirtualPage>,
    fail_map: bool,
}

impl TestPageTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `map_page` fail with [`MapError::OutOfMemory`].
    pub fn fail_maps(&mut self, fail: bool) {
        self.fail_map = fail;
    }

    /// Make `unmap_page(page)` fail with [`MapError::WalkFailed`].
    pub fn fail_unmap_of(&mut self, page: Option<VirtualPage>) {
        self.fail_unmap = page;
    }

    /// Number of present leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.entries.contains_key(&va.page())
    }

    /// Simulate a user-mode store of `bytes` at `va`, setting accessed and dirty bits.
    ///
    /// # Errors
    /// The first page that would fault, in which case nothing past it is written.
    pub fn user_write(
        &mut self,
        phys: &TestPhys,
        va: VirtualAddress,
        bytes: &[u8],
    ) -> Result<(), UserAccessFault> {
        let mut addr = va;
        let mut rest = bytes;
        while !rest.is_empty() {
            let Some((frame, flags)) = self.entries.get_mut(&addr.page()) else {
                return Err(UserAccessFault::NotPresent(addr));
            };
            if !flags.contains(PageEntryBits::WRITABLE) {
                return Err(UserAccessFault::ReadOnly(addr));
            }
            flags.insert(PageEntryBits::ACCESSED | PageEntryBits::DIRTY);

            let off = addr.page_offset() as usize;
            let n = rest.len().min(PAGE_BYTES - off);
            // SAFETY: the frame belongs to this mapping and no other reference is live.
            let page = unsafe { phys.frame_bytes(*frame) };
            page[off..off + n].copy_from_slice(&rest[..n]);

            rest = &rest[n..];
            addr += n as u64;
        }
        Ok(())
    }

    /// Simulate a user-mode load of `buf.len()` bytes from `va`.
    ///
    /// # Errors
    /// The first page that would fault.
    pub fn user_read(
        &mut self,
        phys: &TestPhys,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), UserAccessFault> {
        let mut addr = va;
        let mut filled = 0;
        while filled < buf.len() {
            let Some((frame, flags)) = self.entries.get_mut(&addr.page()) else {
                return Err(UserAccessFault::NotPresent(addr));
            };
            flags.insert(PageEntryBits::ACCESSED);

            let off = addr.page_offset() as usize;
            let n = (buf.len() - filled).min(PAGE_BYTES - off);
            // SAFETY: the frame belongs to this mapping and no other reference is live.
            let page = unsafe { phys.frame_bytes(*frame) };
            buf[filled..filled + n].copy_from_slice(&page[off..off + n]);

            filled += n;
            addr += n as u64;
        }
        Ok(())
    }
}

impl UserPageTable for TestPageTable {
    fn map_page(
        &mut self,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        if self.fail_map {
            return Err(MapError::OutOfMemory);
        }
        if self.entries.contains_key(&page) {
            return Err(MapError::AlreadyMapped(page));
        }
        self.entries
            .insert(page, (frame, flags | PageEntryBits::PRESENT));
        Ok(())
    }

    fn unmap_page(&mut self, page: VirtualPage) -> Result<Option<PhysicalPage>, MapError> {
        if self.fail_unmap == Some(page) {
            return Err(MapError::WalkFailed(page));
        }
        Ok(self.entries.remove(&page).map(|(frame, _)| frame))
    }

    fn query(&self, page: VirtualPage) -> Option<(PhysicalPage, PageEntryBits)> {
        self.entries.get(&page).copied()
    }

    fn clear_dirty(&mut self, page: VirtualPage) {
        if let Some((_, flags)) = self.entries.get_mut(&page) {
            flags.remove(PageEntryBits::DIRTY);
        }
    }
}
