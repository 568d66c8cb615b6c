use core::ptr::{self, NonNull, null_mut};
use kernel_info::memory::PAGE_BYTES;
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{debug, trace};

/// Header stored at the beginning of every block, free or allocated.
///
/// ```text
/// +----------------------+------------------------------------+
/// | Header (one unit)    |   payload ((units - 1) * UNIT)     |
/// +----------------------+------------------------------------+
/// ^ block                ^ pointer handed to the caller
/// ```
///
/// - `units` is the size of the whole block, header included, in header-sized
///   units.
/// - `next` links to the next free block. Free blocks are kept **sorted by
///   address** so neighbours can be detected and merged on release.
#[repr(C)]
struct Header {
    next: *mut Header,
    units: usize,
}

/// Allocation granule; every block is a multiple of it.
const UNIT: usize = size_of::<Header>();

/// Size of a fresh page, in units.
const UNITS_PER_PAGE: usize = PAGE_BYTES / UNIT;

/// Largest payload a single [`KernelHeap::kmalloc`] call can serve.
pub const MAX_ALLOCATION: usize = PAGE_BYTES - UNIT;

const _: () = assert!(PAGE_BYTES.is_multiple_of(UNIT));

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("out of physical memory")]
    OutOfMemory,
}

/// First-fit free-list allocator for small kernel-internal objects.
///
/// Memory is obtained one physical page at a time from the frame allocator
/// and never handed back. Single-threaded: the caller serializes access.
///
/// # Invariants
/// - Free blocks are non-overlapping and sorted by address.
/// - No two free blocks are adjacent once a call returns.
/// - `head` is a sentinel; the first real block is at `head.next`.
pub struct KernelHeap<'m, M: PhysMapper, A: FrameAlloc> {
    /// Sentinel node (does not represent memory).
    head: Header,
    mapper: &'m M,
    frames: &'m mut A,
    pages: usize,
}

impl<'m, M: PhysMapper, A: FrameAlloc> KernelHeap<'m, M, A> {
    /// Construct an empty heap. No memory is requested until the first allocation.
    pub const fn new(mapper: &'m M, frames: &'m mut A) -> Self {
        Self {
            head: Header {
                next: null_mut(),
                units: 0,
            },
            mapper,
            frames,
            pages: 0,
        }
    }

    /// Allocate at least `n_bytes` bytes, aligned to 16 bytes.
    ///
    /// The first free block large enough is used. If it is larger than needed
    /// the allocation is carved from its tail so the block itself stays linked.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if no block fits and no fresh page can be obtained.
    ///
    /// # Panics
    /// If `n_bytes` exceeds [`MAX_ALLOCATION`].
    pub fn kmalloc(&mut self, n_bytes: usize) -> Result<NonNull<u8>, HeapError> {
        assert!(
            n_bytes <= MAX_ALLOCATION,
            "kmalloc: requesting {n_bytes} bytes, more than one page"
        );
        let units = n_bytes.max(1).div_ceil(UNIT) + 1;

        loop {
            if let Some(block) = unsafe { self.take_first_fit(units) } {
                trace!("kmalloc({n_bytes}) -> {block:p} ({units} units)");
                return Ok(block);
            }
            self.grow()?;
        }
    }

    /// Return a block to the free list, merging it with adjacent free blocks.
    ///
    /// # Safety
    /// - `ptr` must have been returned by [`kmalloc`](Self::kmalloc) on this heap.
    /// - `ptr` must not have been released already.
    #[allow(clippy::cast_ptr_alignment)]
    pub unsafe fn kmfree(&mut self, ptr: NonNull<u8>) {
        let block = unsafe { ptr.cast::<Header>().as_ptr().sub(1) };
        unsafe { self.insert(block) };
    }

    /// Total bytes held in free blocks, headers included.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.blocks().map(|(_, units)| units * UNIT).sum()
    }

    /// Number of blocks in the free list.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.blocks().count()
    }

    /// Number of physical pages obtained so far.
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    /// Free blocks as `(address, units)` in list order.
    fn blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut current = self.head.next;
        core::iter::from_fn(move || {
            if current.is_null() {
                return None;
            }
            // SAFETY: every linked node is a valid header owned by this heap.
            let node = unsafe { &*current };
            let item = (current.addr(), node.units);
            current = node.next;
            Some(item)
        })
    }

    /// Unlink or shrink the first block with at least `units` units.
    ///
    /// # Safety
    /// The free-list invariants must hold.
    unsafe fn take_first_fit(&mut self, units: usize) -> Option<NonNull<u8>> {
        let mut prev = &raw mut self.head;
        let mut current = unsafe { (*prev).next };
        while !current.is_null() {
            let available = unsafe { (*current).units };
            if available >= units {
                let block = if available == units {
                    unsafe { (*prev).next = (*current).next };
                    current
                } else {
                    unsafe {
                        (*current).units = available - units;
                        let tail = current.add(available - units);
                        ptr::write(
                            tail,
                            Header {
                                next: null_mut(),
                                units,
                            },
                        );
                        tail
                    }
                };
                return NonNull::new(unsafe { block.add(1) }.cast::<u8>());
            }
            prev = current;
            current = unsafe { (*current).next };
        }
        None
    }

    /// Fetch one physical page and fold it into the free list.
    #[allow(clippy::cast_ptr_alignment)]
    fn grow(&mut self) -> Result<(), HeapError> {
        let frame = self.frames.alloc_4k().ok_or(HeapError::OutOfMemory)?;
        // SAFETY: the frame was just handed to us and nothing else references it.
        let bytes = unsafe { self.mapper.frame_bytes(frame) };
        let block = bytes.as_mut_ptr().cast::<Header>();
        unsafe {
            ptr::write(
                block,
                Header {
                    next: null_mut(),
                    units: UNITS_PER_PAGE,
                },
            );
            self.insert(block);
        }
        self.pages += 1;
        debug!("kernel heap grew by {frame:?} to {} pages", self.pages);
        Ok(())
    }

    /// Insert `block` in address order, then merge with the following and the
    /// preceding neighbour if they touch it.
    ///
    /// # Safety
    /// - `block` must point to a valid header of a block not currently in the list.
    unsafe fn insert(&mut self, block: *mut Header) {
        let head = &raw mut self.head;
        let mut prev = head;
        let mut current = unsafe { (*prev).next };
        while !current.is_null() && current < block {
            prev = current;
            current = unsafe { (*current).next };
        }
        debug_assert!(!ptr::eq(current, block), "kmfree: double free of {block:p}");

        unsafe {
            if !current.is_null() && ptr::eq(block.add((*block).units), current) {
                (*block).units += (*current).units;
                (*block).next = (*current).next;
            } else {
                (*block).next = current;
            }

            if !ptr::eq(prev, head) && ptr::eq(prev.add((*prev).units), block) {
                (*prev).units += (*block).units;
                (*prev).next = (*block).next;
            } else {
                (*prev).next = block;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::test_support::{TestFrames, TestPhys};

    fn page_base(phys: &TestPhys, frame: usize) -> usize {
        let pa = kernel_memory_addresses::PhysicalAddress::new((frame * PAGE_BYTES) as u64);
        unsafe { phys.frame_bytes(pa.page()) }.as_ptr().addr()
    }

    #[test]
    fn header_is_one_unit() {
        assert_eq!(UNIT, 16);
        assert_eq!(UNITS_PER_PAGE, 256);
        assert_eq!(MAX_ALLOCATION, 4080);
    }

    #[test]
    fn first_allocation_is_carved_from_the_page_tail() {
        let phys = TestPhys::with_frames(1);
        let mut frames = TestFrames::new(1);
        let mut heap = KernelHeap::new(&phys, &mut frames);

        let p = heap.kmalloc(16).expect("allocation");
        assert_eq!(heap.pages(), 1);
        assert_eq!(p.as_ptr().addr() - page_base(&phys, 0), PAGE_BYTES - UNIT);
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_bytes(), PAGE_BYTES - 2 * UNIT);
    }

    #[test]
    fn exact_fit_unlinks_the_block() {
        let phys = TestPhys::with_frames(1);
        let mut frames = TestFrames::new(1);
        let mut heap = KernelHeap::new(&phys, &mut frames);

        let p = heap.kmalloc(MAX_ALLOCATION).expect("allocation");
        assert_eq!(p.as_ptr().addr() - page_base(&phys, 0), UNIT);
        assert_eq!(heap.free_blocks(), 0);
        assert_eq!(heap.free_bytes(), 0);
    }

    #[test]
    fn zero_byte_requests_still_get_a_payload_unit() {
        let phys = TestPhys::with_frames(1);
        let mut frames = TestFrames::new(1);
        let mut heap = KernelHeap::new(&phys, &mut frames);

        heap.kmalloc(0).expect("allocation");
        assert_eq!(heap.free_bytes(), PAGE_BYTES - 2 * UNIT);
    }

    #[test]
    fn release_merges_the_following_neighbour() {
        let phys = TestPhys::with_frames(1);
        let mut frames = TestFrames::new(1);
        let mut heap = KernelHeap::new(&phys, &mut frames);

        // Tail carving hands out descending addresses: b < a.
        let a = heap.kmalloc(32).expect("a");
        let b = heap.kmalloc(32).expect("b");
        assert!(b < a);

        unsafe { heap.kmfree(a) };
        assert_eq!(heap.free_blocks(), 2);
        unsafe { heap.kmfree(b) };
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_bytes(), PAGE_BYTES);
    }

    #[test]
    #[should_panic(expected = "more than one page")]
    fn oversized_request_panics() {
        let phys = TestPhys::with_frames(1);
        let mut frames = TestFrames::new(1);
        let mut heap = KernelHeap::new(&phys, &mut frames);
        let _ = heap.kmalloc(MAX_ALLOCATION + 1);
    }
}
