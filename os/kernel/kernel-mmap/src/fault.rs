//! # Fault Populator
//!
//! Regions are reserved without any physical backing. The first access to
//! each page raises a not-present page fault, and the trap dispatcher hands
//! the faulting address to [`populate`]:
//!
//! 1. find the live region containing the address, else the fault is unhandled;
//! 2. take one frame from the frame allocator and zero it;
//! 3. for file-backed regions, read the matching slice of the file into it;
//! 4. install it at the page-aligned address, writable only for writable
//!    regions and always user-accessible.
//!
//! Exactly one page is populated per fault. The page is hydrated before it is
//! installed, so a failed read leaves nothing mapped and the next access
//! faults again.

use crate::error::{FaultError, FileError};
use crate::file::FileTable;
use crate::region::{Region, RegionKind, RegionRegistry};
use bitfield_struct::bitfield;
use kernel_info::memory::{PAGE_BYTES, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{FrameAlloc, PageEntryBits, PhysMapper, UserPageTable, zero_frame};
use log::{debug, trace, warn};

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64, // reserved / ignored bits
}

impl PageFaultError {
    /// Whether lazy population can resolve this fault at all.
    ///
    /// Only accesses to pages that are not present qualify; everything else
    /// is a protection violation the process has to answer for.
    #[must_use]
    pub const fn is_demand_fault(&self) -> bool {
        !self.present() && !self.reserved_bit() && !self.protection_key()
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (not yet populated or unmapped)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page (likely NX or SMEP)"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Back the page containing `addr` with a fresh frame.
///
/// A fault on a page that is already resident counts as resolved and
/// allocates nothing.
///
/// # Errors
/// - [`FaultError::Unhandled`] if no live region contains `addr`.
/// - [`FaultError::OutOfMemory`] if no frame is available.
/// - [`FaultError::File`] if hydrating a file-backed page failed.
/// - [`FaultError::Map`] if the page table refused the mapping.
///
/// On every error the frame is returned and nothing stays mapped.
pub fn populate<T, M, A, F>(
    regions: &RegionRegistry,
    table: &mut T,
    mapper: &M,
    frames: &mut A,
    files: &mut F,
    addr: VirtualAddress,
) -> Result<(), FaultError>
where
    T: UserPageTable,
    M: PhysMapper,
    A: FrameAlloc,
    F: FileTable,
{
    let Some(region) = regions
        .find_containing(addr)
        .and_then(|id| regions.region(id))
    else {
        warn!("page fault at {addr} outside of any mapping");
        return Err(FaultError::Unhandled(addr));
    };

    let page = addr.page();
    if table.query(page).is_some() {
        trace!("page {page} is already resident");
        return Ok(());
    }

    let frame = frames.alloc_4k().ok_or_else(|| {
        warn!("page fault at {addr}: out of physical memory");
        FaultError::OutOfMemory
    })?;
    // SAFETY: the frame was just handed to us and is not mapped anywhere yet.
    unsafe { zero_frame(mapper, frame) };

    if let Err(e) = hydrate(region, page, frame, mapper, files) {
        warn!("page fault at {addr}: {e}");
        frames.free_4k(frame);
        return Err(e.into());
    }

    let flags = PageEntryBits::user_leaf(region.protection().is_writable());
    if let Err(e) = table.map_page(page, frame, flags) {
        warn!("page fault at {addr}: {e}");
        frames.free_4k(frame);
        return Err(e.into());
    }

    debug!("populated {page} with {frame:?} ({:?})", region.kind());
    Ok(())
}

/// Read the part of the backing file that belongs to `page` into `frame`.
///
/// Page `n` of a region holds the file bytes starting at
/// `file_offset + n * PAGE_SIZE`. Bytes past the requested length of the
/// mapping, or past the end of the file, stay zero.
fn hydrate<M, F>(
    region: &Region,
    page: VirtualPage,
    frame: PhysicalPage,
    mapper: &M,
    files: &mut F,
) -> Result<(), FileError>
where
    M: PhysMapper,
    F: FileTable,
{
    let (RegionKind::FileBacked, Some(fd)) = (region.kind(), region.fd()) else {
        return Ok(());
    };

    let page_offset = page.base().as_u64() - region.base().as_u64();
    let Some(remaining) = region.requested_len().checked_sub(page_offset) else {
        return Ok(());
    };
    #[allow(clippy::cast_possible_truncation)]
    let want = remaining.min(PAGE_SIZE) as usize;

    let position = region
        .file_offset()
        .checked_add(page_offset)
        .ok_or(FileError::OffsetOverflow)?;
    files.seek(fd, position)?;

    // SAFETY: we own `frame` until it is installed.
    let bytes: &mut [u8; PAGE_BYTES] = unsafe { mapper.frame_bytes(frame) };
    let mut filled = 0;
    while filled < want {
        match files.read(fd, &mut bytes[filled..want])? {
            0 => break,
            n => filled += n,
        }
    }
    trace!("hydrated {page} with {filled} bytes from fd {fd}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_faults_are_demand_faults() {
        let err = PageFaultError::new().with_write(true).with_user(true);
        assert!(err.is_demand_fault());
        assert_eq!(err.into_bits(), 0b110);
    }

    #[test]
    fn protection_violations_are_not() {
        let err = PageFaultError::from_bits(0b111);
        assert!(err.present());
        assert!(!err.is_demand_fault());
        assert_eq!(err.explain(), "Write access to protected page");
    }

    #[test]
    fn reserved_bit_faults_are_not() {
        let err = PageFaultError::new().with_reserved_bit(true);
        assert!(!err.is_demand_fault());
    }
}
