//! # Mapping Façade
//!
//! `mmap`, `munmap` and `msync` on top of the [`RegionRegistry`] and the
//! collaborator traits. `mmap` only reserves address space; physical pages
//! arrive later through [`Vmm::handle_page_fault`].

use crate::error::{FaultError, FileError, MmapError, RegistryError};
use crate::fault::{self, PageFaultError};
use crate::file::{Fd, FileTable};
use crate::region::{Protection, Region, RegionKind, RegionRegistry};
use alloc::vec::Vec;
use kernel_info::memory::{DEFAULT_PROCESS_SIZE, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage, round_up_to_page};
use kernel_vmem::{FrameAlloc, PageEntryBits, PhysMapper, UserPageTable, zero_frame};
use log::{debug, trace, warn};
use stdlib::syscall_abi::{MAP_ANONYMOUS, MAP_DEFAULT, MAP_FILE, PROT_NONE, PROT_READ, PROT_WRITE};

/// Where the pages of a new mapping come from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Backing {
    Anonymous,
    /// `fd` belongs to the caller; the mapping keeps its own duplicate.
    File { fd: Fd, offset: u64 },
}

/// A validated `mmap` request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MmapRequest {
    pub hint: VirtualAddress,
    pub length: u64,
    pub protection: Protection,
    pub backing: Backing,
}

impl MmapRequest {
    /// Check raw `mmap` arguments without touching any state.
    ///
    /// - `length` must be non-zero.
    /// - `prot` is one of `PROT_NONE`, `PROT_READ`, `PROT_WRITE`; only the
    ///   latter yields writable pages.
    /// - `flags` is exactly one of `MAP_DEFAULT`, `MAP_ANONYMOUS`, `MAP_FILE`.
    ///   `MAP_DEFAULT` maps anonymous memory and ignores `fd`.
    /// - `MAP_ANONYMOUS` requires `fd == -1`, `MAP_FILE` a non-negative `fd`
    ///   and an `offset` that leaves room for the whole page-rounded mapping.
    ///
    /// # Errors
    /// An argument-class [`MmapError`] naming the first offending argument.
    pub fn validate(
        hint: VirtualAddress,
        length: u64,
        prot: u64,
        flags: u64,
        fd: i64,
        offset: u64,
    ) -> Result<Self, MmapError> {
        let Some(rounded) = round_up_to_page(length).filter(|_| length != 0) else {
            return Err(MmapError::InvalidLength);
        };

        let protection = match prot {
            PROT_NONE | PROT_READ => Protection::ReadOnly,
            PROT_WRITE => Protection::Writable,
            other => return Err(MmapError::InvalidProtection(other)),
        };

        let backing = match flags {
            MAP_DEFAULT => Backing::Anonymous,
            MAP_ANONYMOUS if fd == -1 => Backing::Anonymous,
            MAP_FILE => {
                let fd = u32::try_from(fd).map_err(|_| MmapError::DescriptorMismatch { fd })?;
                if offset.checked_add(rounded).is_none() {
                    return Err(MmapError::InvalidOffset(offset));
                }
                Backing::File {
                    fd: Fd::new(fd),
                    offset,
                }
            }
            MAP_ANONYMOUS => return Err(MmapError::DescriptorMismatch { fd }),
            other => return Err(MmapError::InvalidFlags(other)),
        };

        Ok(Self {
            hint,
            length,
            protection,
            backing,
        })
    }
}

/// The mapping state of one process: its regions and its high-water mark.
pub struct ProcessMemory {
    regions: RegionRegistry,
    size: VirtualAddress,
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new(VirtualAddress::new(DEFAULT_PROCESS_SIZE))
    }
}

impl ProcessMemory {
    /// Mapping state of a process whose image ends at `size`.
    #[must_use]
    pub const fn new(size: VirtualAddress) -> Self {
        Self {
            regions: RegionRegistry::new(),
            size,
        }
    }

    /// Like [`new`](Self::new), with mappings bounded by `ceiling`.
    #[must_use]
    pub const fn with_ceiling(size: VirtualAddress, ceiling: VirtualAddress) -> Self {
        Self {
            regions: RegionRegistry::with_ceiling(ceiling),
            size,
        }
    }

    /// The high-water mark; regions never reach past it.
    #[must_use]
    pub const fn size(&self) -> VirtualAddress {
        self.size
    }

    #[must_use]
    pub const fn regions(&self) -> &RegionRegistry {
        &self.regions
    }
}

/// Memory-mapping operations of one process.
///
/// Borrows the process's [`ProcessMemory`] and page table together with the
/// kernel's frame allocator, physical mapper and the process's file table for
/// the duration of a syscall or a page fault.
pub struct Vmm<'m, T, M, A, F>
where
    T: UserPageTable,
    M: PhysMapper,
    A: FrameAlloc,
    F: FileTable,
{
    space: &'m mut ProcessMemory,
    table: &'m mut T,
    mapper: &'m M,
    frames: &'m mut A,
    files: &'m mut F,
}

impl<'m, T, M, A, F> Vmm<'m, T, M, A, F>
where
    T: UserPageTable,
    M: PhysMapper,
    A: FrameAlloc,
    F: FileTable,
{
    #[must_use]
    pub const fn new(
        space: &'m mut ProcessMemory,
        table: &'m mut T,
        mapper: &'m M,
        frames: &'m mut A,
        files: &'m mut F,
    ) -> Self {
        Self {
            space,
            table,
            mapper,
            frames,
            files,
        }
    }

    #[must_use]
    pub const fn space(&self) -> &ProcessMemory {
        self.space
    }

    /// Reserve a lazily populated mapping from raw `mmap` arguments.
    ///
    /// See [`MmapRequest::validate`] for the accepted argument combinations.
    ///
    /// # Errors
    /// Argument errors before anything is changed; otherwise those of [`map`](Self::map).
    pub fn mmap(
        &mut self,
        hint: VirtualAddress,
        length: u64,
        prot: u64,
        flags: u64,
        fd: i64,
        offset: u64,
    ) -> Result<VirtualAddress, MmapError> {
        let request = MmapRequest::validate(hint, length, prot, flags, fd, offset)?;
        self.map(request)
    }

    /// Reserve a lazily populated mapping.
    ///
    /// No physical memory is touched. For file mappings the caller's
    /// descriptor is duplicated; if that fails, the reservation is undone.
    ///
    /// # Errors
    /// - [`MmapError::Registry`] if no address space or metadata storage is left.
    /// - [`MmapError::File`] if the descriptor could not be duplicated.
    pub fn map(&mut self, request: MmapRequest) -> Result<VirtualAddress, MmapError> {
        let regions = &mut self.space.regions;
        let id = regions.acquire_region(request.hint, request.length, &mut self.space.size)?;

        let (kind, offset, fd) = match request.backing {
            Backing::Anonymous => (RegionKind::Anonymous, 0, None),
            Backing::File { fd, offset } => match self.files.duplicate(fd) {
                Ok(dup) => (RegionKind::FileBacked, offset, Some(dup)),
                Err(e) => {
                    warn!("mmap: cannot duplicate fd {fd}: {e}");
                    regions.release_region(id)?;
                    return Err(e.into());
                }
            },
        };

        let region = regions
            .region_mut(id)
            .ok_or(RegistryError::StaleHandle(id))?;
        region.stamp(kind, request.protection, offset, fd);

        let base = region.base();
        debug!(
            "mmap({}, {:#x}) = {base} ({kind:?}, {:?})",
            request.hint, request.length, request.protection
        );
        Ok(base)
    }

    /// Tear down the mapping created by `mmap(…, length, …)` that returned `addr`.
    ///
    /// Every resident page is unmapped first. Only once all of them are gone
    /// are the frames zeroed and released, the region's descriptor closed and
    /// the region turned into a free hole.
    ///
    /// # Errors
    /// - [`MmapError::NotMapped`] without an exact `(addr, length)` match.
    /// - [`MmapError::Map`] if a page could not be unmapped. Pages unmapped
    ///   before the failure are mapped back with their contents, so the
    ///   mapping stays fully intact.
    /// - [`MmapError::File`] if closing the descriptor failed. The mapping is
    ///   torn down regardless.
    pub fn munmap(&mut self, addr: VirtualAddress, length: u64) -> Result<(), MmapError> {
        let id = self
            .space
            .regions
            .find_region(addr, length)
            .ok_or(MmapError::NotMapped { addr, length })?;
        let region = self
            .space
            .regions
            .region(id)
            .cloned()
            .ok_or(MmapError::NotMapped { addr, length })?;

        self.release_pages(&region)?;

        let closed = region.fd().map_or(Ok(()), |fd| self.files.close(fd));
        self.space.regions.release_region(id)?;
        if let Err(e) = closed {
            warn!("munmap({addr}, {length:#x}): closing the backing file failed: {e}");
            return Err(e.into());
        }

        debug!("munmap({addr}, {length:#x})");
        Ok(())
    }

    /// Write the dirty pages of a file-backed mapping back to its file.
    ///
    /// Pages are visited in ascending order. A page that is not resident or
    /// not dirty is skipped; a dirty page is written in full at
    /// `file_offset + n * PAGE_SIZE` and its dirty bit cleared.
    ///
    /// # Errors
    /// - [`MmapError::NotMapped`] without an exact `(addr, length)` match.
    /// - [`MmapError::NotFileBacked`] for anonymous mappings.
    /// - [`MmapError::File`] on the first failed seek or write; later pages
    ///   are left unsynced.
    pub fn msync(&mut self, addr: VirtualAddress, length: u64) -> Result<(), MmapError> {
        let region = self
            .space
            .regions
            .find_region(addr, length)
            .and_then(|id| self.space.regions.region(id))
            .ok_or(MmapError::NotMapped { addr, length })?;
        let Some(fd) = region.fd() else {
            return Err(MmapError::NotFileBacked(addr));
        };
        let file_offset = region.file_offset();

        let mut written = 0usize;
        for (index, page) in (0u64..).zip(VirtualPage::span(addr, length)) {
            let Some((frame, flags)) = self.table.query(page) else {
                continue;
            };
            if !flags.is_dirty() {
                continue;
            }

            let position = index
                .checked_mul(PAGE_SIZE)
                .and_then(|delta| file_offset.checked_add(delta))
                .ok_or(FileError::OffsetOverflow)?;
            self.files.seek(fd, position)?;
            // SAFETY: the frame stays mapped and owned by this region for the write.
            let bytes = unsafe { self.mapper.frame_bytes(frame) };
            let n = self.files.write(fd, bytes)?;
            if n != bytes.len() {
                return Err(FileError::ShortTransfer {
                    expected: bytes.len(),
                    actual: n,
                }
                .into());
            }
            self.table.clear_dirty(page);
            trace!("msync: wrote back {page}");
            written += 1;
        }

        debug!("msync({addr}, {length:#x}): {written} pages written");
        Ok(())
    }

    /// Unmap every live mapping, e.g. when the process exits.
    ///
    /// # Errors
    /// The first failing [`munmap`](Self::munmap); earlier mappings stay released.
    pub fn munmap_all(&mut self) -> Result<(), MmapError> {
        let live: Vec<(VirtualAddress, u64)> = self
            .space
            .regions
            .live()
            .map(|(_, region)| (region.base(), region.requested_len()))
            .collect();
        for (addr, length) in live {
            self.munmap(addr, length)?;
        }
        Ok(())
    }

    /// Resolve a not-present fault at `addr` by populating one page.
    ///
    /// # Errors
    /// See [`fault::populate`].
    pub fn handle_page_fault(&mut self, addr: VirtualAddress) -> Result<(), FaultError> {
        fault::populate(
            &self.space.regions,
            self.table,
            self.mapper,
            self.frames,
            self.files,
            addr,
        )
    }

    /// Trap-side entry: reject protection violations, populate everything else.
    ///
    /// # Errors
    /// [`FaultError::ProtectionViolation`] for faults on present pages, else
    /// those of [`handle_page_fault`](Self::handle_page_fault).
    pub fn handle_trap(
        &mut self,
        error: PageFaultError,
        addr: VirtualAddress,
    ) -> Result<(), FaultError> {
        if !error.is_demand_fault() {
            warn!("page fault at {addr}: {}", error.explain());
            return Err(FaultError::ProtectionViolation(addr));
        }
        self.handle_page_fault(addr)
    }

    /// Unmap every resident page of `region`, then zero and free the frames.
    ///
    /// Either every page is released or, if an unmap fails, the pages taken
    /// down so far are restored and nothing is freed.
    fn release_pages(&mut self, region: &Region) -> Result<(), MmapError> {
        let mut unmapped: Vec<(VirtualPage, PhysicalPage, PageEntryBits)> = Vec::new();
        for page in VirtualPage::span(region.base(), region.reserved_len()) {
            let Some((_, flags)) = self.table.query(page) else {
                continue;
            };
            match self.table.unmap_page(page) {
                Ok(Some(frame)) => unmapped.push((page, frame, flags)),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "munmap: unmapping {page} failed: {e}; restoring {} pages",
                        unmapped.len()
                    );
                    self.restore(&unmapped);
                    return Err(e.into());
                }
            }
        }

        for (page, frame, _) in unmapped {
            // SAFETY: the frame is no longer mapped and belongs to this region.
            unsafe { zero_frame(self.mapper, frame) };
            self.frames.free_4k(frame);
            trace!("munmap: released {page} ({frame:?})");
        }
        Ok(())
    }

    /// Map back pages taken down by a failed [`release_pages`](Self::release_pages).
    fn restore(&mut self, unmapped: &[(VirtualPage, PhysicalPage, PageEntryBits)]) {
        for &(page, frame, flags) in unmapped {
            if let Err(e) = self.table.map_page(page, frame, flags) {
                warn!("munmap: cannot restore {page}: {e}");
            }
        }
    }
}
