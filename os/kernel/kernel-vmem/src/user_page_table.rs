use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalPage, VirtualPage};

/// Leaf-level view of one process's page table.
///
/// Implementations own the intermediate tables and the TLB shootdown; callers
/// only ever deal in 4 KiB leaves.
pub trait UserPageTable {
    /// Install `frame` at `page` with `flags`.
    ///
    /// # Errors
    /// - [`MapError::AlreadyMapped`] if `page` already has a present leaf.
    /// - [`MapError::OutOfMemory`] if an intermediate table could not be allocated.
    fn map_page(
        &mut self,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), MapError>;

    /// Remove the leaf at `page` and return the frame it pointed to.
    ///
    /// Returns `Ok(None)` if nothing was mapped there.
    ///
    /// # Errors
    /// [`MapError::WalkFailed`] if the table structure could not be updated.
    fn unmap_page(&mut self, page: VirtualPage) -> Result<Option<PhysicalPage>, MapError>;

    /// Frame and flags of the present leaf at `page`, if any.
    fn query(&self, page: VirtualPage) -> Option<(PhysicalPage, PageEntryBits)>;

    /// Clear the hardware dirty bit of the leaf at `page`. No-op if unmapped.
    fn clear_dirty(&mut self, page: VirtualPage);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("page {0} is already mapped")]
    AlreadyMapped(VirtualPage),
    #[error("out of memory while allocating page tables")]
    OutOfMemory,
    #[error("page table walk failed at {0}")]
    WalkFailed(VirtualPage),
}
