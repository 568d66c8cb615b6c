//! # HHDM-based `PhysMapper`
//!
//! With a higher-half direct map every physical address is visible to the
//! kernel at `HHDM_BASE + pa`, so converting is a single addition.

use crate::PhysMapper;
use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::PhysicalAddress;

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// - The HHDM mapping must be present and cover the referenced physical range.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Kernel virtual address through which `pa` is reachable.
    #[inline]
    #[must_use]
    pub const fn virt_of(pa: PhysicalAddress) -> u64 {
        HHDM_BASE + pa.as_u64()
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = Self::virt_of(pa) as usize as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_into_direct_map() {
        let pa = PhysicalAddress::new(0x1234_5000);
        assert_eq!(HhdmPhysMapper::virt_of(pa), HHDM_BASE + 0x1234_5000);
    }
}
