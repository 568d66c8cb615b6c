bitflags::bitflags! {
    /// Leaf page-table entry flags relevant to user mappings.
    ///
    /// The bit positions match the x86-64 PTE layout so a real page table can
    /// store them without translation.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PageEntryBits: u64 {
        /// Page is present in physical memory.
        ///
        /// Cleared entries fault on access; lazily populated regions start out
        /// with every entry cleared.
        const PRESENT  = 1 << 0;

        /// Page is writable.
        ///
        /// If cleared, user-mode stores raise a protection fault.
        const WRITABLE = 1 << 1;

        /// Page is accessible from user mode (CPL=3).
        const USER     = 1 << 2;

        /// Page has been accessed (read or written). Set by the CPU.
        const ACCESSED = 1 << 5;

        /// Page has been written to. Set by the CPU on the first store.
        ///
        /// Used for dirty-page tracking and write-back.
        const DIRTY    = 1 << 6;

        /// Instruction fetches from this page fault (requires EFER.NXE).
        const NX       = 1 << 63;
    }
}

impl PageEntryBits {
    /// Flags for a present user leaf, writable iff `writable`.
    #[inline]
    #[must_use]
    pub const fn user_leaf(writable: bool) -> Self {
        let base = Self::PRESENT.union(Self::USER).union(Self::NX);
        if writable {
            base.union(Self::WRITABLE)
        } else {
            base
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        self.contains(Self::DIRTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_leaf_is_always_present_and_user() {
        for writable in [false, true] {
            let bits = PageEntryBits::user_leaf(writable);
            assert!(bits.contains(PageEntryBits::PRESENT | PageEntryBits::USER));
            assert_eq!(bits.contains(PageEntryBits::WRITABLE), writable);
            assert!(!bits.is_dirty());
        }
    }
}
