use crate::{PAGE_SIZE, VirtualAddress, round_down_to_page};
use core::fmt;

/// Base of a 4 KiB virtual page.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero (page aligned).
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let vp = VirtualAddress::new(0x5123).page();
/// assert_eq!(vp.base().as_u64(), 0x5000);
/// assert_eq!(VirtualPage::span(vp.base(), 0x1001).count(), 2);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(VirtualAddress);

impl VirtualPage {
    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self(VirtualAddress::new(round_down_to_page(addr.as_u64())))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.0
    }

    /// Iterates the pages covering `[start, start + len)`.
    ///
    /// `start` is aligned down; a partial trailing page is included.
    #[inline]
    #[must_use]
    pub const fn span(start: VirtualAddress, len: u64) -> PageSpan {
        let first = round_down_to_page(start.as_u64());
        let end = start.as_u64().saturating_add(len);
        PageSpan {
            next: first,
            end,
        }
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#018X})", self.0.as_u64())
    }
}

/// Ascending iterator over the pages of an address range.
///
/// Created by [`VirtualPage::span`].
#[derive(Debug, Clone)]
pub struct PageSpan {
    next: u64,
    end: u64,
}

impl Iterator for PageSpan {
    type Item = VirtualPage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let page = VirtualPage(VirtualAddress::new(self.next));
        self.next = self.next.saturating_add(PAGE_SIZE);
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_covers_partial_trailing_page() {
        let pages: Vec<_> = VirtualPage::span(VirtualAddress::new(0x3000), 0x1001)
            .map(|p| p.base().as_u64())
            .collect();
        assert_eq!(pages, vec![0x3000, 0x4000]);
    }

    #[test]
    fn span_of_zero_length_is_empty() {
        assert_eq!(VirtualPage::span(VirtualAddress::new(0x3000), 0).count(), 0);
    }

    #[test]
    fn span_aligns_start_down() {
        let pages: Vec<_> = VirtualPage::span(VirtualAddress::new(0x3800), 0x1000)
            .map(|p| p.base().as_u64())
            .collect();
        assert_eq!(pages, vec![0x3000, 0x4000]);
    }
}
