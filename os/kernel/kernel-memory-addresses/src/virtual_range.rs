use crate::{PageSize, Size4K, VirtualAddress, VirtualPage};
use core::fmt;

/// A half-open range `[start, end)` of whole 4 KiB virtual pages.
///
/// Used for stacks, TLS blocks and pool reservations. Both bounds are
/// page-aligned; an empty range has `start == end`.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let r = VirtualRange::from_pages(VirtualAddress::new(0x0070_0000), 4);
/// assert_eq!(r.page_count(), 4);
/// assert_eq!(r.first_page().base().as_u64(), 0x0070_0000);
/// assert_eq!(r.last_page().unwrap().base().as_u64(), 0x0070_3000);
/// assert!(!r.contains(VirtualAddress::new(0x0070_4000)));
/// ```
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct VirtualRange {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl VirtualRange {
    /// Build a range from explicit bounds.
    ///
    /// Debug-asserts that both bounds are page-aligned and `start <= end`.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        debug_assert!(start.is_aligned::<Size4K>(), "unaligned range start");
        debug_assert!(end.is_aligned::<Size4K>(), "unaligned range end");
        debug_assert!(start.as_u64() <= end.as_u64(), "inverted range");
        Self { start, end }
    }

    /// Range of `pages` pages starting at `start`.
    #[inline]
    #[must_use]
    pub const fn from_pages(start: VirtualAddress, pages: u64) -> Self {
        Self::new(start, VirtualAddress::new(start.as_u64() + pages * Size4K::SIZE))
    }

    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            start: VirtualAddress::zero(),
            end: VirtualAddress::zero(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start.as_u64() == self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.len() >> Size4K::SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.start.as_u64() && va.as_u64() < self.end.as_u64()
    }

    /// Lowest page of the range. For stacks this is the guard page.
    #[inline]
    #[must_use]
    pub const fn first_page(&self) -> VirtualPage<Size4K> {
        VirtualPage::containing_address(self.start)
    }

    /// Highest page of the range, `None` if the range is empty.
    #[inline]
    #[must_use]
    pub const fn last_page(&self) -> Option<VirtualPage<Size4K>> {
        if self.is_empty() {
            return None;
        }
        Some(VirtualPage::containing_address(VirtualAddress::new(
            self.end.as_u64() - Size4K::SIZE,
        )))
    }

    /// Iterate all pages from `start` upwards.
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> PageIter {
        PageIter {
            next: self.start.as_u64(),
            end: self.end.as_u64(),
        }
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {})", self.start, self.end)
    }
}

/// Ascending iterator over the 4 KiB pages of a [`VirtualRange`].
#[derive(Clone)]
pub struct PageIter {
    next: u64,
    end: u64,
}

impl Iterator for PageIter {
    type Item = VirtualPage<Size4K>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let page = VirtualPage::containing_address(VirtualAddress::new(self.next));
        self.next += Size4K::SIZE;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from((self.end.saturating_sub(self.next)) >> Size4K::SHIFT)
            .unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl ExactSizeIterator for PageIter {}
