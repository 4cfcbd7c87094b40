//! # Virtual Address Range Pool
//!
//! Hands out page-granular virtual ranges from a fixed window. Used for
//! kernel and interrupt stacks (one shared kernel pool), user stacks and TLS
//! blocks (one pool per process) and low-memory restricted-mode stacks.
//!
//! The pool only manages addresses; it neither maps nor backs anything.
//! Reservations are kept sorted by start address and placed first-fit.

use alloc::collections::BTreeMap;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress, VirtualRange};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangePoolError {
    /// No gap of the requested size is left.
    #[error("no free range of {0} pages")]
    Exhausted(u64),
    /// `free` was called with an address that does not start a reservation.
    #[error("{0} does not start a reserved range")]
    UnknownRange(VirtualAddress),
}

/// First-fit pool over `[base, end)`.
///
/// ```rust
/// # use kernel_alloc::AddressRangePool;
/// # use kernel_memory_addresses::{VirtualAddress, VirtualRange};
/// let mut pool = AddressRangePool::new(VirtualRange::from_pages(VirtualAddress::new(0x70_0000), 16));
/// let stack = pool.allocate(4).unwrap();
/// assert_eq!(stack.start().as_u64(), 0x70_0000);
/// assert_eq!(stack.end().as_u64(), 0x70_4000);
/// assert_eq!(pool.free(stack.start()), Ok(stack));
/// ```
#[derive(Debug)]
pub struct AddressRangePool {
    window: VirtualRange,
    /// start address → page count
    reserved: BTreeMap<u64, u64>,
}

impl AddressRangePool {
    #[must_use]
    pub const fn new(window: VirtualRange) -> Self {
        Self {
            window,
            reserved: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> VirtualRange {
        self.window
    }

    /// Reserve `pages` contiguous pages at the lowest address that fits.
    ///
    /// # Errors
    /// [`RangePoolError::Exhausted`] if no gap is large enough or `pages` is 0.
    pub fn allocate(&mut self, pages: u64) -> Result<VirtualRange, RangePoolError> {
        let len = pages
            .checked_mul(Size4K::SIZE)
            .filter(|&l| l > 0)
            .ok_or(RangePoolError::Exhausted(pages))?;

        let mut cursor = self.window.start().as_u64();
        for (&start, &count) in &self.reserved {
            if start - cursor >= len {
                break;
            }
            cursor = start + count * Size4K::SIZE;
        }

        let end = cursor.checked_add(len).ok_or(RangePoolError::Exhausted(pages))?;
        if end > self.window.end().as_u64() {
            log::warn!(target: "tasking", "range pool {:?} exhausted ({pages} pages)", self.window);
            return Err(RangePoolError::Exhausted(pages));
        }

        self.reserved.insert(cursor, pages);
        Ok(VirtualRange::from_pages(VirtualAddress::new(cursor), pages))
    }

    /// Release the reservation starting at `start`.
    ///
    /// # Errors
    /// [`RangePoolError::UnknownRange`] if `start` is not the start of a reservation.
    pub fn free(&mut self, start: VirtualAddress) -> Result<VirtualRange, RangePoolError> {
        self.reserved
            .remove(&start.as_u64())
            .map(|pages| VirtualRange::from_pages(start, pages))
            .ok_or(RangePoolError::UnknownRange(start))
    }

    /// Number of live reservations.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }
}
