//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB frame over a fixed, contiguous physical region. The
//! bitmap lives inline so the allocator can be a `static` before any heap
//! exists.

use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_sync::SpinLock;
use kernel_vmem::FrameAlloc;

/// Frame allocator for up to `WORDS * 64` frames starting at `base`.
///
/// ```rust
/// # use kernel_alloc::BitmapFrameAlloc;
/// # use kernel_memory_addresses::PhysicalPage;
/// # use kernel_vmem::FrameAlloc;
/// let pmm = BitmapFrameAlloc::<2>::new(PhysicalPage::from_number(0x100), 100);
/// let f = pmm.alloc_4k().unwrap();
/// assert_eq!(pmm.free_count(), 99);
/// pmm.free_4k(f);
/// assert_eq!(pmm.free_count(), 100);
/// ```
pub struct BitmapFrameAlloc<const WORDS: usize> {
    base: PhysicalPage<Size4K>,
    frames: u64,
    state: SpinLock<Bitmap<WORDS>>,
}

struct Bitmap<const WORDS: usize> {
    /// Set bit = frame in use.
    used: [u64; WORDS],
    free: u64,
    /// Word to start the next search at.
    hint: usize,
}

impl<const WORDS: usize> BitmapFrameAlloc<WORDS> {
    /// Manage `frames` frames from `base` upwards, all initially free.
    ///
    /// ### Panics
    /// If `frames` exceeds the bitmap capacity.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(base: PhysicalPage<Size4K>, frames: u64) -> Self {
        assert!(frames <= WORDS as u64 * 64, "bitmap too small");
        let mut used = [0u64; WORDS];
        // Mark the tail beyond `frames` as permanently used.
        let mut i = frames;
        while i < WORDS as u64 * 64 {
            used[(i / 64) as usize] |= 1 << (i % 64);
            i += 1;
        }
        Self {
            base,
            frames,
            state: SpinLock::new(Bitmap {
                used,
                free: frames,
                hint: 0,
            }),
        }
    }

    /// Frames currently available.
    pub fn free_count(&self) -> u64 {
        self.state.with_lock(|s| s.free)
    }

    /// Total frames under management.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.frames
    }

    /// Mark `frame` as used without handing it out, e.g. firmware-reserved memory.
    /// Returns `false` if it was already in use or outside the region.
    pub fn reserve(&self, frame: PhysicalPage<Size4K>) -> bool {
        let Some(bit) = self.bit_of(frame) else {
            return false;
        };
        self.state.with_lock(|s| {
            let (w, m) = (bit / 64, 1u64 << (bit % 64));
            if s.used[w] & m != 0 {
                return false;
            }
            s.used[w] |= m;
            s.free -= 1;
            true
        })
    }

    fn bit_of(&self, frame: PhysicalPage<Size4K>) -> Option<usize> {
        let rel = frame.number().checked_sub(self.base.number())?;
        if rel >= self.frames {
            return None;
        }
        usize::try_from(rel).ok()
    }
}

impl<const WORDS: usize> FrameAlloc for BitmapFrameAlloc<WORDS> {
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
        let rel = self.state.with_lock(|s| {
            if s.free == 0 {
                return None;
            }
            for n in 0..WORDS {
                let w = (s.hint + n) % WORDS;
                let word = s.used[w];
                if word != u64::MAX {
                    let bit = word.trailing_ones();
                    s.used[w] |= 1 << bit;
                    s.free -= 1;
                    s.hint = w;
                    return Some(w as u64 * 64 + u64::from(bit));
                }
            }
            None
        });
        if rel.is_none() {
            log::warn!(target: "tasking", "physical frames exhausted");
        }
        rel.map(|r| PhysicalPage::from_number(self.base.number() + r))
    }

    /// ### Panics
    /// On a frame outside the region or one that is not allocated; both
    /// indicate a double free or a foreign frame.
    fn free_4k(&self, frame: PhysicalPage<Size4K>) {
        let bit = self
            .bit_of(frame)
            .unwrap_or_else(|| panic!("{frame} does not belong to this allocator"));
        self.state.with_lock(|s| {
            let (w, m) = (bit / 64, 1u64 << (bit % 64));
            assert!(s.used[w] & m != 0, "double free of {frame}");
            s.used[w] &= !m;
            s.free += 1;
        });
    }
}
