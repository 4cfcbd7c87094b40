//! Simulated physical memory for unit tests.

use crate::{FrameAlloc, PhysMapper};
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Mutex;

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Aligned4K([u8; 4096]);

/// "RAM" as a vector of frames; physical address `n * 4096` is frame `n`.
pub struct TestPhys {
    frames: Box<[UnsafeCell<Aligned4K>]>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n).map(|_| UnsafeCell::new(Aligned4K([0; 4096]))).collect(),
        }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = usize::try_from(pa.as_u64() >> 12).unwrap();
        let off = usize::try_from(pa.offset::<Size4K>()).unwrap();
        assert!(off + size_of::<T>() <= 4096, "access crosses a frame");
        let base = self.frames[idx].get().cast::<u8>();
        unsafe { &mut *base.add(off).cast::<T>() }
    }
}

/// Frame allocator over a fixed range of frame numbers that panics on double free.
pub struct CountingAlloc {
    free: Mutex<(Vec<u64>, BTreeSet<u64>)>,
}

impl CountingAlloc {
    pub fn new(frames: Range<u64>) -> Self {
        Self {
            free: Mutex::new((frames.rev().collect(), BTreeSet::new())),
        }
    }

    /// Frames currently handed out.
    pub fn outstanding(&self) -> usize {
        self.free.lock().unwrap().1.len()
    }
}

impl FrameAlloc for CountingAlloc {
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
        let mut g = self.free.lock().unwrap();
        let n = g.0.pop()?;
        g.1.insert(n);
        Some(PhysicalPage::from_number(n))
    }

    fn free_4k(&self, frame: PhysicalPage<Size4K>) {
        let mut g = self.free.lock().unwrap();
        assert!(g.1.remove(&frame.number()), "double free of {frame:?}");
        g.0.push(frame.number());
    }
}
