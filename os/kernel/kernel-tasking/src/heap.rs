//! # Heap Manager
//!
//! Per-process program break. The heap is one contiguous run of pages
//! starting at the page-aligned end of the process image:
//!
//! ```text
//!   start                      brk     start + pages * 4096
//!     │                         │              │
//!     ▼                         ▼              ▼
//!     ┌────────┬────────┬───────────────┐
//!     │ page 0 │ page 1 │ page 2 (part) │ unmapped ...
//!     └────────┴────────┴───────────────┘
//! ```
//!
//! `brk` never passes the mapped end and at least one page stays mapped
//! once the heap exists.

use crate::task::HeapState;
use crate::{
    ExecutionContext, HeapError, PageSpace, Process, Processor, TaskingMemory, with_address_space,
};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, PageTableEntry, PhysMapper, alloc_zeroed};

impl<'k, M: PhysMapper, F: FrameAlloc> TaskingMemory<'k, M, F> {
    /// Move the break of `process` by `delta` bytes and return the previous
    /// break.
    ///
    /// The first call sets the heap up at the end of the process image with
    /// one mapped page. A `delta` of 0 only queries (and possibly sets up)
    /// the heap.
    ///
    /// # Errors
    /// See [`HeapError`]. On any error the break is unchanged.
    pub fn extend_heap<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        process: &Process,
        delta: i64,
    ) -> Result<VirtualAddress, HeapError> {
        let mut heap = process.heap.lock();
        with_address_space(ctx, process.space(), || {
            self.move_break(ctx, process.space(), process.image_end(), &mut heap, delta)
        })
    }

    fn move_break<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        space: PageSpace,
        image_end: VirtualAddress,
        slot: &mut Option<HeapState>,
        delta: i64,
    ) -> Result<VirtualAddress, HeapError> {
        let aspace = self.address_space(space);

        let state = match slot {
            Some(state) => state,
            None => {
                let start = image_end.align_up::<Size4K>();
                self.map_heap_page(&aspace, start)?;
                log::debug!(target: "heap", "heap of {space} starts at {start}");
                slot.insert(HeapState {
                    start,
                    brk: start,
                    pages: 1,
                })
            }
        };

        let old_brk = state.brk;
        let new_brk = old_brk
            .checked_add_signed(delta)
            .ok_or(HeapError::Overflow)?;
        if new_brk < state.start {
            return Err(HeapError::BelowStart);
        }
        if new_brk > self.config.heap_limit {
            return Err(HeapError::LimitExceeded {
                limit: self.config.heap_limit,
            });
        }

        while new_brk > state.mapped_end() {
            self.map_heap_page(&aspace, state.mapped_end())?;
            state.pages += 1;
        }

        while state.pages > 1 && new_brk.as_u64() <= state.start.as_u64() + (state.pages - 1) * PAGE_SIZE
        {
            state.pages -= 1;
            let va = state.mapped_end();
            if let Ok(frame) = aspace.unmap_one(va) {
                ctx.processor().invalidate_page(va);
                self.frames.free_4k(frame);
            }
        }

        state.brk = new_brk;
        log::trace!(
            target: "heap",
            "break of {space} moved {old_brk} -> {new_brk}, {} pages",
            state.pages
        );
        Ok(old_brk)
    }

    fn map_heap_page(&self, aspace: &AddressSpace<'k, M>, va: VirtualAddress) -> Result<(), HeapError> {
        let Some(frame) = alloc_zeroed(self.frames, self.mapper) else {
            log::warn!(target: "heap", "out of frames growing the heap at {va}");
            return Err(HeapError::OutOfMemory);
        };
        aspace
            .map_one(
                self.frames,
                va,
                frame,
                PageTableEntry::USER_TABLE,
                PageTableEntry::USER_DATA,
            )
            .inspect_err(|_| self.frames.free_4k(frame))
            .map_err(HeapError::from)
    }
}
