//! # Stack Manager
//!
//! Guard-page stacks that start with a single mapped page and grow downwards
//! on demand from the page-fault path.
//!
//! ```text
//!   end ─────────► ┌──────────────┐
//!                  │  top page    │  mapped at creation
//!                  ├──────────────┤
//!                  │  body        │  mapped by grow_on_fault
//!                  │     ...      │
//!                  ├──────────────┤
//!   start ───────► │  guard page  │  never mapped
//!                  └──────────────┘
//! ```
//!
//! Kernel-thread and interrupt stacks come from the shared kernel window and
//! live in the kernel half, so every space sees them. User stacks
//! come from the process's own window.

use crate::{
    ExecutionContext, PageSpace, Process, Processor, SecurityLevel, TaskingMemory,
    TaskingMemoryError, Thread, ThreadKind, with_address_space,
};
use kernel_alloc::AddressRangePool;
use kernel_memory_addresses::{Size4K, VirtualAddress, VirtualPage, VirtualRange};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PageTableEntry, PhysMapper, alloc_zeroed};

/// Smallest lazy stack: the guard page plus the top page.
pub const MIN_STACK_PAGES: u64 = 2;

/// How a stack's pages are backed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StackOrigin {
    /// Guard page plus demand-mapped body.
    Lazy,
    /// Pre-backed low-memory window; nothing is mapped or freed per page.
    LowMemory,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stack {
    range: VirtualRange,
    origin: StackOrigin,
}

impl Stack {
    #[inline]
    #[must_use]
    pub const fn new(range: VirtualRange, origin: StackOrigin) -> Self {
        Self { range, origin }
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> VirtualRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub const fn origin(&self) -> StackOrigin {
        self.origin
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.range.start()
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.range.end()
    }

    /// Initial stack pointer; the stack grows down from here.
    #[inline]
    #[must_use]
    pub const fn top(&self) -> VirtualAddress {
        self.range.end()
    }

    #[inline]
    #[must_use]
    pub const fn guard_page(&self) -> VirtualPage<Size4K> {
        self.range.first_page()
    }
}

/// Outcome of offering a page fault to the stack manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultResolution {
    /// A stack page was mapped; the faulting instruction can be retried.
    Resolved,
    /// Not a growable stack access; generic fault handling takes over.
    Unhandled,
}

impl<M: PhysMapper, F: FrameAlloc> TaskingMemory<'_, M, F> {
    /// Reserve `pages` pages from `pool` and map the topmost one into `space`.
    ///
    /// # Errors
    /// - [`TaskingMemoryError::StackTooSmall`] if `pages` is below [`MIN_STACK_PAGES`].
    /// - [`TaskingMemoryError::RangeExhausted`] if `pool` has no room.
    /// - [`TaskingMemoryError::OutOfMemory`] if the top page cannot be backed.
    ///   The range is handed back to `pool`.
    pub fn create_stack(
        &self,
        space: PageSpace,
        pool: &SpinLock<AddressRangePool>,
        table_flags: PageTableEntry,
        page_flags: PageTableEntry,
        pages: u64,
    ) -> Result<Stack, TaskingMemoryError> {
        if pages < MIN_STACK_PAGES {
            return Err(TaskingMemoryError::StackTooSmall { pages });
        }
        let range = pool.lock().allocate(pages)?;
        let Some(top) = range.last_page() else {
            Self::release_range(pool, range.start());
            return Err(TaskingMemoryError::RangeExhausted { pages });
        };

        let Some(frame) = alloc_zeroed(self.frames, self.mapper) else {
            log::warn!(target: "tasking", "no frame for the top page of stack {range:?}");
            Self::release_range(pool, range.start());
            return Err(TaskingMemoryError::OutOfMemory);
        };

        if let Err(e) = self.address_space(space).map_one(
            self.frames,
            top.base(),
            frame,
            table_flags,
            page_flags,
        ) {
            self.frames.free_4k(frame);
            Self::release_range(pool, range.start());
            return Err(e.into());
        }

        log::debug!(target: "tasking", "created stack {range:?} in {space}");
        Ok(Stack::new(range, StackOrigin::Lazy))
    }

    /// Unmap and free every mapped page of `stack`, then hand its range
    /// back to `pool`.
    ///
    /// Low-memory stacks only give back their range.
    pub fn destroy_stack<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        space: PageSpace,
        pool: &SpinLock<AddressRangePool>,
        stack: Stack,
    ) {
        if stack.origin() == StackOrigin::Lazy {
            let freed = self.release_pages(ctx, space, stack.range());
            log::debug!(
                target: "tasking",
                "destroyed stack {:?} in {space}, {freed} pages freed",
                stack.range()
            );
        }
        Self::release_range(pool, stack.start());
    }

    /// Unmap and free whatever is mapped in `range` of `space`.
    ///
    /// Returns the number of frames freed.
    pub(crate) fn release_pages<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        space: PageSpace,
        range: VirtualRange,
    ) -> u64 {
        let aspace = self.address_space(space);
        let flush = space == self.kernel_space || ctx.processor().active_space() == space;
        let mut freed = 0;
        for page in range.pages() {
            if let Ok(frame) = aspace.unmap_one(page.base()) {
                if flush {
                    ctx.processor().invalidate_page(page.base());
                }
                self.frames.free_4k(frame);
                freed += 1;
            }
        }
        freed
    }

    pub(crate) fn release_range(pool: &SpinLock<AddressRangePool>, start: VirtualAddress) {
        if let Err(e) = pool.lock().free(start) {
            log::warn!(target: "tasking", "releasing range at {start}: {e}");
        }
    }

    /// Map the stack page containing `fault` if it is a legitimate growth
    /// access of `thread`'s stack.
    ///
    /// Returns `false` for addresses outside the stack, for the guard page,
    /// for pages that are already mapped (a protection fault) and when no
    /// frame is left. Only the stack itself is touched; no lock beyond the
    /// thread's own memory record is taken.
    pub fn grow_on_fault<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        thread: &Thread,
        fault: VirtualAddress,
    ) -> bool {
        let Some(stack) = thread.memory().stack else {
            return false;
        };
        if stack.origin() != StackOrigin::Lazy {
            return false;
        }

        let page = fault.align_down::<Size4K>();
        if !stack.range().contains(page) {
            return false;
        }
        if page == stack.guard_page().base() {
            log::info!(
                target: "pagefault",
                "thread {:?} on processor {} hit the guard page of stack {:?} at {fault}",
                thread.id(),
                ctx.processor_id(),
                stack.range()
            );
            return false;
        }

        let (space, table_flags, page_flags) = match thread.security() {
            SecurityLevel::Kernel => (
                self.kernel_space,
                PageTableEntry::KERNEL_TABLE,
                PageTableEntry::KERNEL_DATA,
            ),
            SecurityLevel::User => (
                thread.space(),
                PageTableEntry::USER_TABLE,
                PageTableEntry::USER_DATA,
            ),
        };
        let aspace = self.address_space(space);
        if aspace.is_mapped(page) {
            return false;
        }

        let Some(frame) = alloc_zeroed(self.frames, self.mapper) else {
            log::warn!(target: "pagefault", "no frame to grow stack {:?}", stack.range());
            return false;
        };
        match aspace.map_one(self.frames, page, frame, table_flags, page_flags) {
            Ok(()) => {
                log::trace!(target: "pagefault", "grew stack {:?} by {page}", stack.range());
                true
            }
            Err(e) => {
                self.frames.free_4k(frame);
                log::warn!(target: "pagefault", "growing stack at {page}: {e}");
                false
            }
        }
    }

    /// Page-fault entry: offers the faulting address to [`grow_on_fault`](Self::grow_on_fault).
    pub fn handle_page_fault<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        thread: &Thread,
    ) -> FaultResolution {
        let fault = ctx.processor().fault_address();
        if self.grow_on_fault(ctx, thread, fault) {
            FaultResolution::Resolved
        } else {
            log::info!(
                target: "pagefault",
                "page fault at {fault} in thread {:?} not handled by the stack manager",
                thread.id()
            );
            FaultResolution::Unhandled
        }
    }

    /// Give `thread` its interrupt stack (non-kernel threads) and its
    /// regular stack.
    ///
    /// Whatever was set up before a failure stays recorded in the thread and
    /// is released by [`destroy_stacks`](Self::destroy_stacks).
    ///
    /// # Errors
    /// Range or frame exhaustion, see [`create_stack`](Self::create_stack).
    pub fn initialize_stacks<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        process: &Process,
        thread: &Thread,
    ) -> Result<(), TaskingMemoryError> {
        let config = &self.config;

        if thread.security() != SecurityLevel::Kernel && thread.memory().interrupt_stack.is_none() {
            let stack = self.create_stack(
                self.kernel_space,
                &self.kernel_ranges,
                PageTableEntry::KERNEL_TABLE,
                PageTableEntry::KERNEL_DATA,
                config.interrupt_stack_pages,
            )?;
            thread.memory().interrupt_stack = Some(stack);
        }

        if thread.memory().stack.is_some() {
            return Ok(());
        }

        let stack = match (thread.kind(), thread.security()) {
            (ThreadKind::Restricted, _) => {
                let range = self.low_memory.lock().allocate(config.restricted_stack_pages)?;
                Stack::new(range, StackOrigin::LowMemory)
            }
            (ThreadKind::Normal, SecurityLevel::Kernel) => self.create_stack(
                self.kernel_space,
                &self.kernel_ranges,
                PageTableEntry::KERNEL_TABLE,
                PageTableEntry::KERNEL_DATA,
                config.kernel_stack_pages,
            )?,
            (ThreadKind::Normal, SecurityLevel::User) => {
                with_address_space(ctx, process.space(), || {
                    self.create_stack(
                        process.space(),
                        &process.ranges,
                        PageTableEntry::USER_TABLE,
                        PageTableEntry::USER_DATA,
                        config.user_stack_pages,
                    )
                })?
            }
        };
        thread.memory().stack = Some(stack);
        Ok(())
    }

    /// Release both stacks of `thread`.
    pub fn destroy_stacks<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        process: &Process,
        thread: &Thread,
    ) {
        let (stack, interrupt_stack) = {
            let mut memory = thread.memory();
            (memory.stack.take(), memory.interrupt_stack.take())
        };

        if let Some(stack) = stack {
            match (stack.origin(), thread.security()) {
                (StackOrigin::LowMemory, _) => Self::release_range(&self.low_memory, stack.start()),
                (StackOrigin::Lazy, SecurityLevel::Kernel) => {
                    self.destroy_stack(ctx, self.kernel_space, &self.kernel_ranges, stack);
                }
                (StackOrigin::Lazy, SecurityLevel::User) => {
                    with_address_space(ctx, process.space(), || {
                        self.destroy_stack(ctx, process.space(), &process.ranges, stack);
                    });
                }
            }
        }

        if let Some(stack) = interrupt_stack {
            self.destroy_stack(ctx, self.kernel_space, &self.kernel_ranges, stack);
        }
    }
}
