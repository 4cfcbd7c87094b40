//! # Address Space Manager
//!
//! Creation and teardown of process address spaces, and the temporary switch
//! that lets a thread operate inside another process's space.
//!
//! ## Temporary switch
//!
//! ```text
//!   temporary_switch(target)          restore / drop
//!   ─────────────────────────         ─────────────────────────
//!   IrqGuard::new      (cli)          override = 0
//!   override = target                 CR3 = previous
//!   previous = CR3                    IrqGuard::drop (sti if it was on)
//!   CR3 = target
//! ```
//!
//! Interrupts stay masked on the executing processor for the whole window,
//! so the thread cannot be preempted or migrated while it runs in a space
//! that is not its own. The override slot is still recorded so a scheduler
//! that does switch such a thread reloads the borrowed space.

use crate::{ExecutionContext, Processor, TaskingMemory, TaskingMemoryError, Thread};
use core::fmt;
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_sync::IrqGuard;
use kernel_vmem::teardown::{TeardownStats, release_private_half};
use kernel_vmem::{AddressSpace, FrameAlloc, PhysMapper, alloc_zeroed};

/// Handle of an address space: the physical frame of its PML4.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageSpace(PhysicalPage<Size4K>);

impl PageSpace {
    #[inline]
    #[must_use]
    pub const fn from_root(root: PhysicalPage<Size4K>) -> Self {
        Self(root)
    }

    #[inline]
    #[must_use]
    pub const fn root(self) -> PhysicalPage<Size4K> {
        self.0
    }

    /// Physical address of the PML4. Never 0 for a real space.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.base().as_u64()
    }

    /// Inverse of [`as_u64`](Self::as_u64); 0 means "no space".
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(PhysicalPage::containing_address(
                kernel_memory_addresses::PhysicalAddress::new(raw),
            )))
        }
    }
}

impl fmt::Debug for PageSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageSpace({:#x})", self.as_u64())
    }
}

impl fmt::Display for PageSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.as_u64())
    }
}

/// An open temporary switch. Restores the previous space when dropped.
#[must_use = "dropping the switch restores the previous address space immediately"]
pub struct AddressSpaceSwitch<'a, P: Processor + ?Sized> {
    processor: &'a P,
    thread: Option<&'a Thread>,
    previous: PageSpace,
    _irq: IrqGuard<'a, P>,
}

impl<P: Processor + ?Sized> AddressSpaceSwitch<'_, P> {
    /// The space that was active before the switch.
    #[inline]
    pub const fn previous(&self) -> PageSpace {
        self.previous
    }

    /// End the window explicitly.
    #[inline]
    pub fn restore(self) {
        drop(self);
    }
}

impl<P: Processor + ?Sized> Drop for AddressSpaceSwitch<'_, P> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread {
            thread.clear_override();
        }
        // Safety: `previous` was active right before the switch.
        unsafe { self.processor.load_space(self.previous) };
        // `_irq` drops after this body and re-enables interrupts if needed.
    }
}

/// Switch the executing processor to `target` until the returned guard is
/// dropped or [`restore_switch`] is called.
///
/// ### Panics
/// If the current thread already has an override set. Temporary switches do
/// not nest.
pub fn temporary_switch<'a, P: Processor + ?Sized>(
    ctx: &ExecutionContext<'a, P>,
    target: PageSpace,
) -> AddressSpaceSwitch<'a, P> {
    let processor = ctx.processor();
    let irq = IrqGuard::new(processor);

    let thread = ctx.current();
    if let Some(t) = thread
        && !t.try_set_override(target)
    {
        panic!("thread {:?} tried temporary address space switching twice", t.id());
    }

    let previous = processor.active_space();
    // Safety: every space shares the kernel half this code runs from.
    unsafe { processor.load_space(target) };

    AddressSpaceSwitch {
        processor,
        thread,
        previous,
        _irq: irq,
    }
}

/// Close a window opened by [`temporary_switch`].
#[inline]
pub fn restore_switch<P: Processor + ?Sized>(switch: AddressSpaceSwitch<'_, P>) {
    switch.restore();
}

/// Run `f` with `target` active, switching only if it is not already.
pub fn with_address_space<P: Processor + ?Sized, R>(
    ctx: &ExecutionContext<'_, P>,
    target: PageSpace,
    f: impl FnOnce() -> R,
) -> R {
    if ctx.processor().active_space() == target {
        return f();
    }
    let switch = temporary_switch(ctx, target);
    let result = f();
    switch.restore();
    result
}

impl<M: PhysMapper, F: FrameAlloc> TaskingMemory<'_, M, F> {
    /// New address space sharing the kernel half of the active one.
    ///
    /// Entries `0..256` of the new PML4 are empty.
    ///
    /// # Errors
    /// [`TaskingMemoryError::OutOfMemory`] if no frame is left for the PML4.
    pub fn create_address_space<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
    ) -> Result<PageSpace, TaskingMemoryError> {
        let root = alloc_zeroed(self.frames, self.mapper).ok_or(TaskingMemoryError::OutOfMemory)?;
        AddressSpace::from_root(self.mapper, root)
            .share_kernel_half(ctx.processor().active_space().root());
        let space = PageSpace::from_root(root);
        log::debug!(target: "tasking", "created address space {space}");
        Ok(space)
    }

    /// Free every private frame of `space`, its page tables and the PML4.
    ///
    /// Tables are walked through the physical mapper; the space is never
    /// loaded.
    ///
    /// # Errors
    /// [`TaskingMemoryError::AddressSpaceActive`] if `space` is loaded on the
    /// executing processor. Nothing is freed in that case.
    pub fn destroy_address_space<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        space: PageSpace,
    ) -> Result<TeardownStats, TaskingMemoryError> {
        if ctx.processor().active_space() == space {
            return Err(TaskingMemoryError::AddressSpaceActive(space));
        }

        // Safety: the space is not active here and the caller owns it.
        let mut stats = unsafe { release_private_half(self.mapper, self.frames, space.root()) };
        self.frames.free_4k(space.root());
        stats.table_frames += 1;

        log::debug!(
            target: "tasking",
            "destroyed address space {space}: {} data frames, {} table frames",
            stats.data_frames,
            stats.table_frames
        );
        Ok(stats)
    }
}
