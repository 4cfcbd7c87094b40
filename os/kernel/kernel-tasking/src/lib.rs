//! # Tasking Memory
//!
//! Memory side of processes and threads: address spaces, guard-page stacks
//! that grow on demand, the per-process heap, thread-local storage and the
//! per-thread FPU image.
//!
//! ```text
//!                     ┌──────────────────────────┐
//!   scheduler ──────► │      TaskingMemory       │ ◄────── page-fault handler
//!                     └──┬──────┬──────┬──────┬──┘
//!          address_space │ stack│  heap│   tls│
//!                     ┌──▼──────▼──────▼──────▼──┐
//!                     │   kernel-vmem (tables)   │
//!                     └──┬────────────────────┬──┘
//!                        │ FrameAlloc         │ PhysMapper
//! ```
//!
//! Processor state (CR3, CR2, interrupt flag, SSE) is reached through the
//! [`Processor`] trait and an explicit [`ExecutionContext`]; nothing in this
//! crate reads a global "current thread".
//!
//! ## Virtual layout
//!
//! - Kernel-thread and interrupt stacks live in [`TaskingConfig::kernel_ranges`]
//!   inside the kernel half. The PML4 entries covering that window are
//!   populated when [`TaskingMemory`] is created, before any process space is
//!   cloned, so all spaces share the stacks.
//! - User stacks and TLS blocks live in each process's own window
//!   ([`TaskingConfig::user_ranges`]).
//! - The heap starts at the page-aligned end of the process image.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address_space;
pub mod arena;
mod config;
mod context;
mod error;
mod fpu;
mod heap;
mod platform;
mod stack;
mod task;
mod tls;

pub use crate::address_space::{
    AddressSpaceSwitch, PageSpace, restore_switch, temporary_switch, with_address_space,
};
pub use crate::arena::{Arena, ProcessId, ThreadId};
pub use crate::config::TaskingConfig;
pub use crate::context::ExecutionContext;
pub use crate::error::{HeapError, TaskingMemoryError, TlsError};
pub use crate::fpu::{FpuState, destroy_fpu, initialize_fpu};
pub use crate::platform::Processor;
#[cfg(target_arch = "x86_64")]
pub use crate::platform::X86Processor;
pub use crate::stack::{FaultResolution, MIN_STACK_PAGES, Stack, StackOrigin};
pub use crate::task::{
    HeapState, KernelThreadLocal, Process, SecurityLevel, TaskTable, Thread, ThreadKind,
    ThreadMemory, TlsTemplate, UserThreadLocal,
};

use kernel_alloc::AddressRangePool;
use kernel_sync::SpinLock;
use kernel_vmem::{AddressSpace, FrameAlloc, Level, PageTableEntry, PhysMapper};

/// Entry point for all tasking-memory operations.
///
/// Owns the kernel-wide virtual range pools and borrows the physical
/// collaborators. One instance is shared by every processor.
pub struct TaskingMemory<'k, M: PhysMapper, F: FrameAlloc> {
    mapper: &'k M,
    frames: &'k F,
    kernel_space: PageSpace,
    kernel_ranges: SpinLock<AddressRangePool>,
    low_memory: SpinLock<AddressRangePool>,
    config: TaskingConfig,
}

impl<'k, M: PhysMapper, F: FrameAlloc> TaskingMemory<'k, M, F> {
    /// Set up the subsystem on top of the kernel's own address space.
    ///
    /// Populates the PML4 entries of `kernel_space` that cover
    /// `config.kernel_ranges`, so spaces created later share them.
    ///
    /// # Errors
    /// - [`TaskingMemoryError::StackTooSmall`] if `config` fails
    ///   [`TaskingConfig::validate`].
    /// - [`TaskingMemoryError::OutOfMemory`] if a PDPT cannot be allocated.
    pub fn new(
        mapper: &'k M,
        frames: &'k F,
        kernel_space: PageSpace,
        config: TaskingConfig,
    ) -> Result<Self, TaskingMemoryError> {
        config.validate()?;
        let window = config.kernel_ranges;
        if let Some(last) = window.last_page() {
            let kernel = AddressSpace::from_root(mapper, kernel_space.root());
            let first = Level::Pml4.index_of(window.start());
            let last = Level::Pml4.index_of(last.base());
            for index in first..=last {
                kernel.ensure_top_level(frames, index, PageTableEntry::KERNEL_TABLE)?;
            }
            log::debug!(
                target: "tasking",
                "kernel stack window {window:?} uses PML4 entries {first}..={last} of {kernel_space}"
            );
        }

        Ok(Self {
            mapper,
            frames,
            kernel_space,
            kernel_ranges: SpinLock::new(AddressRangePool::new(config.kernel_ranges)),
            low_memory: SpinLock::new(AddressRangePool::new(config.low_memory)),
            config,
        })
    }

    #[inline]
    pub const fn kernel_space(&self) -> PageSpace {
        self.kernel_space
    }

    #[inline]
    pub const fn config(&self) -> &TaskingConfig {
        &self.config
    }

    /// Page-table view of `space`, which need not be active.
    #[inline]
    pub const fn address_space(&self, space: PageSpace) -> AddressSpace<'k, M> {
        AddressSpace::from_root(self.mapper, space.root())
    }

    /// Live reservations in the kernel stack window.
    pub fn kernel_reservations(&self) -> usize {
        self.kernel_ranges.with_lock(|p| p.reserved_count())
    }

    /// Live reservations in the low-memory window.
    pub fn low_memory_reservations(&self) -> usize {
        self.low_memory.with_lock(|p| p.reserved_count())
    }

    /// Set up stacks, FPU image and TLS of a freshly registered thread.
    ///
    /// # Errors
    /// Unknown ids, and anything [`initialize_stacks`](Self::initialize_stacks)
    /// or [`initialize_tls`](Self::initialize_tls) reports. Partial state is
    /// released by [`destroy_thread`](Self::destroy_thread).
    pub fn initialize_thread<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        table: &TaskTable,
        thread: ThreadId,
    ) -> Result<(), TlsError> {
        let (process, thread) = lookup(table, thread)?;
        let main = process.main_thread().and_then(|id| table.thread(id));

        self.initialize_stacks(ctx, process, thread)?;
        initialize_fpu(ctx, thread, main);
        self.initialize_tls(ctx, process, thread)?;

        log::debug!(
            target: "tasking",
            "initialized memory of thread {:?} in process {:?}",
            thread.id(),
            process.id()
        );
        Ok(())
    }

    /// Release everything [`initialize_thread`](Self::initialize_thread) set up.
    ///
    /// # Errors
    /// Unknown ids.
    pub fn destroy_thread<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        table: &TaskTable,
        thread: ThreadId,
    ) -> Result<(), TaskingMemoryError> {
        let (process, thread) = lookup(table, thread)?;

        self.destroy_stacks(ctx, process, thread);
        destroy_fpu(thread);
        self.destroy_tls(ctx, process, thread);

        log::debug!(
            target: "tasking",
            "destroyed memory of thread {:?} in process {:?}",
            thread.id(),
            process.id()
        );
        Ok(())
    }
}

fn lookup(table: &TaskTable, id: ThreadId) -> Result<(&Process, &Thread), TaskingMemoryError> {
    let thread = table
        .thread(id)
        .ok_or(TaskingMemoryError::NoSuchThread(id))?;
    let process = table
        .process(thread.process())
        .ok_or(TaskingMemoryError::NoSuchProcess(thread.process()))?;
    Ok((process, thread))
}
