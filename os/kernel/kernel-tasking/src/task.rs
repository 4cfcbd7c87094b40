//! # Processes and Threads
//!
//! The memory-relevant part of the task model. Both types are shared between
//! processors by reference; everything that changes after construction sits
//! behind a [`SpinLock`] or an atomic.

use crate::arena::{Arena, ProcessId, ThreadId};
use crate::{FpuState, PageSpace, Stack};
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_alloc::AddressRangePool;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{VirtualAddress, VirtualRange};
use kernel_sync::{SpinLock, SpinLockGuard};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SecurityLevel {
    Kernel,
    User,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadKind {
    Normal,
    /// Runs in a restricted (virtual-8086 style) mode with a low-memory stack.
    Restricted,
}

/// Where a process's TLS master image lives in its own address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TlsTemplate {
    pub source: VirtualAddress,
    pub size: u64,
    /// Offset of the thread's self pointer inside the block.
    pub thread_pointer_offset: u64,
}

/// Heap bookkeeping, present once the heap was first touched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapState {
    pub start: VirtualAddress,
    pub brk: VirtualAddress,
    /// Mapped pages, contiguous from `start`.
    pub pages: u64,
}

impl HeapState {
    /// First address above the mapped heap.
    #[inline]
    #[must_use]
    pub const fn mapped_end(&self) -> VirtualAddress {
        VirtualAddress::new(self.start.as_u64() + self.pages * PAGE_SIZE)
    }
}

pub struct Process {
    id: ProcessId,
    space: PageSpace,
    image_end: VirtualAddress,
    tls: Option<TlsTemplate>,
    main_thread: Option<ThreadId>,
    pub(crate) heap: SpinLock<Option<HeapState>>,
    pub(crate) ranges: SpinLock<AddressRangePool>,
}

impl Process {
    pub const fn new(
        id: ProcessId,
        space: PageSpace,
        image_end: VirtualAddress,
        tls: Option<TlsTemplate>,
        ranges: VirtualRange,
    ) -> Self {
        Self {
            id,
            space,
            image_end,
            tls,
            main_thread: None,
            heap: SpinLock::new(None),
            ranges: SpinLock::new(AddressRangePool::new(ranges)),
        }
    }

    #[inline]
    pub const fn id(&self) -> ProcessId {
        self.id
    }

    #[inline]
    pub const fn space(&self) -> PageSpace {
        self.space
    }

    #[inline]
    pub const fn image_end(&self) -> VirtualAddress {
        self.image_end
    }

    #[inline]
    pub const fn tls_template(&self) -> Option<&TlsTemplate> {
        self.tls.as_ref()
    }

    #[inline]
    pub const fn main_thread(&self) -> Option<ThreadId> {
        self.main_thread
    }

    /// Snapshot of the heap state.
    pub fn heap(&self) -> Option<HeapState> {
        *self.heap.lock()
    }

    /// Number of live reservations in the process's private range pool.
    pub fn reserved_ranges(&self) -> usize {
        self.ranges.with_lock(|p| p.reserved_count())
    }
}

/// Kernel-side per-thread block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KernelThreadLocal {
    pub processor: u32,
}

/// The thread's user TLS block. Lives in the process's address space; the
/// thread only records where.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserThreadLocal {
    pub range: VirtualRange,
    /// Address of the self pointer, loaded into the thread-pointer register.
    pub thread_pointer: VirtualAddress,
}

/// Memory a thread owns, set up by thread initialization and released by
/// thread destruction.
#[derive(Debug, Default)]
pub struct ThreadMemory {
    pub stack: Option<Stack>,
    pub interrupt_stack: Option<Stack>,
    pub kernel_local: Option<Box<KernelThreadLocal>>,
    pub user_local: Option<UserThreadLocal>,
    pub fpu: Option<Box<FpuState>>,
}

pub struct Thread {
    id: ThreadId,
    process: ProcessId,
    /// Copy of the owning process's space; it never changes.
    space: PageSpace,
    security: SecurityLevel,
    kind: ThreadKind,
    /// Root of a temporarily borrowed space, 0 when none.
    override_space: AtomicU64,
    memory: SpinLock<ThreadMemory>,
}

impl Thread {
    #[must_use]
    pub const fn new(
        id: ThreadId,
        process: &Process,
        security: SecurityLevel,
        kind: ThreadKind,
    ) -> Self {
        Self {
            id,
            process: process.id,
            space: process.space,
            security,
            kind,
            override_space: AtomicU64::new(0),
            memory: SpinLock::new(ThreadMemory {
                stack: None,
                interrupt_stack: None,
                kernel_local: None,
                user_local: None,
                fpu: None,
            }),
        }
    }

    #[inline]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub const fn process(&self) -> ProcessId {
        self.process
    }

    #[inline]
    pub const fn space(&self) -> PageSpace {
        self.space
    }

    #[inline]
    pub const fn security(&self) -> SecurityLevel {
        self.security
    }

    #[inline]
    pub const fn kind(&self) -> ThreadKind {
        self.kind
    }

    #[inline]
    pub fn memory(&self) -> SpinLockGuard<'_, ThreadMemory> {
        self.memory.lock()
    }

    /// The space this thread borrowed with a temporary switch, if any.
    ///
    /// The scheduler must load this instead of [`space`](Self::space) when
    /// resuming the thread.
    pub fn override_space(&self) -> Option<PageSpace> {
        PageSpace::from_raw(self.override_space.load(Ordering::Acquire))
    }

    /// Record `space` as override. Returns `false` if one is already set.
    pub(crate) fn try_set_override(&self, space: PageSpace) -> bool {
        self.override_space
            .compare_exchange(0, space.as_u64(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn clear_override(&self) {
        self.override_space.store(0, Ordering::Release);
    }
}

/// Owner of all processes and threads.
#[derive(Default)]
pub struct TaskTable {
    pub processes: Arena<ProcessId, Process>,
    pub threads: Arena<ThreadId, Thread>,
}

impl TaskTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processes: Arena::new(),
            threads: Arena::new(),
        }
    }

    /// Register a process that owns `space`.
    pub fn add_process(
        &mut self,
        space: PageSpace,
        image_end: VirtualAddress,
        tls: Option<TlsTemplate>,
        ranges: VirtualRange,
    ) -> ProcessId {
        self.processes
            .insert_with(|id| Process::new(id, space, image_end, tls, ranges))
    }

    /// Register a thread of `process`; the first one becomes its main thread.
    pub fn add_thread(
        &mut self,
        process: ProcessId,
        security: SecurityLevel,
        kind: ThreadKind,
    ) -> Option<ThreadId> {
        let owner = self.processes.get(process)?;
        let tid = self
            .threads
            .insert_with(|id| Thread::new(id, owner, security, kind));
        let owner = self.processes.get_mut(process)?;
        owner.main_thread.get_or_insert(tid);
        Some(tid)
    }

    #[must_use]
    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id)
    }

    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id)
    }
}
