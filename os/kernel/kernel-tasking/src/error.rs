use crate::{PageSpace, ProcessId, ThreadId};
use kernel_alloc::RangePoolError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::MapError;

/// Failure of an address-space, stack or thread-lifecycle operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskingMemoryError {
    /// The frame allocator is exhausted.
    #[error("out of physical memory")]
    OutOfMemory,
    /// The space to destroy is loaded on the executing processor.
    #[error("address space {0} is active on this processor")]
    AddressSpaceActive(PageSpace),
    /// A virtual range pool has no gap of the requested size.
    #[error("no free virtual range of {pages} pages")]
    RangeExhausted { pages: u64 },
    /// A lazily grown stack needs a guard page plus its top page.
    #[error("a stack of {pages} pages leaves no room beside the guard page")]
    StackTooSmall { pages: u64 },
    /// A range handed back to a pool was not reserved there.
    #[error("{0} is not a reserved range")]
    UnknownRange(VirtualAddress),
    #[error(transparent)]
    Map(MapError),
    #[error("no process {0:?}")]
    NoSuchProcess(ProcessId),
    #[error("no thread {0:?}")]
    NoSuchThread(ThreadId),
}

impl From<MapError> for TaskingMemoryError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfMemory(_) => Self::OutOfMemory,
            other => Self::Map(other),
        }
    }
}

impl From<RangePoolError> for TaskingMemoryError {
    fn from(e: RangePoolError) -> Self {
        match e {
            RangePoolError::Exhausted(pages) => Self::RangeExhausted { pages },
            RangePoolError::UnknownRange(va) => Self::UnknownRange(va),
        }
    }
}

/// Failure of [`extend_heap`](crate::TaskingMemory::extend_heap). The heap is
/// left unchanged except as noted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The new break would lie below the heap start.
    #[error("heap break would move below the heap start")]
    BelowStart,
    /// The new break would exceed the configured heap limit.
    #[error("heap break would exceed {limit}")]
    LimitExceeded { limit: VirtualAddress },
    /// `brk + delta` does not fit the address width.
    #[error("heap break arithmetic overflowed")]
    Overflow,
    /// Frames ran out while growing. Pages mapped before the failure stay
    /// part of the heap; the break is unchanged.
    #[error("out of physical memory while growing the heap")]
    OutOfMemory,
    /// A heap page collided with an existing mapping.
    #[error(transparent)]
    Map(MapError),
}

impl From<MapError> for HeapError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfMemory(_) => Self::OutOfMemory,
            other => Self::Map(other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlsError {
    /// The self pointer would not fit inside the TLS block.
    #[error("thread pointer offset {offset:#x} does not fit a {size}-byte TLS block")]
    ThreadPointerOutOfBounds { offset: u64, size: u64 },
    #[error(transparent)]
    Tasking(#[from] TaskingMemoryError),
}

impl From<MapError> for TlsError {
    fn from(e: MapError) -> Self {
        Self::Tasking(e.into())
    }
}

impl From<RangePoolError> for TlsError {
    fn from(e: RangePoolError) -> Self {
        Self::Tasking(e.into())
    }
}
