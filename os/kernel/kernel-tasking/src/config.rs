//! Runtime tunables, defaulting to the `kernel-info` layout.

use kernel_info::memory::{
    INTERRUPT_STACK_PAGES, KERNEL_RANGE_POOL_BASE, KERNEL_RANGE_POOL_SIZE, KERNEL_STACK_PAGES,
    LOW_MEMORY_POOL_BASE, LOW_MEMORY_POOL_END, RESTRICTED_STACK_PAGES, USER_MAXIMUM_HEAP_BREAK,
    USER_RANGE_POOL_BASE, USER_RANGE_POOL_SIZE, USER_STACK_PAGES,
};
use kernel_memory_addresses::{VirtualAddress, VirtualRange};

use crate::TaskingMemoryError;
use crate::stack::MIN_STACK_PAGES;

/// Sizes and windows used by [`TaskingMemory`](crate::TaskingMemory).
///
/// Stack page counts include the guard page.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TaskingConfig {
    pub kernel_stack_pages: u64,
    pub user_stack_pages: u64,
    pub interrupt_stack_pages: u64,
    pub restricted_stack_pages: u64,
    /// Upper bound (inclusive) for a process's heap break.
    pub heap_limit: VirtualAddress,
    /// Shared kernel window for kernel-thread and interrupt stacks.
    pub kernel_ranges: VirtualRange,
    /// Per-process window for user stacks and TLS blocks.
    pub user_ranges: VirtualRange,
    /// Identity-mapped, pre-backed window for restricted-mode stacks.
    pub low_memory: VirtualRange,
}

impl TaskingConfig {
    pub const DEFAULT: Self = Self {
        kernel_stack_pages: KERNEL_STACK_PAGES,
        user_stack_pages: USER_STACK_PAGES,
        interrupt_stack_pages: INTERRUPT_STACK_PAGES,
        restricted_stack_pages: RESTRICTED_STACK_PAGES,
        heap_limit: VirtualAddress::new(USER_MAXIMUM_HEAP_BREAK),
        kernel_ranges: VirtualRange::new(
            VirtualAddress::new(KERNEL_RANGE_POOL_BASE),
            VirtualAddress::new(KERNEL_RANGE_POOL_BASE + KERNEL_RANGE_POOL_SIZE),
        ),
        user_ranges: VirtualRange::new(
            VirtualAddress::new(USER_RANGE_POOL_BASE),
            VirtualAddress::new(USER_RANGE_POOL_BASE + USER_RANGE_POOL_SIZE),
        ),
        low_memory: VirtualRange::new(
            VirtualAddress::new(LOW_MEMORY_POOL_BASE),
            VirtualAddress::new(LOW_MEMORY_POOL_END),
        ),
    };

    /// Check the lazily grown stack sizes.
    ///
    /// # Errors
    /// [`TaskingMemoryError::StackTooSmall`] for the first guard-page stack
    /// size below [`MIN_STACK_PAGES`].
    pub const fn validate(&self) -> Result<(), TaskingMemoryError> {
        let sizes = [
            self.kernel_stack_pages,
            self.user_stack_pages,
            self.interrupt_stack_pages,
        ];
        let mut i = 0;
        while i < sizes.len() {
            if sizes[i] < MIN_STACK_PAGES {
                return Err(TaskingMemoryError::StackTooSmall { pages: sizes[i] });
            }
            i += 1;
        }
        Ok(())
    }
}

impl Default for TaskingConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
