//! # Memory Layout

/// Size of the base page / frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Number of entries in every x86-64 paging structure.
pub const ENTRIES_PER_TABLE: usize = 512;

/// First PML4 index belonging to the kernel-shared half.
///
/// Indices `0..KERNEL_HALF_FIRST_ENTRY` are private to a process and torn down
/// with it; indices above are shared with the kernel and never freed per process.
pub const KERNEL_HALF_FIRST_ENTRY: usize = 256;

/// End of userspace VA range (exclusive).
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

/// Start of the canonical higher half.
pub const KERNEL_SPACE_START: u64 = 0xffff_8000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Base of the kernel's shared virtual range pool (kernel and interrupt stacks).
pub const KERNEL_RANGE_POOL_BASE: u64 = 0xffff_ff00_0000_0000;

/// Size of the kernel's shared virtual range pool.
pub const KERNEL_RANGE_POOL_SIZE: u64 = 0x40_0000_0000; // 256 GiB

/// Base of a process's private virtual range pool (user stacks and TLS).
pub const USER_RANGE_POOL_BASE: u64 = 0x0000_6000_0000_0000;

/// Size of a process's private virtual range pool.
pub const USER_RANGE_POOL_SIZE: u64 = 0x1000_0000_0000; // 16 TiB

/// Start of the identity-mapped low-memory window that backs restricted-mode
/// thread stacks. Always mapped and backed; never handed to the frame allocator.
pub const LOW_MEMORY_POOL_BASE: u64 = 0x0001_0000;

/// End (exclusive) of the low-memory window.
pub const LOW_MEMORY_POOL_END: u64 = 0x0008_0000;

/// Highest break a process heap may reach.
pub const USER_MAXIMUM_HEAP_BREAK: u64 = USER_RANGE_POOL_BASE;

/// Pages reserved for a kernel thread's stack, including the guard page.
pub const KERNEL_STACK_PAGES: u64 = 16;

/// Pages reserved for a user thread's stack, including the guard page.
pub const USER_STACK_PAGES: u64 = 64;

/// Pages reserved for the kernel interrupt-entry stack of non-kernel threads,
/// including the guard page.
pub const INTERRUPT_STACK_PAGES: u64 = 4;

/// Pages of identity-mapped low memory given to a restricted-mode thread as stack.
pub const RESTRICTED_STACK_PAGES: u64 = 1;

/// Size of the saved SSE/x87 state (`FXSAVE` area).
pub const FPU_STATE_SIZE: usize = 512;

/// Alignment required by `FXSAVE`/`FXRSTOR`.
pub const FPU_STATE_ALIGNMENT: usize = 16;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(KERNEL_HALF_FIRST_ENTRY == ENTRIES_PER_TABLE / 2);
    assert!(HHDM_BASE >= KERNEL_SPACE_START);
    assert!(KERNEL_RANGE_POOL_BASE >= KERNEL_SPACE_START);
    assert!(KERNEL_RANGE_POOL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_RANGE_POOL_BASE + USER_RANGE_POOL_SIZE <= USERSPACE_END);
    assert!(USER_MAXIMUM_HEAP_BREAK <= USER_RANGE_POOL_BASE);
    assert!(LOW_MEMORY_POOL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(LOW_MEMORY_POOL_END.is_multiple_of(PAGE_SIZE));
    assert!(LOW_MEMORY_POOL_BASE < LOW_MEMORY_POOL_END);
    // A lazily grown stack needs a guard page plus at least one mapped page.
    assert!(KERNEL_STACK_PAGES >= 2);
    assert!(USER_STACK_PAGES >= 2);
    assert!(INTERRUPT_STACK_PAGES >= 2);
    assert!(FPU_STATE_SIZE.is_multiple_of(FPU_STATE_ALIGNMENT));
};
