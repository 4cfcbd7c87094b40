//! Simulated machine for the scenario tests: a few hundred frames of RAM,
//! the real bitmap allocator over them and a processor whose CR3, CR2 and
//! interrupt flag are plain cells.

#![allow(dead_code)]

use kernel_alloc::BitmapFrameAlloc;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualRange};
use kernel_sync::InterruptControl;
use kernel_tasking::{
    ExecutionContext, FpuState, PageSpace, Processor, TaskingConfig, TaskingMemory,
};
use kernel_vmem::{FrameAlloc, PageTableEntry, PhysMapper, alloc_zeroed};
use std::cell::{Cell, RefCell, UnsafeCell};

pub const RAM_FRAMES: u64 = 512;

pub type Frames = BitmapFrameAlloc<8>;
pub type Memory<'m> = TaskingMemory<'m, Ram, Frames>;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// Physical memory; physical address `n * 4096` is frame `n`.
pub struct Ram {
    frames: Box<[UnsafeCell<Frame>]>,
}

impl Ram {
    pub fn new(frames: u64) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| UnsafeCell::new(Frame([0; 4096])))
                .collect(),
        }
    }
}

// SAFETY: frames are handed out by the locked allocator; concurrent tests only touch
// page tables under the owning process's heap lock.
unsafe impl Sync for Ram {}

impl PhysMapper for Ram {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let index = usize::try_from(pa.as_u64() / 4096).unwrap();
        let offset = usize::try_from(pa.as_u64() % 4096).unwrap();
        let base = self.frames[index].get().cast::<u8>();
        unsafe { &mut *base.add(offset).cast::<T>() }
    }
}

pub struct MockCpu {
    cr3: Cell<u64>,
    cr2: Cell<u64>,
    interrupts: Cell<bool>,
    sse: bool,
    fpu: FpuState,
    pub loads: Cell<usize>,
    pub invalidated: RefCell<Vec<VirtualAddress>>,
}

impl MockCpu {
    pub fn new(space: PageSpace, sse: bool) -> Self {
        let mut fpu = FpuState::ZERO;
        fpu.0[0..2].copy_from_slice(&0x037Fu16.to_le_bytes());
        fpu.0[24..28].copy_from_slice(&0x1F80u32.to_le_bytes());
        Self {
            cr3: Cell::new(space.as_u64()),
            cr2: Cell::new(0),
            interrupts: Cell::new(true),
            sse,
            fpu,
            loads: Cell::new(0),
            invalidated: RefCell::new(Vec::new()),
        }
    }

    pub fn raise_fault(&self, va: u64) {
        self.cr2.set(va);
    }
}

impl InterruptControl for MockCpu {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn disable_interrupts(&self) {
        self.interrupts.set(false);
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }
}

impl Processor for MockCpu {
    fn id(&self) -> u32 {
        3
    }

    fn active_space(&self) -> PageSpace {
        PageSpace::from_raw(self.cr3.get()).expect("CR3 holds a space")
    }

    unsafe fn load_space(&self, space: PageSpace) {
        self.cr3.set(space.as_u64());
        self.loads.set(self.loads.get() + 1);
    }

    fn fault_address(&self) -> VirtualAddress {
        VirtualAddress::new(self.cr2.get())
    }

    fn invalidate_page(&self, va: VirtualAddress) {
        self.invalidated.borrow_mut().push(va);
    }

    fn sse_supported(&self) -> bool {
        self.sse
    }

    fn initial_fpu_state(&self) -> &FpuState {
        &self.fpu
    }
}

pub struct Machine {
    pub ram: Ram,
    pub frames: Frames,
    pub cpu: MockCpu,
    pub kernel: PageSpace,
}

impl Machine {
    pub fn new() -> Self {
        Self::build(true)
    }

    pub fn without_sse() -> Self {
        Self::build(false)
    }

    fn build(sse: bool) -> Self {
        let ram = Ram::new(RAM_FRAMES);
        // Frame 0 stays unused so no space ever has root 0.
        let frames = Frames::new(PhysicalPage::from_number(1), RAM_FRAMES - 1);
        let root = alloc_zeroed(&frames, &ram).unwrap();
        let kernel = PageSpace::from_root(root);
        Self {
            ram,
            frames,
            cpu: MockCpu::new(kernel, sse),
            kernel,
        }
    }

    pub fn memory(&self) -> Memory<'_> {
        self.memory_with(config())
    }

    pub fn memory_with(&self, config: TaskingConfig) -> Memory<'_> {
        TaskingMemory::new(&self.ram, &self.frames, self.kernel, config).unwrap()
    }

    pub fn ctx(&self) -> ExecutionContext<'_, MockCpu> {
        ExecutionContext::boot(&self.cpu)
    }

    pub fn free_frames(&self) -> u64 {
        self.frames.free_count()
    }

    /// Take every remaining frame; hand them back with [`Self::release`].
    pub fn hog(&self) -> Vec<PhysicalPage<Size4K>> {
        std::iter::from_fn(|| self.frames.alloc_4k()).collect()
    }

    pub fn release(&self, frames: impl IntoIterator<Item = PhysicalPage<Size4K>>) {
        for f in frames {
            self.frames.free_4k(f);
        }
    }

    /// Map fresh user pages over `[va, va + bytes.len())` of `space` and
    /// fill them with `bytes`.
    pub fn load_user(&self, mem: &Memory<'_>, space: PageSpace, va: u64, bytes: &[u8]) {
        let range = VirtualRange::new(
            VirtualAddress::new(va).align_down::<Size4K>(),
            VirtualAddress::new(va + bytes.len() as u64)
                .align_up::<Size4K>(),
        );
        let aspace = mem.address_space(space);
        for page in range.pages() {
            let frame = alloc_zeroed(&self.frames, &self.ram).unwrap();
            aspace
                .map_one(
                    &self.frames,
                    page.base(),
                    frame,
                    PageTableEntry::USER_TABLE,
                    PageTableEntry::USER_DATA,
                )
                .unwrap();
        }
        for (i, b) in bytes.iter().enumerate() {
            *self.byte(mem, space, va + i as u64) = *b;
        }
    }

    pub fn read_user(&self, mem: &Memory<'_>, space: PageSpace, va: u64, len: usize) -> Vec<u8> {
        (0..len as u64).map(|i| *self.byte(mem, space, va + i)).collect()
    }

    fn byte(&self, mem: &Memory<'_>, space: PageSpace, va: u64) -> &mut u8 {
        let pa = mem
            .address_space(space)
            .query(VirtualAddress::new(va))
            .unwrap_or_else(|| panic!("{va:#x} not mapped in {space}"));
        unsafe { self.ram.phys_to_mut(pa) }
    }
}

/// Small windows so addresses in assertions stay readable.
pub fn config() -> TaskingConfig {
    TaskingConfig {
        kernel_stack_pages: 4,
        user_stack_pages: 4,
        interrupt_stack_pages: 2,
        heap_limit: VirtualAddress::new(0x0080_0000),
        user_ranges: VirtualRange::from_pages(VirtualAddress::new(0x0070_0000), 64),
        ..TaskingConfig::DEFAULT
    }
}

pub fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}
