//! # Thread-Local Storage
//!
//! Every thread gets a kernel-side block. Threads of a process with a TLS
//! template also get a user block in the process's private window: a copy
//! of the template with a self pointer at the template's thread-pointer
//! offset.
//!
//! All writes into the user block go through the physical mapper after
//! translating the destination in the process's page tables.

use crate::task::{KernelThreadLocal, TlsTemplate, UserThreadLocal};
use crate::{
    ExecutionContext, Process, Processor, TaskingMemory, TaskingMemoryError, Thread, TlsError,
    with_address_space,
};
use alloc::boxed::Box;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{Size4K, VirtualAddress, VirtualRange};
use kernel_vmem::{AddressSpace, FrameAlloc, MapError, PageTableEntry, PhysMapper, alloc_zeroed};

/// Size of the self pointer stored in the user block.
const THREAD_POINTER_SIZE: u64 = 8;

impl<'k, M: PhysMapper, F: FrameAlloc> TaskingMemory<'k, M, F> {
    /// Set up the thread-local blocks of `thread`.
    ///
    /// Blocks that already exist are kept.
    ///
    /// # Errors
    /// - [`TlsError::ThreadPointerOutOfBounds`] if the template's self
    ///   pointer would not fit into the block.
    /// - [`TlsError::Tasking`] on range or frame exhaustion, or if the
    ///   template source is not mapped. Nothing of the user block is left
    ///   behind in that case.
    pub fn initialize_tls<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        process: &Process,
        thread: &Thread,
    ) -> Result<(), TlsError> {
        {
            let mut memory = thread.memory();
            if memory.kernel_local.is_none() {
                memory.kernel_local = Some(Box::new(KernelThreadLocal {
                    processor: ctx.processor_id(),
                }));
            }
            if memory.user_local.is_some() {
                return Ok(());
            }
        }

        let Some(template) = process.tls_template().copied().filter(|t| t.size > 0) else {
            return Ok(());
        };

        let pages = template.size.div_ceil(PAGE_SIZE).max(1);
        let block = pages * PAGE_SIZE;
        let fits = template
            .thread_pointer_offset
            .checked_add(THREAD_POINTER_SIZE)
            .is_some_and(|end| end <= block);
        if !fits {
            return Err(TlsError::ThreadPointerOutOfBounds {
                offset: template.thread_pointer_offset,
                size: block,
            });
        }

        let local = with_address_space(ctx, process.space(), || {
            self.populate_user_block(ctx, process, &template, pages)
        })?;
        log::debug!(
            target: "tls",
            "thread {:?}: user TLS {:?}, thread pointer {}",
            thread.id(),
            local.range,
            local.thread_pointer
        );
        thread.memory().user_local = Some(local);
        Ok(())
    }

    fn populate_user_block<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        process: &Process,
        template: &TlsTemplate,
        pages: u64,
    ) -> Result<UserThreadLocal, TaskingMemoryError> {
        let range = process.ranges.lock().allocate(pages)?;
        let aspace = self.address_space(process.space());

        let filled = self
            .back_range(&aspace, range)
            .and_then(|()| self.copy_within(&aspace, template.source, range.start(), template.size))
            .and_then(|()| {
                let thread_pointer = range.start() + template.thread_pointer_offset;
                self.write_bytes(&aspace, thread_pointer, &thread_pointer.as_u64().to_le_bytes())
                    .map(|()| thread_pointer)
            });

        match filled {
            Ok(thread_pointer) => Ok(UserThreadLocal {
                range,
                thread_pointer,
            }),
            Err(e) => {
                log::warn!(target: "tls", "setting up TLS block {range:?} failed: {e}");
                self.release_pages(ctx, process.space(), range);
                Self::release_range(&process.ranges, range.start());
                Err(e)
            }
        }
    }

    /// Map a zeroed frame at every page of `range`.
    fn back_range(
        &self,
        aspace: &AddressSpace<'k, M>,
        range: VirtualRange,
    ) -> Result<(), TaskingMemoryError> {
        for page in range.pages() {
            let frame =
                alloc_zeroed(self.frames, self.mapper).ok_or(TaskingMemoryError::OutOfMemory)?;
            aspace
                .map_one(
                    self.frames,
                    page.base(),
                    frame,
                    PageTableEntry::USER_TABLE,
                    PageTableEntry::USER_DATA,
                )
                .inspect_err(|_| self.frames.free_4k(frame))?;
        }
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`, both in `aspace`.
    #[allow(clippy::cast_possible_truncation)]
    fn copy_within(
        &self,
        aspace: &AddressSpace<'k, M>,
        mut src: VirtualAddress,
        mut dst: VirtualAddress,
        len: u64,
    ) -> Result<(), TaskingMemoryError> {
        let mut remaining = len;
        while remaining > 0 {
            let src_pa = aspace.query(src).ok_or(MapError::NotMapped)?;
            let dst_pa = aspace.query(dst).ok_or(MapError::NotMapped)?;
            let src_off = src_pa.offset::<Size4K>();
            let dst_off = dst_pa.offset::<Size4K>();
            let n = remaining
                .min(PAGE_SIZE - src_off)
                .min(PAGE_SIZE - dst_off);

            // Safety: destination frames are freshly allocated for this
            // block, so they never alias the source.
            let from = unsafe { self.mapper.frame_bytes(src_pa.page::<Size4K>()) };
            let to = unsafe { self.mapper.frame_bytes(dst_pa.page::<Size4K>()) };
            let (s, d, n) = (src_off as usize, dst_off as usize, n as usize);
            to[d..d + n].copy_from_slice(&from[s..s + n]);

            src += n as u64;
            dst += n as u64;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Store `bytes` at `va` in `aspace`, possibly across a page boundary.
    #[allow(clippy::cast_possible_truncation)]
    fn write_bytes(
        &self,
        aspace: &AddressSpace<'k, M>,
        mut va: VirtualAddress,
        mut bytes: &[u8],
    ) -> Result<(), TaskingMemoryError> {
        while !bytes.is_empty() {
            let pa = aspace.query(va).ok_or(MapError::NotMapped)?;
            let off = pa.offset::<Size4K>() as usize;
            let n = bytes.len().min(PAGE_SIZE as usize - off);

            // Safety: the frame belongs to the block being set up.
            let to = unsafe { self.mapper.frame_bytes(pa.page::<Size4K>()) };
            to[off..off + n].copy_from_slice(&bytes[..n]);

            va += n as u64;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Release both thread-local blocks of `thread`.
    pub fn destroy_tls<P: Processor + ?Sized>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        process: &Process,
        thread: &Thread,
    ) {
        let (user, _kernel) = {
            let mut memory = thread.memory();
            (memory.user_local.take(), memory.kernel_local.take())
        };

        if let Some(local) = user {
            with_address_space(ctx, process.space(), || {
                self.release_pages(ctx, process.space(), local.range);
            });
            Self::release_range(&process.ranges, local.range.start());
            log::debug!(target: "tls", "thread {:?}: released user TLS {:?}", thread.id(), local.range);
        }
    }
}
