use crate::{Processor, Thread};

/// Who is executing: the processor and, once scheduling runs, the thread.
///
/// Passed explicitly to every operation that touches processor state or the
/// current thread's address-space override.
pub struct ExecutionContext<'a, P: Processor + ?Sized> {
    processor: &'a P,
    current: Option<&'a Thread>,
}

impl<'a, P: Processor + ?Sized> ExecutionContext<'a, P> {
    /// Context for code running on behalf of `current`.
    pub const fn new(processor: &'a P, current: Option<&'a Thread>) -> Self {
        Self { processor, current }
    }

    /// Context before the scheduler has a current thread (early boot).
    pub const fn boot(processor: &'a P) -> Self {
        Self::new(processor, None)
    }

    #[inline]
    pub const fn processor(&self) -> &'a P {
        self.processor
    }

    #[inline]
    pub const fn current(&self) -> Option<&'a Thread> {
        self.current
    }

    #[inline]
    pub fn processor_id(&self) -> u32 {
        self.processor.id()
    }
}
