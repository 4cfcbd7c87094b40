/// Masking of maskable hardware interrupts on the executing processor.
///
/// On `x86_64` this is `pushfq` (IF, bit 9 of RFLAGS), `cli` and `sti`;
/// host tests provide a flag-backed mock.
///
/// # Privilege
///
/// Real implementations require ring 0.
pub trait InterruptControl {
    /// Whether interrupts are currently delivered.
    fn interrupts_enabled(&self) -> bool;

    /// `cli`
    fn disable_interrupts(&self);

    /// `sti`
    fn enable_interrupts(&self);
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt flag. If interrupts were enabled
/// it disables them. On drop it re-enables them **only** if they were
/// previously enabled, so guards nest.
///
/// ```
/// # use core::cell::Cell;
/// # use kernel_sync::{InterruptControl, IrqGuard};
/// # struct Flag(Cell<bool>);
/// # impl InterruptControl for Flag {
/// #     fn interrupts_enabled(&self) -> bool { self.0.get() }
/// #     fn disable_interrupts(&self) { self.0.set(false) }
/// #     fn enable_interrupts(&self) { self.0.set(true) }
/// # }
/// let cpu = Flag(Cell::new(true));
/// {
///     let _outer = IrqGuard::new(&cpu);
///     let _inner = IrqGuard::new(&cpu);
///     assert!(!cpu.interrupts_enabled());
/// }
/// assert!(cpu.interrupts_enabled());
/// ```
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqGuard<'a, C: InterruptControl + ?Sized> {
    control: &'a C,
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl<'a, C: InterruptControl + ?Sized> IrqGuard<'a, C> {
    #[inline]
    pub fn new(control: &'a C) -> Self {
        let were_enabled = control.interrupts_enabled();
        if were_enabled {
            control.disable_interrupts();
        }
        Self {
            control,
            were_enabled,
        }
    }

    /// Interrupt state that will be restored on drop.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl<C: InterruptControl + ?Sized> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.control.enable_interrupts();
        }
    }
}
