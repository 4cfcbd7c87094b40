use kernel_sync::{InterruptControl, IrqGuard};
use std::cell::Cell;

#[derive(Default)]
struct MockCpu {
    enabled: Cell<bool>,
    cli_count: Cell<usize>,
    sti_count: Cell<usize>,
}

impl InterruptControl for MockCpu {
    fn interrupts_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn disable_interrupts(&self) {
        self.cli_count.set(self.cli_count.get() + 1);
        self.enabled.set(false);
    }

    fn enable_interrupts(&self) {
        self.sti_count.set(self.sti_count.get() + 1);
        self.enabled.set(true);
    }
}

#[test]
fn disables_and_restores() {
    let cpu = MockCpu::default();
    cpu.enabled.set(true);
    {
        let g = IrqGuard::new(&cpu);
        assert!(g.were_enabled());
        assert!(!cpu.interrupts_enabled());
    }
    assert!(cpu.interrupts_enabled());
    assert_eq!(cpu.cli_count.get(), 1);
    assert_eq!(cpu.sti_count.get(), 1);
}

#[test]
fn leaves_disabled_state_alone() {
    let cpu = MockCpu::default();
    {
        let g = IrqGuard::new(&cpu);
        assert!(!g.were_enabled());
    }
    assert!(!cpu.interrupts_enabled());
    assert_eq!(cpu.cli_count.get(), 0);
    assert_eq!(cpu.sti_count.get(), 0);
}

#[test]
fn nested_guards_only_outer_restores() {
    let cpu = MockCpu::default();
    cpu.enabled.set(true);
    let outer = IrqGuard::new(&cpu);
    {
        let _inner = IrqGuard::new(&cpu);
    }
    assert!(!cpu.interrupts_enabled());
    drop(outer);
    assert!(cpu.interrupts_enabled());
}

#[test]
fn works_through_trait_objects() {
    let cpu = MockCpu::default();
    cpu.enabled.set(true);
    let dynamic: &dyn InterruptControl = &cpu;
    {
        let _g = IrqGuard::new(dynamic);
        assert!(!dynamic.interrupts_enabled());
    }
    assert!(dynamic.interrupts_enabled());
}
