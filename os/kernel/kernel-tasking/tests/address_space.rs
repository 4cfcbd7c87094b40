mod common;

use common::{Machine, config};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::InterruptControl;
use kernel_tasking::{
    ExecutionContext, Processor, SecurityLevel, TaskTable, TaskingMemoryError, ThreadKind,
    restore_switch, temporary_switch, with_address_space,
};
use kernel_vmem::PhysMapper;

#[test]
fn new_space_shares_kernel_half_only() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();

    let space = mem.create_address_space(&ctx).unwrap();
    assert_ne!(space, m.kernel);

    let kernel = unsafe { m.ram.table(m.kernel.root()) };
    let child = unsafe { m.ram.table(space.root()) };
    assert_eq!(child.used_indices(0..256).count(), 0);
    // The kernel stack window is populated up front.
    assert!(kernel.entry(510).unwrap().present());
    for i in 256..512 {
        assert_eq!(child.entry(i), kernel.entry(i), "PML4[{i}]");
    }
}

#[test]
fn destroy_returns_every_frame() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();
    let before = m.free_frames();

    let space = mem.create_address_space(&ctx).unwrap();
    m.load_user(&mem, space, 0x0040_0000, &[0xAA; 5000]);
    m.load_user(&mem, space, 0x7FFF_FFFF_0000, &[0x55; 16]);
    assert!(m.free_frames() < before);

    let stats = mem.destroy_address_space(&ctx, space).unwrap();
    assert_eq!(stats.data_frames, 3);
    // Root, plus PDPT/PD/PT for each of the two disjoint regions.
    assert_eq!(stats.table_frames, 7);
    assert_eq!(m.free_frames(), before);
}

#[test]
fn destroy_leaves_kernel_tables_alone() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();

    let space = mem.create_address_space(&ctx).unwrap();
    let stats = mem.destroy_address_space(&ctx, space).unwrap();
    assert_eq!(stats.data_frames, 0);
    assert_eq!(stats.table_frames, 1);

    let kernel = unsafe { m.ram.table(m.kernel.root()) };
    assert!(kernel.entry(510).unwrap().present());
}

#[test]
fn destroying_the_active_space_is_refused() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();
    let space = mem.create_address_space(&ctx).unwrap();
    let before = m.free_frames();

    let switch = temporary_switch(&ctx, space);
    assert_eq!(
        mem.destroy_address_space(&ctx, space),
        Err(TaskingMemoryError::AddressSpaceActive(space))
    );
    assert_eq!(m.free_frames(), before);
    switch.restore();

    assert!(mem.destroy_address_space(&ctx, space).is_ok());
}

#[test]
fn switch_then_restore_leaves_active_space_unchanged() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();
    let space = mem.create_address_space(&ctx).unwrap();

    let switch = temporary_switch(&ctx, space);
    assert_eq!(m.cpu.active_space(), space);
    assert_eq!(switch.previous(), m.kernel);
    assert!(!m.cpu.interrupts_enabled());

    restore_switch(switch);
    assert_eq!(m.cpu.active_space(), m.kernel);
    assert!(m.cpu.interrupts_enabled());
}

#[test]
fn dropping_the_switch_restores() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();
    let space = mem.create_address_space(&ctx).unwrap();

    {
        let _switch = temporary_switch(&ctx, space);
        assert_eq!(m.cpu.active_space(), space);
    }
    assert_eq!(m.cpu.active_space(), m.kernel);
    assert!(m.cpu.interrupts_enabled());
}

#[test]
fn switch_keeps_interrupts_off_if_they_were_off() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();
    let space = mem.create_address_space(&ctx).unwrap();

    m.cpu.disable_interrupts();
    temporary_switch(&ctx, space).restore();
    assert!(!m.cpu.interrupts_enabled());
}

#[test]
fn override_is_visible_while_switched() {
    let m = Machine::new();
    let mem = m.memory();
    let boot = m.ctx();
    let space = mem.create_address_space(&boot).unwrap();

    let mut table = TaskTable::new();
    let pid = table.add_process(m.kernel, VirtualAddress::zero(), None, config().user_ranges);
    let tid = table
        .add_thread(pid, SecurityLevel::Kernel, ThreadKind::Normal)
        .unwrap();
    let thread = table.thread(tid).unwrap();
    let ctx = ExecutionContext::new(&m.cpu, Some(thread));

    assert_eq!(thread.override_space(), None);
    let switch = temporary_switch(&ctx, space);
    assert_eq!(thread.override_space(), Some(space));
    drop(switch);
    assert_eq!(thread.override_space(), None);
}

#[test]
#[should_panic(expected = "twice")]
fn nested_switch_panics() {
    let m = Machine::new();
    let mem = m.memory();
    let boot = m.ctx();
    let a = mem.create_address_space(&boot).unwrap();
    let b = mem.create_address_space(&boot).unwrap();

    let mut table = TaskTable::new();
    let pid = table.add_process(m.kernel, VirtualAddress::zero(), None, config().user_ranges);
    let tid = table
        .add_thread(pid, SecurityLevel::Kernel, ThreadKind::Normal)
        .unwrap();
    let ctx = ExecutionContext::new(&m.cpu, table.thread(tid));

    let _first = temporary_switch(&ctx, a);
    let _second = temporary_switch(&ctx, b);
}

#[test]
fn with_address_space_only_switches_when_needed() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();
    let space = mem.create_address_space(&ctx).unwrap();

    let seen = with_address_space(&ctx, m.kernel, || m.cpu.active_space());
    assert_eq!(seen, m.kernel);
    assert_eq!(m.cpu.loads.get(), 0);

    let seen = with_address_space(&ctx, space, || m.cpu.active_space());
    assert_eq!(seen, space);
    assert_eq!(m.cpu.loads.get(), 2);
    assert_eq!(m.cpu.active_space(), m.kernel);
}

#[test]
fn out_of_frames_is_an_error() {
    let m = Machine::new();
    let mem = m.memory();
    let ctx = m.ctx();

    let hogged = m.hog();
    assert_eq!(
        mem.create_address_space(&ctx),
        Err(TaskingMemoryError::OutOfMemory)
    );
    m.release(hogged);
    assert!(mem.create_address_space(&ctx).is_ok());
}
