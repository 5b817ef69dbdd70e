//! Integration coverage for the parts of the pipeline that the
//! `native_emu_sys::fake` table lets us drive end to end without a real
//! native emulator shared object: C1 (handle acquisition), C3 (page
//! bridge), and C7 (episode setup/finish). Each test installs a fresh
//! per-thread [`native_emu_sys::fake::FakeState`] before exercising the
//! accelerator, since `EmulatorHandlePool`'s handle and the fake's scratch
//! state are both thread-local.

mod support;

use accelerator::controller;
use accelerator::handle::{install_native_library_for_tests, EmulatorHandlePool};
use accelerator::page_bridge::{handle_page_fault, AccessKind, PageFaultOutcome};
use accelerator::plugin::{AcceleratorConfig, CacheKey};
use native_emu_sys::{fake, StopReason};
use state_api::{Architecture, RegisterFile, SymbolicState, SymbolicValue};
use support::fake_engine::FakeEngine;
use support::mock_state::MockState;

fn install_fake_native() {
    install_native_library_for_tests(fake::fake_library());
}

fn acquire_handle(plugin: &mut accelerator::plugin::AcceleratorPlugin<MockState>, architecture: Architecture) {
    let (engine, _shared) = FakeEngine::new();
    EmulatorHandlePool::acquire(architecture, plugin.cache_key, &mut plugin.unicount, || {
        Box::new(engine)
    })
    .expect("acquire succeeds against the fake native library");
}

#[test]
fn zero_page_guard_stops_without_narrow_retry() {
    install_fake_native();
    fake::install(fake::FakeState::default());

    let mut state = MockState::new(Architecture::Amd64);
    state.options_mut().zeropage_guard = true;
    let mut plugin = AcceleratorConfig::new().build::<MockState>(CacheKey(101));
    acquire_handle(&mut plugin, Architecture::Amd64);

    let outcome = EmulatorHandlePool::with_current(|handle| {
        handle_page_fault(&mut plugin, &mut state, handle, 0x1000, AccessKind::Fetch, 0, 4)
    })
    .expect("handle present after acquire");

    assert_eq!(outcome, PageFaultOutcome::Stop(StopReason::ZeroPage));

    // A narrow retry would have installed the page at PAGE_SIZE alignment;
    // the guard must short-circuit before that ever happens.
    let mapped_anything = EmulatorHandlePool::with_current(|handle| !handle.mapped.is_empty())
        .expect("handle present");
    assert!(!mapped_anything);
}

#[test]
fn missing_page_is_bridged_in_on_first_access() {
    install_fake_native();
    fake::install(fake::FakeState::default());

    let mut state = MockState::new(Architecture::Amd64);
    let mut plugin = AcceleratorConfig::new().build::<MockState>(CacheKey(102));
    acquire_handle(&mut plugin, Architecture::Amd64);

    let outcome = EmulatorHandlePool::with_current(|handle| {
        handle_page_fault(&mut plugin, &mut state, handle, 0x1000, AccessKind::Read, 0x4000_1234, 4)
    })
    .expect("handle present after acquire");

    assert_eq!(outcome, PageFaultOutcome::Installed);

    let mapped_wide = EmulatorHandlePool::with_current(|handle| {
        handle.mapped.contains(&(0x4000_0000, 0x10000))
    })
    .expect("handle present");
    assert!(mapped_wide);

    let saw_activate = fake::with_state(|s| {
        s.activate_calls
            .iter()
            .any(|&(addr, len, _)| addr == 0x4000_0000 && len == 0x10000)
    });
    assert!(saw_activate, "expected native.activate over the newly bridged wide range");
}

#[test]
fn setup_activates_the_fake_gdt_region() {
    install_fake_native();
    fake::install(fake::FakeState::default());

    let mut state = MockState::new(Architecture::Amd64);
    state.set_ip(0x1000);
    let mut plugin = AcceleratorConfig::new().build::<MockState>(CacheKey(103));

    controller::setup(&mut plugin, &mut state, &[], || Box::new(FakeEngine::new().0))
        .expect("setup succeeds against the fake native library");

    let saw_gdt_activate = fake::with_state(|s| {
        s.activate_calls
            .iter()
            .any(|&(addr, len, ref taint)| addr == 0x1000 && len == 0x1000 && taint.is_none())
    });
    assert!(saw_gdt_activate, "setup must activate [0x1000, 0x2000) as the fake GDT region");
}

#[test]
fn finish_only_updates_the_countdown_for_the_actual_stop_reason() {
    install_fake_native();
    fake::install(fake::FakeState {
        stop_reason: StopReason::Normal as i32,
        steps: 5,
        ..Default::default()
    });

    let mut state = MockState::new(Architecture::Amd64);
    let mut plugin = AcceleratorConfig::new().with_testing(true).build::<MockState>(CacheKey(104));
    plugin.countdowns.symbolic_registers = 7;
    plugin.countdowns.symbolic_memory = 9;
    plugin.countdowns.stop_point = 3;
    acquire_handle(&mut plugin, Architecture::Amd64);

    let outcome = controller::finish(&mut plugin, &mut state, None).expect("finish succeeds");

    assert_eq!(outcome.stop_reason, StopReason::Normal);
    assert_eq!(plugin.countdowns.nonunicorn_blocks, 0);
    // A `Normal` stop must not touch unrelated countdowns — this is exactly
    // what a blanket per-finish decrement would have broken.
    assert_eq!(plugin.countdowns.symbolic_registers, 7);
    assert_eq!(plugin.countdowns.symbolic_memory, 9);
    assert_eq!(plugin.countdowns.stop_point, 3);
}

#[test]
fn syscall_stop_backs_up_ip_at_syscall_without_touching_the_real_ip() {
    install_fake_native();
    fake::install(fake::FakeState {
        stop_reason: StopReason::Syscall as i32,
        steps: 1,
        ..Default::default()
    });

    let mut state = MockState::new(Architecture::Amd64);
    let mut plugin = AcceleratorConfig::new().with_testing(true).build::<MockState>(CacheKey(105));
    acquire_handle(&mut plugin, Architecture::Amd64);

    // The fake engine's `reg_read` returns zeroed registers by default, so
    // the emulator-observed `rip` reads back as 0 for this episode.
    controller::finish(&mut plugin, &mut state, None).expect("finish succeeds");

    let (rip_offset, rip_size) = state.registers().register_offset("rip").expect("rip present");
    let rip_bytes = state.registers().load(rip_offset, rip_size).concrete_bytes().expect("rip concrete");
    assert_eq!(rip_bytes, vec![0u8; rip_size], "the real rip must be left at the emulator-observed value");

    let (syscall_offset, syscall_size) =
        state.registers().register_offset("ip_at_syscall").expect("ip_at_syscall present");
    let syscall_bytes = state
        .registers()
        .load(syscall_offset, syscall_size)
        .concrete_bytes()
        .expect("ip_at_syscall concrete");
    let mut buf = [0u8; 8];
    buf[..syscall_size].copy_from_slice(&syscall_bytes);
    assert_eq!(u64::from_le_bytes(buf), 0u64.wrapping_sub(2));
}
