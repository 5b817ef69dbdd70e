//! C7: the episode lifecycle — `setup`, `start`, `finish`, `destroy`
//! (spec.md §4.7).

use crate::arch::ArchCapabilities;
use crate::constants::{FAKE_GDT_END, FAKE_GDT_START, SLOW_THROUGHPUT_BLOCKS_PER_SEC};
use crate::error::AcceleratorError;
use crate::handle::EmulatorHandlePool;
use crate::plugin::AcceleratorPlugin;
use crate::policy::{self, BlockerSide};
use crate::registers::{self, SavedSymbolicRegisters};
use native_emu_sys::{NativeEngine, StopReason, VexArch, VexArchInfo, VexCacheInfo};
use state_api::{Architecture, SymbolicState};
use std::time::Instant;

/// What an episode left behind once `finish` has reconciled it back into the
/// symbolic state (spec.md §4.7 "Trace data").
#[derive(Debug, Clone, Default)]
pub struct EpisodeOutcome {
    pub stop_reason: StopReason,
    pub steps: u64,
    pub bbl_addrs: Vec<u64>,
    pub stack_pointers: Vec<u64>,
    pub syscall_count: u64,
    pub executed_pages: Vec<u64>,
}

/// Acquires the thread-local handle for this episode, pushes registers, and
/// arms the stop-point list (spec.md §4.7 "Setup").
pub fn setup<S, F>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    stop_points: &[u64],
    make_engine: F,
) -> Result<(), AcceleratorError>
where
    S: SymbolicState,
    F: FnOnce() -> Box<dyn NativeEngine>,
{
    let architecture = state.architecture();
    let ip = eval_ip(state)?;

    EmulatorHandlePool::acquire(architecture, plugin.cache_key, &mut plugin.unicount, make_engine)?;

    if plugin.handle_transmit_syscall && state.has_cgc_plugin() && plugin.transmit_addr == 0 {
        tracing::warn!(
            "transmit handling enabled but no transmit address configured; \
             CGC transmit replay will not intercept anything"
        );
    }

    EmulatorHandlePool::with_current(|handle| -> Result<(), AcceleratorError> {
        if !handle.hooked {
            handle.native.hook();
            handle.hooked = true;
        }

        registers::push_registers(plugin, state, handle, ip)?;

        // "just fyi there's a GDT in memory" — tell the native side about the
        // fake descriptor-table region so it doesn't treat it as unmapped
        // (spec.md §4.7 "activate a fake GDT region at [0x1000, 0x2000)").
        handle
            .native
            .activate(FAKE_GDT_START, FAKE_GDT_END - FAKE_GDT_START, None);

        if plugin.handle_transmit_syscall && state.has_cgc_plugin() {
            handle
                .native
                .set_transmit_sysno(plugin.transmit_sysno, plugin.transmit_addr);
        }

        handle.native.set_stops(stop_points);
        handle.native.set_tracking(
            state.options().track_bbl_addrs,
            state.options().track_stack_pointers,
        );

        Ok(())
    })
    .ok_or(AcceleratorError::Internal(
        "no active emulator handle after acquire".into(),
    ))?
}

/// Arms symbolic-register tracking if needed, then hands control to the
/// native emulator (spec.md §4.7 "Start"). The returned
/// [`SavedSymbolicRegisters`], if any, must be passed back into
/// [`finish`] so the bytes egress overwrote with concrete values are
/// restored.
pub fn start<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    addr: u64,
) -> Result<Option<SavedSymbolicRegisters<S::Value>>, AcceleratorError> {
    let architecture = state.architecture();
    let arch = ArchCapabilities::for_architecture(architecture);
    let sym_regs_support = state.options().sym_regs_support;
    let max_steps = plugin.max_steps;

    EmulatorHandlePool::with_current(|handle| -> Result<Option<SavedSymbolicRegisters<S::Value>>, AcceleratorError> {
        for page in plugin.pending_uncache.drain(..) {
            handle.native.uncache_page(page);
        }

        let mut saved = None;
        if sym_regs_support {
            match registers::compute_symbolic_offsets(plugin, state, addr, arch)? {
                Some(offsets) => {
                    saved = Some(registers::save_symbolic_registers(state, &offsets));
                    handle
                        .native
                        .enable_symbolic_reg_tracking(vex_arch(architecture), vex_arch_info());
                    handle.native.symbolic_register_data(Some(&offsets));
                }
                None => handle.native.disable_symbolic_reg_tracking(),
            }
        }

        plugin.steps = 0;
        plugin.stop_reason = None;
        plugin.started_at = Some(Instant::now());
        handle.native.start(addr, max_steps)?;

        Ok(saved)
    })
    .ok_or(AcceleratorError::Internal(
        "no active emulator handle for start".into(),
    ))?
}

/// Reconciles the episode back into the symbolic state: pulls registers,
/// reports symbolic blockers to C6, replays memory mutations and CGC
/// transmits, updates cooldowns, and collects trace data (spec.md §4.7
/// "Finish").
pub fn finish<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    saved_symbolic: Option<SavedSymbolicRegisters<S::Value>>,
) -> Result<EpisodeOutcome, AcceleratorError> {
    let threshold_concretization = state.options().threshold_concretization;
    let track_bbl = state.options().track_bbl_addrs;
    let track_stack = state.options().track_stack_pointers;
    let replay_transmits = plugin.handle_transmit_syscall && state.has_cgc_plugin();
    let testing = plugin.testing;

    EmulatorHandlePool::with_current(|handle| -> Result<EpisodeOutcome, AcceleratorError> {
        let stop_reason = handle.native.stop_reason()?;
        let steps = handle.native.step();

        if stop_reason == StopReason::NoStart && steps > 0 {
            return Err(AcceleratorError::Internal(
                "native emulator reported NOSTART after taking steps".into(),
            ));
        }

        handle.native.disable_symbolic_reg_tracking();

        let syscall = stop_reason == StopReason::Syscall;
        registers::pull_registers(state, handle, syscall);

        if let Some(saved) = saved_symbolic {
            registers::restore_symbolic_registers(state, saved);
        }

        if matches!(stop_reason, StopReason::SymbolicReg | StopReason::SymbolicMem) {
            let ip = eval_ip(state)?;
            if stop_reason == StopReason::SymbolicReg {
                let offset = handle.native.stopping_register() as usize;
                let blocker = state.registers().load(offset, 1);
                policy::report_symbolic_blocker(
                    plugin,
                    threshold_concretization,
                    ip,
                    &blocker,
                    BlockerSide::Register,
                );
            } else {
                let addr = handle.native.stopping_memory();
                if let Some(object) = state.memory().load_objects(addr, 1, true)?.into_iter().next() {
                    policy::report_symbolic_blocker(
                        plugin,
                        threshold_concretization,
                        ip,
                        &object.value,
                        BlockerSide::Memory,
                    );
                }
            }
        }

        let mut mutations = handle.native.sync();
        while let Some((addr, len)) = mutations.next() {
            if addr >= FAKE_GDT_START && addr < FAKE_GDT_END {
                continue;
            }
            let bytes = handle.engine.mem_read(addr, len);
            state.memory_mut().store(addr, &bytes);
        }
        handle.native.destroy_mutations(mutations);

        if replay_transmits {
            let mut index = 0;
            while let Some(bytes) = handle.native.process_transmit(index) {
                state.stdout_write(bytes);
                index += 1;
            }
        }

        match stop_reason {
            StopReason::Normal | StopReason::Syscall => {
                plugin.countdowns.nonunicorn_blocks = 0;
            }
            StopReason::StopPoint => {
                plugin.countdowns.nonunicorn_blocks = 0;
                plugin.countdowns.stop_point = plugin.cooldown_settings.stop_point;
            }
            StopReason::SymbolicReg => {
                plugin.countdowns.symbolic_registers = plugin.cooldown_settings.symbolic_registers
            }
            StopReason::SymbolicMem => {
                plugin.countdowns.symbolic_memory = plugin.cooldown_settings.symbolic_memory
            }
            _ => {
                plugin.countdowns.nonunicorn_blocks = plugin.cooldown_settings.nonunicorn_blocks;
            }
        }

        if let Some(started_at) = plugin.started_at.take() {
            if !testing {
                let elapsed = started_at.elapsed().as_secs_f64();
                if elapsed > 0.0 && (steps as f64 / elapsed) < SLOW_THROUGHPUT_BLOCKS_PER_SEC {
                    plugin.countdowns.nonunicorn_blocks = plugin.cooldown_settings.nonunicorn_blocks;
                }
            }
        }

        plugin.steps = steps;
        plugin.stop_reason = Some(stop_reason);

        let bbl_addrs = if track_bbl {
            let count = handle.native.bbl_addr_count() as usize;
            handle.native.bbl_addrs(count).to_vec()
        } else {
            Vec::new()
        };
        let stack_pointers = if track_stack {
            handle.native.stack_pointers(steps as usize).to_vec()
        } else {
            Vec::new()
        };
        let syscall_count = handle.native.syscall_count();
        let executed_pages: Vec<u64> = handle.native.executed_pages().collect();

        Ok(EpisodeOutcome {
            stop_reason,
            steps,
            bbl_addrs,
            stack_pointers,
            syscall_count,
            executed_pages,
        })
    })
    .ok_or(AcceleratorError::Internal(
        "no active emulator handle for finish".into(),
    ))?
}

/// Tears the episode down: unhooks the native side unconditionally, then
/// discards the thread-local handle entirely unless the stop reason is one
/// the next episode can resume from (I4).
pub fn destroy<S: SymbolicState>(plugin: &AcceleratorPlugin<S>) {
    let discard = plugin
        .stop_reason
        .map(StopReason::requires_handle_discard)
        .unwrap_or(true);

    EmulatorHandlePool::with_current(|handle| {
        handle.native.unhook();
        handle.hooked = false;
    });

    if discard {
        EmulatorHandlePool::discard();
    }
}

fn eval_ip<S: SymbolicState>(state: &S) -> Result<u64, AcceleratorError> {
    state.solver().eval_u64(&state.ip()).map_err(AcceleratorError::from)
}

fn vex_arch(architecture: Architecture) -> VexArch {
    match architecture {
        Architecture::X86 => VexArch::X86,
        Architecture::Amd64 => VexArch::Amd64,
        Architecture::Mips32 => VexArch::Mips32,
    }
}

/// Cache info is always zeroed, mirroring the original's
/// `archinfo['hwcache_info']['caches'] = 0` workaround for a VEX decoder
/// quirk (spec.md §4.5).
fn vex_arch_info() -> VexArchInfo {
    VexArchInfo {
        hwcaps: 0,
        endness: 0,
        hwcache_info: VexCacheInfo::default(),
        ppc_icache_line_sz_b: 0,
        ppc_dcbz_sz_b: 0,
        ppc_dcbzl_sz_b: 0,
        arm64_dmin_line_lg2_sz_b: 0,
        arm64_imin_line_lg2_sz_b: 0,
        x86_cr0: 0,
    }
}
