//! A fake `NativeEngine` (C1's minimal surface onto the underlying CPU
//! emulator, distinct from the `simunicorn_` glue in `native_emu_sys::fake`)
//! backed by plain maps instead of a real emulator engine.
//!
//! State lives behind an `Rc` kept by the test alongside the boxed trait
//! object handed to the handle pool, so a test can still inspect what the
//! accelerator did to the engine after the engine itself moved into an
//! `EmulatorHandle`.

use native_emu_sys::{EngineHandle, NativeEngine};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
pub struct FakeEngineState {
    pub memory: HashMap<u64, Vec<u8>>,
    pub mapped: Vec<(u64, u64, u8)>,
    pub unmapped: Vec<(u64, u64)>,
    pub registers: HashMap<usize, Vec<u8>>,
    pub reset_calls: u64,
}

pub struct FakeEngine(Rc<RefCell<FakeEngineState>>);

impl FakeEngine {
    /// Returns the boxed trait object to hand to the handle pool, plus a
    /// shared handle to its recorded state for assertions.
    pub fn new() -> (Self, Rc<RefCell<FakeEngineState>>) {
        let state = Rc::new(RefCell::new(FakeEngineState::default()));
        (Self(state.clone()), state)
    }
}

impl NativeEngine for FakeEngine {
    fn handle(&self) -> EngineHandle {
        EngineHandle(std::ptr::null_mut())
    }

    fn mem_map(&self, addr: u64, len: u64, perm: u8) {
        let mut s = self.0.borrow_mut();
        s.mapped.push((addr, len, perm));
        s.memory.entry(addr).or_insert_with(|| vec![0u8; len as usize]);
    }

    fn mem_write(&self, addr: u64, bytes: &[u8]) {
        self.0.borrow_mut().memory.insert(addr, bytes.to_vec());
    }

    fn mem_unmap(&self, addr: u64, len: u64) {
        let mut s = self.0.borrow_mut();
        s.unmapped.push((addr, len));
        s.memory.remove(&addr);
    }

    fn reg_write(&self, offset: usize, bytes: &[u8]) {
        self.0.borrow_mut().registers.insert(offset, bytes.to_vec());
    }

    fn reg_read(&self, offset: usize, size: usize) -> Vec<u8> {
        self.0
            .borrow()
            .registers
            .get(&offset)
            .cloned()
            .unwrap_or_else(|| vec![0u8; size])
    }

    fn mem_read(&self, addr: u64, len: u64) -> Vec<u8> {
        self.0
            .borrow()
            .memory
            .get(&addr)
            .cloned()
            .unwrap_or_else(|| vec![0u8; len as usize])
    }

    fn reset(&self) {
        let mut s = self.0.borrow_mut();
        s.reset_calls += 1;
        s.memory.clear();
    }
}
