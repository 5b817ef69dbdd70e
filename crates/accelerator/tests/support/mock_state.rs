//! A hand-rolled `state-api` implementation over plain `Vec<u8>`/`HashMap`
//! storage, used only by the integration tests in this crate. Symbolic
//! values here are either fully concrete or tagged with an explicit free
//! variable set and a fixed model value — enough to drive the classifier,
//! the policy, and the episode lifecycle without a real constraint solver.

use accelerator::arch::{
    ArchCapabilities, X87_FC3210, X87_FPROUND, X87_FTOP, X87_REGISTERS, X87_TAGS,
};
use state_api::{
    Architecture, MemoryObject, OptionSet, PagePermission, PagedMemory, Permission, RegisterFile,
    Solver, StateError, SymbolicState, SymbolicValue, ValueId, VarId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockValue {
    Concrete(Vec<u8>),
    Symbolic {
        vars: std::collections::BTreeSet<VarId>,
        len: usize,
        annotated: bool,
    },
}

impl MockValue {
    pub fn concrete(bytes: impl Into<Vec<u8>>) -> Self {
        MockValue::Concrete(bytes.into())
    }

    pub fn symbolic(var: &str, len: usize) -> Self {
        let mut vars = std::collections::BTreeSet::new();
        vars.insert(VarId(var.to_string()));
        MockValue::Symbolic { vars, len, annotated: false }
    }

    pub fn annotated(var: &str, len: usize) -> Self {
        let mut vars = std::collections::BTreeSet::new();
        vars.insert(VarId(var.to_string()));
        MockValue::Symbolic { vars, len, annotated: true }
    }
}

fn hash_of(bytes: impl Hash) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

impl SymbolicValue for MockValue {
    fn identity(&self) -> ValueId {
        match self {
            MockValue::Concrete(bytes) => ValueId(hash_of(bytes)),
            MockValue::Symbolic { vars, len, .. } => {
                let names: Vec<&str> = vars.iter().map(|v| v.0.as_str()).collect();
                ValueId(hash_of((names, *len)))
            }
        }
    }

    fn free_variables(&self) -> HashSet<VarId> {
        match self {
            MockValue::Concrete(_) => HashSet::new(),
            MockValue::Symbolic { vars, .. } => vars.iter().cloned().collect(),
        }
    }

    fn is_symbolic(&self) -> bool {
        matches!(self, MockValue::Symbolic { .. })
    }

    fn has_annotations(&self) -> bool {
        matches!(self, MockValue::Symbolic { annotated: true, .. })
    }

    fn byte_len(&self) -> usize {
        match self {
            MockValue::Concrete(bytes) => bytes.len(),
            MockValue::Symbolic { len, .. } => *len,
        }
    }

    fn concrete_bytes(&self) -> Option<Vec<u8>> {
        match self {
            MockValue::Concrete(bytes) => Some(bytes.clone()),
            MockValue::Symbolic { .. } => None,
        }
    }

    fn slice(&self, byte_offset: usize, byte_len: usize) -> Self {
        match self {
            MockValue::Concrete(bytes) => {
                MockValue::Concrete(bytes[byte_offset..byte_offset + byte_len].to_vec())
            }
            MockValue::Symbolic { vars, annotated, .. } => MockValue::Symbolic {
                vars: vars.clone(),
                len: byte_len,
                annotated: *annotated,
            },
        }
    }

    fn build_equality(&self, concrete: &Self) -> Self {
        concrete.clone()
    }

    fn annotate_aggressive_concretization(self, _at_ip: u64) -> Self {
        self
    }
}

/// Byte-addressable symbolic register file, with a flat concrete buffer and
/// a sparse overlay for register-sized values that are still symbolic.
pub struct MockRegisters {
    bytes: Vec<u8>,
    symbolic: HashMap<usize, MockValue>,
    names: HashMap<&'static str, (usize, usize)>,
}

impl MockRegisters {
    pub fn for_architecture(architecture: Architecture) -> Self {
        let arch = ArchCapabilities::for_architecture(architecture);
        let word = if architecture == Architecture::Amd64 { 8 } else { 4 };

        let mut names: HashMap<&'static str, (usize, usize)> = HashMap::new();
        let mut offset = 0usize;
        for &name in arch.general_purpose_registers() {
            names.insert(name, (offset, word));
            offset += word;
        }

        if let Some((lo, _hi)) = arch.flags_region {
            let flags_name = match architecture {
                Architecture::X86 => Some("eflags"),
                Architecture::Amd64 => Some("rflags"),
                Architecture::Mips32 => None,
            };
            if let Some(flags_name) = flags_name {
                if let Some(&(_, size)) = names.get(flags_name) {
                    names.insert(flags_name, (lo, size));
                    offset = offset.max(lo + size);
                }
            }
        }

        if architecture == Architecture::Amd64 {
            names.insert("fs_base", (offset, 8));
            offset += 8;
            names.insert("gs_base", (offset, 8));
            offset += 8;
        }

        if matches!(architecture, Architecture::X86 | Architecture::Amd64) {
            names.insert("ip_at_syscall", (offset, word));
            offset += word;
        }

        for &name in X87_REGISTERS {
            names.insert(name, (offset, 8));
            offset += 8;
        }
        for &name in X87_TAGS {
            names.insert(name, (offset, 1));
            offset += 1;
        }
        names.insert(X87_FC3210, (offset, 1));
        offset += 1;
        names.insert(X87_FTOP, (offset, 1));
        offset += 1;
        names.insert(X87_FPROUND, (offset, 1));
        offset += 1;

        Self { bytes: vec![0u8; offset], symbolic: HashMap::new(), names }
    }
}

impl RegisterFile for MockRegisters {
    type Value = MockValue;

    fn load(&self, offset: usize, size: usize) -> MockValue {
        if let Some(value) = self.symbolic.get(&offset) {
            return value.clone();
        }
        MockValue::Concrete(self.bytes[offset..offset + size].to_vec())
    }

    fn store(&mut self, offset: usize, size: usize, value: &MockValue) {
        if value.is_symbolic() {
            self.symbolic.insert(offset, value.clone());
        } else {
            self.symbolic.remove(&offset);
            let bytes = value.concrete_bytes().unwrap_or_else(|| vec![0u8; size]);
            self.bytes[offset..offset + size].copy_from_slice(&bytes[..size.min(bytes.len())]);
        }
    }

    fn store_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.symbolic.remove(&offset);
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn register_offset(&self, name: &str) -> Option<(usize, usize)> {
        self.names.get(name).copied()
    }

    fn highest_offset(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Default)]
pub struct MockMemory {
    objects: BTreeMap<u64, MockValue>,
    permissions: HashMap<u64, Permission>,
}

impl MockMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, addr: u64, value: MockValue) {
        self.objects.insert(addr, value);
    }

    pub fn set_permission(&mut self, page_addr: u64, perm: Permission) {
        self.permissions.insert(page_addr, perm);
    }
}

impl PagedMemory for MockMemory {
    type Value = MockValue;

    fn permission(&self, addr: u64) -> PagePermission {
        let page = addr & !0xFFF;
        match self.permissions.get(&page) {
            Some(perm) => PagePermission::Concrete(*perm),
            None => PagePermission::Missing,
        }
    }

    fn map_region(&mut self, start: u64, length: u64, perm: Permission) {
        let mut page = start & !0xFFF;
        let end = start + length;
        while page < end {
            self.permissions.entry(page).or_insert(perm);
            page += 0x1000;
        }
    }

    fn load_objects(
        &self,
        start: u64,
        length: u64,
        _best_effort: bool,
    ) -> Result<Vec<MemoryObject<MockValue>>, StateError> {
        let end = start + length;
        let mut out = Vec::new();
        for (&addr, value) in self.objects.range(..end) {
            let obj_end = addr + value.byte_len() as u64;
            if obj_end <= start {
                continue;
            }
            let clip_start = addr.max(start);
            let clip_end = obj_end.min(end);
            let offset = (clip_start - addr) as usize;
            let len = (clip_end - clip_start) as usize;
            out.push(MemoryObject { addr: clip_start, value: value.slice(offset, len) });
        }
        out.sort_by_key(|o| o.addr);
        Ok(out)
    }

    fn store(&mut self, addr: u64, bytes: &[u8]) {
        self.objects.insert(addr, MockValue::Concrete(bytes.to_vec()));
    }
}

/// Resolves a free variable to a fixed model value rather than running a
/// real constraint solver.
#[derive(Default)]
pub struct MockSolver {
    model: HashMap<VarId, Vec<u8>>,
}

impl MockSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_model(&mut self, var: &str, bytes: impl Into<Vec<u8>>) {
        self.model.insert(VarId(var.to_string()), bytes.into());
    }
}

impl Solver for MockSolver {
    type Value = MockValue;

    fn eval_u64(&self, v: &MockValue) -> Result<u64, StateError> {
        let bytes = self.eval_bytes(v, v.byte_len())?;
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(u64::from_le_bytes(buf))
    }

    fn eval_bytes(&self, v: &MockValue, len: usize) -> Result<Vec<u8>, StateError> {
        match v {
            MockValue::Concrete(bytes) => Ok(bytes.clone()),
            MockValue::Symbolic { vars, .. } => {
                let var = vars
                    .iter()
                    .next()
                    .ok_or_else(|| StateError::Solver("symbolic value with no free variables".into()))?;
                let mut model = self.model.get(var).cloned().unwrap_or_else(|| vec![0u8; len]);
                model.resize(len, 0);
                Ok(model)
            }
        }
    }

    fn eval_single_model(&self, v: &MockValue) -> MockValue {
        let len = v.byte_len();
        MockValue::Concrete(self.eval_bytes(v, len).unwrap_or_else(|_| vec![0u8; len]))
    }
}

pub struct MockState {
    architecture: Architecture,
    registers: MockRegisters,
    memory: MockMemory,
    solver: MockSolver,
    options: OptionSet,
    ip_offset: usize,
    ip_size: usize,
    stdout: Vec<u8>,
    has_cgc: bool,
}

impl MockState {
    pub fn new(architecture: Architecture) -> Self {
        let registers = MockRegisters::for_architecture(architecture);
        let ip_name = match architecture {
            Architecture::X86 => "eip",
            Architecture::Amd64 => "rip",
            Architecture::Mips32 => "pc",
        };
        let (ip_offset, ip_size) = registers.register_offset(ip_name).expect("ip register present");
        Self {
            architecture,
            registers,
            memory: MockMemory::new(),
            solver: MockSolver::new(),
            options: OptionSet::default(),
            ip_offset,
            ip_size,
            stdout: Vec::new(),
            has_cgc: false,
        }
    }

    pub fn set_ip(&mut self, addr: u64) {
        let ip_size = self.ip_size;
        let ip_offset = self.ip_offset;
        self.registers.store_bytes(ip_offset, &addr.to_le_bytes()[..ip_size]);
    }

    pub fn options_mut(&mut self) -> &mut OptionSet {
        &mut self.options
    }

    pub fn memory_raw_mut(&mut self) -> &mut MockMemory {
        &mut self.memory
    }

    pub fn solver_mut(&mut self) -> &mut MockSolver {
        &mut self.solver
    }

    pub fn set_cgc_plugin(&mut self, present: bool) {
        self.has_cgc = present;
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }
}

impl SymbolicState for MockState {
    type Value = MockValue;
    type Memory = MockMemory;
    type Registers = MockRegisters;
    type Solver = MockSolver;

    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn registers(&self) -> &MockRegisters {
        &self.registers
    }

    fn registers_mut(&mut self) -> &mut MockRegisters {
        &mut self.registers
    }

    fn memory(&self) -> &MockMemory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut MockMemory {
        &mut self.memory
    }

    fn solver(&self) -> &MockSolver {
        &self.solver
    }

    fn options(&self) -> &OptionSet {
        &self.options
    }

    fn ip(&self) -> MockValue {
        self.registers.load(self.ip_offset, self.ip_size)
    }

    fn add_constraint(&mut self, _constraint: MockValue) {}

    fn stdout_write(&mut self, bytes: &[u8]) {
        self.stdout.extend_from_slice(bytes);
    }

    fn has_cgc_plugin(&self) -> bool {
        self.has_cgc
    }
}
