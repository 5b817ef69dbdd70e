//! Per-architecture behavior, collected into one capability table instead of
//! branching on `Architecture` throughout C4/C5 (spec.md §9 redesign
//! guidance: "replace per-architecture branching with a table of
//! architecture capability structs").

use state_api::Architecture;

/// Outcome of classifying a hooked interrupt vector (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Divide-by-zero: stop with `ZERO_DIV`.
    ZeroDiv,
    /// A syscall entry; `pc_adjust` is added to the interrupted PC to land
    /// on the post-instruction address (`syscall_pc`).
    Syscall { pc_adjust: u64 },
    /// No defined handling: log and stop with `ERROR`.
    Unhandled,
}

/// Per-architecture knobs consulted by C4 (register marshalling) and C5
/// (interrupt/syscall bridge).
#[derive(Debug, Clone, Copy)]
pub struct ArchCapabilities {
    pub architecture: Architecture,
    /// True only for i386: register ingress additionally synthesizes a GDT
    /// descriptor block (spec.md §4.5).
    pub synthesizes_gdt: bool,
    /// True only for AMD64: register ingress writes FS/GS bases via the MSR
    /// trampoline (spec.md §4.5).
    pub writes_msr_bases: bool,
    /// Condition-code byte range widened to "symbolic" wholesale when any
    /// byte inside is symbolic (spec.md §4.5); `None` on architectures with
    /// no such region (MIPS32).
    pub flags_region: Option<(usize, usize)>,
    /// True only for i386: syscalls first consult an in-accelerator hook
    /// table before falling back to a `SYSCALL` stop (spec.md §4.4).
    pub supports_quick_syscall_hook: bool,
}

impl ArchCapabilities {
    pub fn for_architecture(arch: Architecture) -> Self {
        match arch {
            Architecture::X86 => ArchCapabilities {
                architecture: arch,
                synthesizes_gdt: true,
                writes_msr_bases: false,
                flags_region: Some(crate::constants::X86_FLAGS_REGION),
                supports_quick_syscall_hook: true,
            },
            Architecture::Amd64 => ArchCapabilities {
                architecture: arch,
                synthesizes_gdt: false,
                writes_msr_bases: true,
                flags_region: Some(crate::constants::AMD64_FLAGS_REGION),
                supports_quick_syscall_hook: false,
            },
            Architecture::Mips32 => ArchCapabilities {
                architecture: arch,
                synthesizes_gdt: false,
                writes_msr_bases: false,
                flags_region: None,
                supports_quick_syscall_hook: false,
            },
        }
    }

    /// Classifies a hooked interrupt vector per spec.md §4.4. `is_amd64`
    /// distinguishes the x86 family's two syscall entry points (INT 0x80 on
    /// 32-bit vs. the SYSCALL instruction on 64-bit, which unicorn also
    /// surfaces through the interrupt hook).
    pub fn classify_interrupt(self, vector: u32) -> InterruptOutcome {
        match self.architecture {
            Architecture::X86 => match vector {
                0 => InterruptOutcome::ZeroDiv,
                0x80 => InterruptOutcome::Syscall { pc_adjust: 2 },
                _ => InterruptOutcome::Unhandled,
            },
            Architecture::Amd64 => match vector {
                0 => InterruptOutcome::ZeroDiv,
                _ => InterruptOutcome::Unhandled,
            },
            Architecture::Mips32 => match vector {
                // EXCP_SYSCALL
                17 => InterruptOutcome::Syscall { pc_adjust: 4 },
                _ => InterruptOutcome::Unhandled,
            },
        }
    }

    /// The SYSCALL instruction hook on AMD64 goes through a separate native
    /// hook (`UC_HOOK_INSN`/SYSCALL) rather than the interrupt vector table;
    /// it always adjusts the PC by 2, matching `_hook_syscall_x86_64`.
    pub fn syscall_insn_outcome(self) -> InterruptOutcome {
        InterruptOutcome::Syscall { pc_adjust: 2 }
    }

    /// General-purpose registers pushed/pulled by C4, excluding the
    /// blacklist (segment registers, MMX aliases, x87 state — those get
    /// dedicated handling).
    pub fn general_purpose_registers(self) -> &'static [&'static str] {
        match self.architecture {
            Architecture::X86 => &[
                "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip", "eflags",
            ],
            Architecture::Amd64 => &[
                "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "rip", "rflags", "r8",
                "r9", "r10", "r11", "r12", "r13", "r14", "r15",
            ],
            Architecture::Mips32 => &[
                "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4",
                "t5", "t6", "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9",
                "k0", "k1", "gp", "sp", "fp", "ra", "pc", "hi", "lo",
            ],
        }
    }
}

/// The eight x87 stack slots, their tag bits, and the control/status
/// registers converted as a unit by C4 (spec.md §4.5).
pub const X87_REGISTERS: &[&str] = &[
    "fpu_reg0", "fpu_reg1", "fpu_reg2", "fpu_reg3", "fpu_reg4", "fpu_reg5", "fpu_reg6", "fpu_reg7",
];
pub const X87_TAGS: &[&str] = &[
    "fpu_tag0", "fpu_tag1", "fpu_tag2", "fpu_tag3", "fpu_tag4", "fpu_tag5", "fpu_tag6", "fpu_tag7",
];
pub const X87_FC3210: &str = "fc3210";
pub const X87_FTOP: &str = "ftop";
pub const X87_FPROUND: &str = "fpround";
