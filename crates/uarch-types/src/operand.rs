//! Operand identity.
//!
//! Inputs and outputs of a uop template are dynamically typed: a register, a
//! flag group, a memory operand, or a non-architectural pseudo-operand used
//! only to wire uops of the same instruction together. `Operand` is the
//! tagged variant that represents all four; `RenameKey` is the narrower key
//! the renamer actually hashes on (see the data model's note that memory
//! operands are never looked up in the architectural rename map — they go
//! through the store buffer's fingerprint instead).

use std::sync::atomic::{AtomicU32, Ordering};

/// A symbolic memory address: base/index register names plus scale and
/// displacement. Never resolved to a real address — only used to decide
/// whether two accesses are "provably the same" for forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemAddr {
    pub base: Option<String>,
    pub index: Option<String>,
    pub scale: u8,
    pub displacement: i64,
}

/// A register operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegOperand {
    /// Register name as the instruction table spells it (e.g. `"EAX"`).
    pub reg: String,
    /// True for stack operands implicit in the encoding (e.g. the RSP
    /// adjustment of `PUSH`), which the stack engine must not treat as an
    /// explicit read when deciding whether to inject a sync uop.
    pub is_implicit_stack_operand: bool,
}

impl RegOperand {
    #[must_use]
    pub fn new(reg: impl Into<String>) -> Self {
        Self {
            reg: reg.into(),
            is_implicit_stack_operand: false,
        }
    }

    #[must_use]
    pub fn implicit_stack(reg: impl Into<String>) -> Self {
        Self {
            reg: reg.into(),
            is_implicit_stack_operand: true,
        }
    }
}

/// A flag-group operand (e.g. the `"C"` carry group or the combined
/// `"SPAZO"` group some instructions read/write as a unit).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlagOperand {
    pub flags: String,
}

/// A memory operand, carrying its symbolic address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemOperand {
    pub mem_addr: MemAddr,
}

/// A non-architectural operand used only to chain uops of the *same*
/// instruction together (e.g. the ALU-output -> flag-compute edge of a
/// shift-by-CL). Identity is by id, minted once per instruction template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PseudoOperand(pub u32);

static NEXT_PSEUDO_OP: AtomicU32 = AtomicU32::new(0);

impl PseudoOperand {
    /// Mints a fresh, globally unique pseudo-operand id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_PSEUDO_OP.fetch_add(1, Ordering::Relaxed))
    }
}

/// A dynamically-typed uop operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(RegOperand),
    Flag(FlagOperand),
    Mem(MemOperand),
    Pseudo(PseudoOperand),
}

impl Operand {
    #[must_use]
    pub fn reg(reg: impl Into<String>) -> Self {
        Self::Reg(RegOperand::new(reg))
    }

    #[must_use]
    pub fn as_reg(&self) -> Option<&RegOperand> {
        match self {
            Self::Reg(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_mem(&self) -> Option<&MemOperand> {
        match self {
            Self::Mem(m) => Some(m),
            _ => None,
        }
    }

    /// The key the renamer's architectural rename map hashes this operand
    /// under, or `None` for memory operands (which are never looked up by
    /// the architectural rename map — see `StoreBufferEntry`).
    #[must_use]
    pub fn rename_key(&self) -> Option<RenameKey> {
        match self {
            Self::Reg(r) => Some(RenameKey::Reg(canonical_reg(&r.reg).to_string())),
            Self::Flag(f) => Some(RenameKey::Flag(f.flags.clone())),
            Self::Pseudo(p) => Some(RenameKey::Pseudo(*p)),
            Self::Mem(_) => None,
        }
    }
}

/// The key type the renamer's architectural rename map is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RenameKey {
    Reg(String),
    Flag(String),
    Pseudo(PseudoOperand),
}

/// The 8-bit high-byte legacy registers (`AH`, `BH`, `CH`, `DH`). Writing
/// the low 32/64-bit form of their parent register leaves stale bits behind
/// that later reads of these must disambiguate (the "register merge" uop,
/// §4.4) and that LSD admission refuses to model (§4.2).
pub const HIGH8_REGS: [&str; 4] = ["AH", "BH", "CH", "DH"];

/// Maps any sub-register name to its canonical 64-bit name, e.g. `"EAX"` and
/// `"AL"` both map to `"RAX"`. Unrecognised names pass through unchanged —
/// the core only needs this for the fixed GPR set the stack engine, move
/// elimination, and register merges reason about.
#[must_use]
pub fn canonical_reg(reg: &str) -> &str {
    const GPRS: [[&str; 5]; 16] = [
        ["RAX", "EAX", "AX", "AL", "AH"],
        ["RBX", "EBX", "BX", "BL", "BH"],
        ["RCX", "ECX", "CX", "CL", "CH"],
        ["RDX", "EDX", "DX", "DL", "DH"],
        ["RSI", "ESI", "SI", "SIL", ""],
        ["RDI", "EDI", "DI", "DIL", ""],
        ["RSP", "ESP", "SP", "SPL", ""],
        ["RBP", "EBP", "BP", "BPL", ""],
        ["R8", "R8D", "R8W", "R8B", ""],
        ["R9", "R9D", "R9W", "R9B", ""],
        ["R10", "R10D", "R10W", "R10B", ""],
        ["R11", "R11D", "R11W", "R11B", ""],
        ["R12", "R12D", "R12W", "R12B", ""],
        ["R13", "R13D", "R13W", "R13B", ""],
        ["R14", "R14D", "R14W", "R14B", ""],
        ["R15", "R15D", "R15W", "R15B", ""],
    ];
    for family in &GPRS {
        if family[1..].contains(&reg) {
            return family[0];
        }
    }
    reg
}

/// The set of canonical general-purpose register names, used to decide
/// whether an eliminable move's input is a GPR (as opposed to a SIMD
/// register, which draws on a separate elimination quota).
pub const GPR_NAMES: [&str; 16] = [
    "RAX", "RBX", "RCX", "RDX", "RSI", "RDI", "RSP", "RBP", "R8", "R9", "R10", "R11", "R12",
    "R13", "R14", "R15",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_sub_registers() {
        assert_eq!(canonical_reg("EAX"), "RAX");
        assert_eq!(canonical_reg("AL"), "RAX");
        assert_eq!(canonical_reg("AH"), "RAX");
        assert_eq!(canonical_reg("R9D"), "R9");
        assert_eq!(canonical_reg("RSP"), "RSP");
    }

    #[test]
    fn pseudo_operands_are_distinct() {
        let a = PseudoOperand::fresh();
        let b = PseudoOperand::fresh();
        assert_ne!(a, b);
    }
}
