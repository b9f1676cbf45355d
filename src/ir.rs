// ir.rs - Typed SSA intermediate representation
//
// Values are identified by block-local, monotonically increasing ids and
// defined exactly once. Signedness lives in the operation, not the type.

use std::fmt;

/// Block-local SSA value identifier.
pub type ValueId = u64;

/// Value types. Signedness is a property of the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
}

/// Binary operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    DivU,
    Rem,
    RemU,

    // Bitwise
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LtU,
    LeU,
    GtU,
    GeU,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::LtU
                | BinOp::LeU
                | BinOp::GtU
                | BinOp::GeU
        )
    }
}

/// Instruction payloads. Every variant except `Store` produces the value
/// named by the instruction's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Const { ty: Type, value: u64 },
    Binary { op: BinOp, ty: Type, lhs: ValueId, rhs: ValueId },
    Sext { to: Type, value: ValueId },
    Zext { to: Type, value: ValueId },
    Trunc { to: Type, value: ValueId },
    Load { ty: Type, addr: ValueId },
    Store { value: ValueId, addr: ValueId },
}

/// A single IR instruction, tagged with the value id it defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub id: ValueId,
    pub kind: InstKind,
}

/// Block terminators. Targets are guest PCs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Branch { target: u64 },
    CondBranch { cond: ValueId, if_true: u64, if_false: u64 },
    Ret { value: Option<ValueId> },
}

/// A basic block: instructions followed by exactly one terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

impl Block {
    /// Check the SSA invariant: every referenced value id is defined by an
    /// earlier instruction in this block.
    pub fn defs_precede_uses(&self) -> bool {
        let mut defined = std::collections::HashSet::new();
        for inst in &self.insts {
            let ok = match &inst.kind {
                InstKind::Const { .. } => true,
                InstKind::Binary { lhs, rhs, .. } => {
                    defined.contains(lhs) && defined.contains(rhs)
                }
                InstKind::Sext { value, .. }
                | InstKind::Zext { value, .. }
                | InstKind::Trunc { value, .. } => defined.contains(value),
                InstKind::Load { addr, .. } => defined.contains(addr),
                InstKind::Store { value, addr } => {
                    defined.contains(value) && defined.contains(addr)
                }
            };
            if !ok {
                return false;
            }
            defined.insert(inst.id);
        }
        match &self.terminator {
            Terminator::CondBranch { cond, .. } => defined.contains(cond),
            Terminator::Ret { value: Some(v) } => defined.contains(v),
            _ => true,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InstKind::Const { ty, value } => {
                write!(f, "v{} = const.{} {:#x}", self.id, ty, value)
            }
            InstKind::Binary { op, ty, lhs, rhs } => {
                write!(f, "v{} = {:?}.{} v{}, v{}", self.id, op, ty, lhs, rhs)
            }
            InstKind::Sext { to, value } => {
                write!(f, "v{} = sext.{} v{}", self.id, to, value)
            }
            InstKind::Zext { to, value } => {
                write!(f, "v{} = zext.{} v{}", self.id, to, value)
            }
            InstKind::Trunc { to, value } => {
                write!(f, "v{} = trunc.{} v{}", self.id, to, value)
            }
            InstKind::Load { ty, addr } => {
                write!(f, "v{} = load.{} [v{}]", self.id, ty, addr)
            }
            InstKind::Store { value, addr } => {
                write!(f, "store v{}, [v{}]", value, addr)
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Branch { target } => write!(f, "br {:#x}", target),
            Terminator::CondBranch {
                cond,
                if_true,
                if_false,
            } => write!(f, "condbr v{}, {:#x}, {:#x}", cond, if_true, if_false),
            Terminator::Ret { value: Some(v) } => write!(f, "ret v{}", v),
            Terminator::Ret { value: None } => write!(f, "ret"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            writeln!(f, "  {}", inst)?;
        }
        writeln!(f, "  {}", self.terminator)
    }
}
