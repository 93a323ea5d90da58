// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use crate::constant::Const;
use crate::types::TypeRef;

/// the index of an instruction in a function's instruction pool.
pub type InstId = usize;

/// the index of a basic block in a function's block list.
pub type BlockId = usize;

/// a reference to an SSA value: a function argument (by position),
/// an instruction result (by pool index), or an inline constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRef {
    Arg(usize),
    Inst(InstId),
    Const(Const),
}

impl From<Const> for ValueRef {
    fn from(value: Const) -> Self {
        ValueRef::Const(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IcmpPred {
    #[inline]
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            IcmpPred::Sgt | IcmpPred::Sge | IcmpPred::Slt | IcmpPred::Sle
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    BitCast,
    Trunc,
    ZExt,
    SExt,
    PtrToInt,
    IntToPtr,
}

/// the read-modify-write operation of an atomic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOrdering {
    Monotonic,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    ICmp {
        pred: IcmpPred,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    Cast {
        op: CastOp,
        value: ValueRef,
    },
    Load {
        ptr: ValueRef,
    },
    Store {
        value: ValueRef,
        ptr: ValueRef,
    },
    AtomicRmw {
        op: RmwOp,
        ordering: AtomicOrdering,
        ptr: ValueRef,
        value: ValueRef,
    },
    GetElementPtr {
        base: ValueRef,
        indexes: Vec<ValueRef>,
    },
    Select {
        cond: ValueRef,
        on_true: ValueRef,
        on_false: ValueRef,
    },
    /// carries (incoming block, incoming value) pairs, one per predecessor.
    Phi {
        incoming: Vec<(BlockId, ValueRef)>,
    },
    /// `callee_ty` is the function type the callee is called as, which is
    /// needed because the callee may be an arbitrary pointer value.
    Call {
        callee: ValueRef,
        callee_ty: TypeRef,
        args: Vec<ValueRef>,
    },
    VaArg {
        list: ValueRef,
    },
    Alloca {
        allocated_ty: TypeRef,
    },
    Ret {
        value: Option<ValueRef>,
    },
    Br {
        dest: BlockId,
    },
    CondBr {
        cond: ValueRef,
        on_true: BlockId,
        on_false: BlockId,
    },
    /// case values are stored zero-extended to 64 bits.
    Switch {
        cond: ValueRef,
        cases: Vec<(u64, BlockId)>,
        default: BlockId,
    },
    Unreachable,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Ret { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Unreachable
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstKind::Binary { .. } => "binary operator",
            InstKind::ICmp { .. } => "icmp",
            InstKind::Cast { op, .. } => match op {
                CastOp::BitCast => "bitcast",
                CastOp::Trunc => "trunc",
                CastOp::ZExt => "zext",
                CastOp::SExt => "sext",
                CastOp::PtrToInt => "ptrtoint",
                CastOp::IntToPtr => "inttoptr",
            },
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::AtomicRmw { .. } => "atomicrmw",
            InstKind::GetElementPtr { .. } => "getelementptr",
            InstKind::Select { .. } => "select",
            InstKind::Phi { .. } => "phi",
            InstKind::Call { .. } => "call",
            InstKind::VaArg { .. } => "va_arg",
            InstKind::Alloca { .. } => "alloca",
            InstKind::Ret { .. } => "ret",
            InstKind::Br { .. } => "br",
            InstKind::CondBr { .. } => "cond br",
            InstKind::Switch { .. } => "switch",
            InstKind::Unreachable => "unreachable",
        }
    }

    /// the value operands of this instruction in a fixed order, so that a
    /// rewrite pass can scan them by index and replace them with
    /// `operands_mut`. block references are not operands.
    pub fn operands(&self) -> Vec<&ValueRef> {
        match self {
            InstKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::AtomicRmw { ptr, value, .. } => vec![ptr, value],
            InstKind::GetElementPtr { base, indexes } => {
                let mut ops = vec![base];
                ops.extend(indexes.iter());
                ops
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            InstKind::Phi { incoming } => incoming.iter().map(|(_, value)| value).collect(),
            InstKind::Call { callee, args, .. } => {
                let mut ops = vec![callee];
                ops.extend(args.iter());
                ops
            }
            InstKind::VaArg { list } => vec![list],
            InstKind::Alloca { .. } => vec![],
            InstKind::Ret { value } => value.iter().collect(),
            InstKind::Br { .. } => vec![],
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Switch { cond, .. } => vec![cond],
            InstKind::Unreachable => vec![],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut ValueRef> {
        match self {
            InstKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::AtomicRmw { ptr, value, .. } => vec![ptr, value],
            InstKind::GetElementPtr { base, indexes } => {
                let mut ops = vec![base];
                ops.extend(indexes.iter_mut());
                ops
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(_, value)| value).collect(),
            InstKind::Call { callee, args, .. } => {
                let mut ops = vec![callee];
                ops.extend(args.iter_mut());
                ops
            }
            InstKind::VaArg { list } => vec![list],
            InstKind::Alloca { .. } => vec![],
            InstKind::Ret { value } => value.iter_mut().collect(),
            InstKind::Br { .. } => vec![],
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Switch { cond, .. } => vec![cond],
            InstKind::Unreachable => vec![],
        }
    }
}

/// one instruction in a function's instruction pool.
/// `ty` is the type of the instruction's result value.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub kind: InstKind,
    pub ty: TypeRef,
}
