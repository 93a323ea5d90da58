// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// value placement: every SSA value of a function is assigned a fixed
// stack slot addressed relative to the saved frame pointer, unless the
// value is a no-op cast whose uses read through to the underlying value.
//
// the frame of a translated function:
//
//          high addresses
//   +--------------------------+
//   | argument 1               |  +12 (or +16 after an i64 argument)
//   | argument 0               |  +8
//   | return address           |  +4
//   | saved %ebp               |  <- %ebp
//   | local value slots        |  -4, -8, ... (i64 takes two words)
//   | outgoing argument area   |  <- %esp
//   +--------------------------+
//          low addresses
//
// the outgoing-argument area is sized for the largest call in the
// function but never smaller than three words, so calls to the runtime
// helper functions (result pointer + two operand pointers) always fit
// without per-site adjustment.

use std::collections::HashMap;

use fastgen_ir::data_layout::POINTER_SIZE_IN_BITS;
use fastgen_ir::{CastOp, Function, InstId, InstKind, Type, ValueRef};

/// three 4-byte argument words.
pub const MIN_CALLEE_ARGS_SIZE: i32 = 4 * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Arg(usize),
    Inst(InstId),
}

pub fn value_key(value: &ValueRef) -> Option<ValueKey> {
    match value {
        ValueRef::Arg(index) => Some(ValueKey::Arg(*index)),
        ValueRef::Inst(id) => Some(ValueKey::Inst(*id)),
        ValueRef::Const(_) => None,
    }
}

/// the number of stack bytes one value of this type occupies: two words
/// for i64, one word for everything else.
#[inline]
pub fn stack_size_of(ty: &Type) -> i32 {
    if ty.is_i64() {
        8
    } else {
        4
    }
}

/// a no-op cast produces no machine code. every use of its result is
/// transparently resolved to the underlying operand, so it gets no
/// stack slot either. pointer/integer casts only qualify at pointer
/// width, anything else is a bug in the input.
pub fn aliased_operand(func: &Function, id: InstId) -> Option<ValueRef> {
    let inst = func.inst(id);
    match &inst.kind {
        InstKind::Cast {
            op: CastOp::BitCast | CastOp::Trunc,
            value,
        } => Some(value.clone()),
        InstKind::Cast {
            op: CastOp::PtrToInt,
            value,
        } => {
            assert_eq!(
                inst.ty.int_width(),
                Some(POINTER_SIZE_IN_BITS),
                "ptrtoint to non-pointer-sized integer"
            );
            Some(value.clone())
        }
        InstKind::Cast {
            op: CastOp::IntToPtr,
            value,
        } => {
            assert_eq!(
                func.value_type(value).int_width(),
                Some(POINTER_SIZE_IN_BITS),
                "inttoptr from non-pointer-sized integer"
            );
            Some(value.clone())
        }
        _ => None,
    }
}

pub struct StackSlots {
    slots: HashMap<ValueKey, i32>,
    pub frame_vars_size: i32,
    pub frame_callee_args_size: i32,
}

impl StackSlots {
    pub fn empty() -> Self {
        Self {
            slots: HashMap::new(),
            frame_vars_size: 0,
            frame_callee_args_size: 0,
        }
    }

    /// assigns a slot to every argument and every non-alias instruction
    /// of a function. must run after all rewrite passes, because the
    /// passes introduce new instructions that need slots.
    pub fn assign(func: &Function) -> Self {
        let mut callee_args_size = MIN_CALLEE_ARGS_SIZE;
        for block in &func.blocks {
            for &id in &block.insts {
                if let InstKind::Call { args, .. } = &func.inst(id).kind {
                    let size: i32 = args
                        .iter()
                        .map(|arg| stack_size_of(&func.value_type(arg)))
                        .sum();
                    callee_args_size = callee_args_size.max(size);
                }
            }
        }

        let mut slots = HashMap::new();

        // skip the return address and the saved frame pointer
        let mut arg_offset: i32 = 8;
        for (index, param) in func.sig.params.iter().enumerate() {
            slots.insert(ValueKey::Arg(index), arg_offset);
            arg_offset += stack_size_of(param);
        }

        let mut vars_size: i32 = 0;
        for block in &func.blocks {
            for &id in &block.insts {
                assert!(
                    !slots.contains_key(&ValueKey::Inst(id)),
                    "instruction {} placed twice",
                    id
                );
                if aliased_operand(func, id).is_none() {
                    vars_size += stack_size_of(&func.inst(id).ty);
                    slots.insert(ValueKey::Inst(id), -vars_size);
                }
            }
        }

        Self {
            slots,
            frame_vars_size: vars_size,
            frame_callee_args_size: callee_args_size,
        }
    }

    #[inline]
    pub fn get(&self, key: ValueKey) -> Option<i32> {
        self.slots.get(&key).copied()
    }

    #[inline]
    pub fn frame_size(&self) -> i32 {
        self.frame_vars_size + self.frame_callee_args_size
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use fastgen_ir::{
        BinOp, CastOp, Const, FuncSig, FunctionBuilder, Type, ValueRef,
    };

    use crate::slots::{StackSlots, ValueKey, MIN_CALLEE_ARGS_SIZE};

    #[test]
    fn test_argument_offsets() {
        // (i32, i64, i32): the i64 argument takes two words
        let mut fb = FunctionBuilder::new(
            "args",
            FuncSig {
                params: vec![Type::i32(), Type::i64(), Type::i32()],
                ret: Type::i32(),
                variadic: false,
            },
        );
        let entry = fb.create_block("entry");
        fb.switch_to_block(entry);
        fb.ret(Some(ValueRef::Arg(0)));
        let func = fb.finish();

        let slots = StackSlots::assign(&func);
        assert_eq!(slots.get(ValueKey::Arg(0)), Some(8));
        assert_eq!(slots.get(ValueKey::Arg(1)), Some(12));
        assert_eq!(slots.get(ValueKey::Arg(2)), Some(20));
    }

    #[test]
    fn test_local_slots_and_frame_size() {
        let mut fb = FunctionBuilder::new(
            "locals",
            FuncSig {
                params: vec![Type::i32()],
                ret: Type::i32(),
                variadic: false,
            },
        );
        let entry = fb.create_block("entry");
        fb.switch_to_block(entry);
        let sum = fb.binary(BinOp::Add, ValueRef::Arg(0), Const::i32(1).into());
        let wide = fb.cast(CastOp::ZExt, sum.clone(), Type::i64());
        // a no-op cast gets no slot of its own
        let alias = fb.cast(CastOp::Trunc, wide.clone(), Type::i32());
        fb.ret(Some(alias.clone()));
        let func = fb.finish();

        let slots = StackSlots::assign(&func);
        let key = |value: &ValueRef| super::value_key(value).unwrap();
        assert_eq!(slots.get(key(&sum)), Some(-4));
        assert_eq!(slots.get(key(&wide)), Some(-12)); // two words
        assert_eq!(slots.get(key(&alias)), None);

        // ret also occupies a slot; frame = locals + minimum callee area
        assert_eq!(slots.frame_vars_size, 4 + 8 + 4);
        assert_eq!(slots.frame_callee_args_size, MIN_CALLEE_ARGS_SIZE);
        assert_eq!(slots.frame_size(), 16 + 12);
    }

    #[test]
    fn test_callee_argument_area() {
        // a call passing (i32, i64, i32) needs 16 bytes of argument area
        let callee_ty = Type::func(
            vec![Type::i32(), Type::i64(), Type::i32()],
            Type::i32(),
            false,
        );
        let mut fb = FunctionBuilder::new(
            "caller",
            FuncSig {
                params: vec![Type::ptr(callee_ty.clone())],
                ret: Type::i32(),
                variadic: false,
            },
        );
        let entry = fb.create_block("entry");
        fb.switch_to_block(entry);
        let result = fb.call(
            ValueRef::Arg(0),
            callee_ty,
            vec![
                Const::i32(1).into(),
                Const::i64(2).into(),
                Const::i32(3).into(),
            ],
        );
        fb.ret(Some(result));
        let func = fb.finish();

        let slots = StackSlots::assign(&func);
        assert_eq!(slots.frame_callee_args_size, 16);
        assert_eq!(slots.frame_size(), slots.frame_vars_size + 16);
    }
}
