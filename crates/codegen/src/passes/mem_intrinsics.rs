// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// rewrites calls to the memcpy/memmove/memset intrinsics into direct
// calls to the host C library's functions by absolute address. the
// intrinsics come in variants with 32-bit and 64-bit length operands,
// the 64-bit length is truncated to the platform word size. volatile
// transfers are not supported, the plain libc functions are
// non-volatile.

use fastgen_ir::{CastOp, Const, ConstExpr, Function, Inst, InstKind, Type, ValueRef};

use crate::passes::{callee_name, insert_inst};

pub fn expand_mem_intrinsics(func: &mut Function, block: usize, func_names: &[String]) -> bool {
    let mut modified = false;
    let mut position = 0;
    while position < func.blocks[block].insts.len() {
        let id = func.blocks[block].insts[position];
        let (callee, args) = match &func.inst(id).kind {
            InstKind::Call { callee, args, .. } => (callee.clone(), args.clone()),
            _ => {
                position += 1;
                continue;
            }
        };

        let host_func = match callee_name(&callee, func_names) {
            Some(name) if name.starts_with("llvm.memcpy.") => libc::memcpy as usize,
            Some(name) if name.starts_with("llvm.memmove.") => libc::memmove as usize,
            Some(name) if name.starts_with("llvm.memset.") => libc::memset as usize,
            _ => {
                position += 1;
                continue;
            }
        };
        modified = true;

        // (dest, src-or-value, length, is_volatile)
        assert!(
            matches!(args.last(), Some(ValueRef::Const(Const::Int(_, 0)))),
            "volatile memory intrinsics are not supported"
        );
        let dest = args[0].clone();
        let source = args[1].clone();
        let mut length = args[2].clone();

        if func.value_type(&length).is_i64() {
            // truncate a 64-bit length down to the word size. no check
            // is made for discarded bits.
            let trunc = insert_inst(
                func,
                block,
                position,
                Inst {
                    kind: InstKind::Cast {
                        op: CastOp::Trunc,
                        value: length,
                    },
                    ty: Type::i32(),
                },
            );
            position += 1;
            length = ValueRef::Inst(trunc);
        }

        let i8ptr = Type::ptr(Type::i8());
        let value_param = if host_func == libc::memset as usize {
            Type::i8()
        } else {
            i8ptr.clone()
        };
        let callee_ty = Type::func(
            vec![i8ptr.clone(), value_param, Type::i32()],
            Type::void(),
            false,
        );
        let new_callee = Const::Expr(Box::new(ConstExpr::Cast {
            op: CastOp::IntToPtr,
            value: Const::Int(Type::i32(), host_func as u64),
            ty: Type::ptr(callee_ty.clone()),
        }));

        func.inst_mut(id).kind = InstKind::Call {
            callee: new_callee.into(),
            callee_ty,
            args: vec![dest, source, length],
        };
        position = func.position_in_block(block, id) + 1;
    }
    modified
}
