// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the mechanical IR rewrites that run before value placement:
//
// - expand_varargs            (module scope, runs first)
// - expand_constant_exprs     (function scope)
// - expand_getelementptrs     (block scope)
// - expand_mem_intrinsics     (block scope)
//
// all of them only introduce plain instructions the encoder knows how
// to lower, and all of them must run before stack slots are assigned
// because the new instructions need slots too. each pass is idempotent:
// a second run over already-expanded IR changes nothing.

pub mod constant_expr;
pub mod getelementptr;
pub mod mem_intrinsics;
pub mod varargs;

use fastgen_ir::{BlockId, Const, Function, Inst, InstId, SymbolRef, ValueRef};

/// adds an instruction to the pool and places it at `position` inside
/// `block`.
pub(crate) fn insert_inst(
    func: &mut Function,
    block: BlockId,
    position: usize,
    inst: Inst,
) -> InstId {
    let id = func.add_inst(inst);
    func.blocks[block].insts.insert(position, id);
    id
}

/// the name of the directly-called function, when the callee is a plain
/// function symbol.
pub(crate) fn callee_name<'a>(callee: &ValueRef, func_names: &'a [String]) -> Option<&'a str> {
    match callee {
        ValueRef::Const(Const::Symbol(SymbolRef::Func(index), _)) => {
            Some(func_names[*index].as_str())
        }
        _ => None,
    }
}
