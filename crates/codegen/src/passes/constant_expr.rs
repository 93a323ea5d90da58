// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// rewrites every constant-expression operand into an equivalent run of
// plain instructions inserted right before the use. nested expressions
// expand recursively, innermost first. after the pass, every operand is
// a plain constant, an argument, or an instruction result.
//
// operands of phi nodes are special: nothing can be inserted before a
// phi, so the materializing instructions go to the end of the matching
// incoming block, right before its terminator.

use fastgen_ir::{BlockId, Const, ConstExpr, Function, Inst, InstId, InstKind, Type, ValueRef};

use crate::passes::insert_inst;

pub fn expand_constant_exprs(func: &mut Function) -> bool {
    let mut modified = false;
    for block in 0..func.blocks.len() {
        let mut position = 0;
        while position < func.blocks[block].insts.len() {
            let id = func.blocks[block].insts[position];
            modified |= expand_instruction(func, block, id);
            position = func.position_in_block(block, id) + 1;
        }
    }
    modified
}

fn expand_instruction(func: &mut Function, block: BlockId, id: InstId) -> bool {
    let incoming_blocks: Option<Vec<BlockId>> = match &func.inst(id).kind {
        InstKind::Phi { incoming } => Some(incoming.iter().map(|(block, _)| *block).collect()),
        _ => None,
    };

    let operands: Vec<ValueRef> = func
        .inst(id)
        .kind
        .operands()
        .into_iter()
        .cloned()
        .collect();

    let mut modified = false;
    for (index, operand) in operands.iter().enumerate() {
        let expr = match operand {
            ValueRef::Const(Const::Expr(expr)) => (**expr).clone(),
            _ => continue,
        };
        modified = true;

        let (target_block, mut at) = match &incoming_blocks {
            Some(blocks) => {
                let incoming = blocks[index];
                (incoming, func.terminator_position(incoming))
            }
            None => (block, func.position_in_block(block, id)),
        };
        let new_value = expand_expr(func, target_block, &mut at, &expr);
        let mut operands = func.inst_mut(id).kind.operands_mut();
        *operands[index] = new_value;
    }
    modified
}

fn expand_const_value(
    func: &mut Function,
    block: BlockId,
    at: &mut usize,
    value: &Const,
) -> ValueRef {
    match value {
        Const::Expr(expr) => expand_expr(func, block, at, expr),
        _ => ValueRef::Const(value.clone()),
    }
}

fn expand_expr(func: &mut Function, block: BlockId, at: &mut usize, expr: &ConstExpr) -> ValueRef {
    let (kind, ty) = match expr {
        ConstExpr::Cast { op, value, ty } => {
            let value = expand_const_value(func, block, at, value);
            (InstKind::Cast { op: *op, value }, ty.clone())
        }
        ConstExpr::GetElementPtr {
            base,
            indexes,
            result_ty,
        } => {
            let base_value = expand_const_value(func, block, at, base);
            let index_values = indexes
                .iter()
                .map(|index| expand_const_value(func, block, at, index))
                .collect();
            (
                InstKind::GetElementPtr {
                    base: base_value,
                    indexes: index_values,
                },
                result_ty.clone(),
            )
        }
        ConstExpr::ICmp { pred, lhs, rhs } => {
            let lhs = expand_const_value(func, block, at, lhs);
            let rhs = expand_const_value(func, block, at, rhs);
            (
                InstKind::ICmp {
                    pred: *pred,
                    lhs,
                    rhs,
                },
                Type::i1(),
            )
        }
        ConstExpr::Binary { op, lhs, rhs } => {
            let ty = lhs.ty();
            let lhs = expand_const_value(func, block, at, lhs);
            let rhs = expand_const_value(func, block, at, rhs);
            (InstKind::Binary { op: *op, lhs, rhs }, ty)
        }
    };

    let id = insert_inst(func, block, *at, Inst { kind, ty });
    *at += 1;
    ValueRef::Inst(id)
}
