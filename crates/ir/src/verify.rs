// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use crate::instruction::{InstKind, ValueRef};
use crate::module::{Function, Module};

/// a debugging aid that checks the structural invariants of a module and
/// panics on the first violation:
///
/// - every basic block of a defined function is non-empty and its last
///   instruction is its only terminator
/// - phi nodes appear only in a leading run at the top of a block
/// - all block targets and instruction references are in range
pub fn verify_module(module: &Module) {
    for func in &module.functions {
        verify_function(func);
    }
}

fn verify_function(func: &Function) {
    for (block_id, block) in func.blocks.iter().enumerate() {
        assert!(
            !block.insts.is_empty(),
            "function {}: block {} is empty",
            func.name,
            block_id
        );

        let mut leading_phis = true;
        for (position, &id) in block.insts.iter().enumerate() {
            assert!(
                id < func.insts.len(),
                "function {}: instruction index {} out of range",
                func.name,
                id
            );
            let inst = func.inst(id);

            let last = position == block.insts.len() - 1;
            assert_eq!(
                inst.kind.is_terminator(),
                last,
                "function {}: block {} has a terminator at position {} of {}",
                func.name,
                block_id,
                position,
                block.insts.len()
            );

            if !matches!(inst.kind, InstKind::Phi { .. }) {
                leading_phis = false;
            } else {
                assert!(
                    leading_phis,
                    "function {}: phi after a non-phi instruction in block {}",
                    func.name, block_id
                );
            }

            for target in block_targets(&inst.kind) {
                assert!(
                    target < func.blocks.len(),
                    "function {}: branch to unknown block {}",
                    func.name,
                    target
                );
            }

            for operand in inst.kind.operands() {
                match operand {
                    ValueRef::Arg(index) => assert!(
                        *index < func.sig.params.len(),
                        "function {}: argument index {} out of range",
                        func.name,
                        index
                    ),
                    ValueRef::Inst(other) => assert!(
                        *other < func.insts.len(),
                        "function {}: operand index {} out of range",
                        func.name,
                        other
                    ),
                    ValueRef::Const(_) => {}
                }
            }
        }
    }
}

fn block_targets(kind: &InstKind) -> Vec<usize> {
    match kind {
        InstKind::Br { dest } => vec![*dest],
        InstKind::CondBr {
            on_true, on_false, ..
        } => vec![*on_true, *on_false],
        InstKind::Switch { cases, default, .. } => {
            let mut targets: Vec<usize> = cases.iter().map(|(_, block)| *block).collect();
            targets.push(*default);
            targets
        }
        InstKind::Phi { incoming } => incoming.iter().map(|(block, _)| *block).collect(),
        _ => vec![],
    }
}
