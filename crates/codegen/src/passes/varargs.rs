// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// rewrites variadic functions and calls into a packed-struct-over-
// pointer convention:
//
// - a variadic function gains a trailing `i8*` buffer argument and
//   stops being variadic. `va_start` becomes a store of that pointer
//   into the caller-provided va_list, `va_end` disappears.
// - `va_arg` turns into: load the current pointer from the va_list,
//   load the value it points at, advance the pointer by the value size
//   and store it back.
// - each variadic call site allocates a packed struct in its function's
//   entry block (not at the call, so a call inside a loop does not leak
//   stack), stores the variable arguments into the fields in order, and
//   passes the struct's address as the extra argument.
//
// this pass runs at module scope before everything else, because the
// getelementptrs it introduces still need the block-scope expansion.

use fastgen_ir::{
    BlockId, CastOp, Const, DataLayout, Function, Inst, InstId, InstKind, Module, Type, ValueRef,
};

use crate::passes::{callee_name, insert_inst};

pub fn expand_varargs(module: &mut Module, layout: &DataLayout) -> bool {
    let func_names: Vec<String> = module
        .functions
        .iter()
        .map(|func| func.name.clone())
        .collect();

    let mut modified = false;
    for func_index in 0..module.functions.len() {
        let func = &mut module.functions[func_index];

        for block in 0..func.blocks.len() {
            let mut position = 0;
            while position < func.blocks[block].insts.len() {
                let id = func.blocks[block].insts[position];
                match &func.inst(id).kind {
                    InstKind::VaArg { .. } => {
                        expand_va_arg(func, block, id, layout);
                        modified = true;
                    }
                    InstKind::Call { .. } => {
                        modified |= expand_varargs_call(func, block, id);
                    }
                    _ => {}
                }
                position = func.position_in_block(block, id) + 1;
            }
        }

        if func.sig.variadic && !func.is_declaration() {
            expand_varargs_func(func, &func_names);
            modified = true;
        }
    }
    modified
}

/// `va_arg` reads the value the va_list currently points at and bumps
/// the stored pointer past it.
fn expand_va_arg(func: &mut Function, block: BlockId, id: InstId, layout: &DataLayout) {
    let list = match &func.inst(id).kind {
        InstKind::VaArg { list } => list.clone(),
        _ => unreachable!(),
    };
    let result_ty = func.inst(id).ty.clone();
    let i8ptr = Type::ptr(Type::i8());

    let mut at = func.position_in_block(block, id);
    let arglist = insert_inst(
        func,
        block,
        at,
        Inst {
            kind: InstKind::Cast {
                op: CastOp::BitCast,
                value: list,
            },
            ty: Type::ptr(i8ptr.clone()),
        },
    );
    at += 1;
    let current = insert_inst(
        func,
        block,
        at,
        Inst {
            kind: InstKind::Load {
                ptr: ValueRef::Inst(arglist),
            },
            ty: i8ptr.clone(),
        },
    );
    at += 1;
    let typed = insert_inst(
        func,
        block,
        at,
        Inst {
            kind: InstKind::Cast {
                op: CastOp::BitCast,
                value: ValueRef::Inst(current),
            },
            ty: Type::ptr(result_ty.clone()),
        },
    );
    at += 1;

    // the va_arg itself becomes the load of the current slot, so its
    // uses keep working
    *func.inst_mut(id) = Inst {
        kind: InstKind::Load {
            ptr: ValueRef::Inst(typed),
        },
        ty: result_ty.clone(),
    };

    let size = layout.alloc_size(&result_ty);
    let next = insert_inst(
        func,
        block,
        at + 1,
        Inst {
            kind: InstKind::GetElementPtr {
                base: ValueRef::Inst(current),
                indexes: vec![Const::i32(size as u32).into()],
            },
            ty: i8ptr,
        },
    );
    insert_inst(
        func,
        block,
        at + 2,
        Inst {
            kind: InstKind::Store {
                value: ValueRef::Inst(next),
                ptr: ValueRef::Inst(arglist),
            },
            ty: Type::void(),
        },
    );
}

/// rewrites one call that passes variable arguments.
fn expand_varargs_call(func: &mut Function, block: BlockId, id: InstId) -> bool {
    let (callee, callee_ty, args) = match &func.inst(id).kind {
        InstKind::Call {
            callee,
            callee_ty,
            args,
        } => (callee.clone(), callee_ty.clone(), args.clone()),
        _ => unreachable!(),
    };
    let sig = match &*callee_ty {
        Type::Func(sig) => sig.clone(),
        _ => return false,
    };
    if !sig.variadic {
        return false;
    }
    // no variable arguments passed: nothing to pack
    if args.len() == sig.params.len() {
        return false;
    }

    let fixed_args = args[..sig.params.len()].to_vec();
    let var_args = args[sig.params.len()..].to_vec();
    let var_tys: Vec<_> = var_args
        .iter()
        .map(|arg| func.value_type(arg))
        .collect();
    let struct_ty = Type::struct_of(var_tys.clone(), true);

    // the buffer lives in the entry block
    let buf = func.add_inst(Inst {
        kind: InstKind::Alloca {
            allocated_ty: struct_ty.clone(),
        },
        ty: Type::ptr(struct_ty.clone()),
    });
    func.blocks[0].insts.insert(0, buf);

    let mut at = func.position_in_block(block, id);
    for (index, arg) in var_args.iter().enumerate() {
        let field_ptr = insert_inst(
            func,
            block,
            at,
            Inst {
                kind: InstKind::GetElementPtr {
                    base: ValueRef::Inst(buf),
                    indexes: vec![Const::i32(0).into(), Const::i32(index as u32).into()],
                },
                ty: Type::ptr(var_tys[index].clone()),
            },
        );
        at += 1;
        insert_inst(
            func,
            block,
            at,
            Inst {
                kind: InstKind::Store {
                    value: arg.clone(),
                    ptr: ValueRef::Inst(field_ptr),
                },
                ty: Type::void(),
            },
        );
        at += 1;
    }

    let mut new_params = sig.params.clone();
    new_params.push(Type::ptr(struct_ty));
    let mut new_args = fixed_args;
    new_args.push(ValueRef::Inst(buf));
    func.inst_mut(id).kind = InstKind::Call {
        callee,
        callee_ty: Type::func(new_params, sig.ret.clone(), false),
        args: new_args,
    };
    true
}

/// rewrites the variadic function itself: the extra buffer argument is
/// appended to the signature, `va_start` stores it into the va_list and
/// `va_end` is deleted.
fn expand_varargs_func(func: &mut Function, func_names: &[String]) {
    func.sig.params.push(Type::ptr(Type::i8()));
    func.sig.variadic = false;
    let va_buffer = ValueRef::Arg(func.sig.params.len() - 1);
    let i8ptrptr = Type::ptr(Type::ptr(Type::i8()));

    for block in 0..func.blocks.len() {
        let mut position = 0;
        while position < func.blocks[block].insts.len() {
            let id = func.blocks[block].insts[position];
            let name = match &func.inst(id).kind {
                InstKind::Call { callee, .. } => {
                    callee_name(callee, func_names).map(str::to_owned)
                }
                _ => None,
            };
            match name.as_deref() {
                Some(name) if name.starts_with("llvm.va_start") => {
                    let ap = match &func.inst(id).kind {
                        InstKind::Call { args, .. } => args[0].clone(),
                        _ => unreachable!(),
                    };
                    let arglist = insert_inst(
                        func,
                        block,
                        position,
                        Inst {
                            kind: InstKind::Cast {
                                op: CastOp::BitCast,
                                value: ap,
                            },
                            ty: i8ptrptr.clone(),
                        },
                    );
                    *func.inst_mut(id) = Inst {
                        kind: InstKind::Store {
                            value: va_buffer.clone(),
                            ptr: ValueRef::Inst(arglist),
                        },
                        ty: Type::void(),
                    };
                    position = func.position_in_block(block, id) + 1;
                }
                Some(name) if name.starts_with("llvm.va_end") => {
                    func.blocks[block].insts.remove(position);
                }
                _ => position += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use fastgen_ir::{
        Const, DataLayout, FuncSig, FunctionBuilder, InstKind, ModuleBuilder, Type, ValueRef,
    };

    use crate::passes::varargs::expand_varargs;

    #[test]
    fn test_expand_variadic_function_and_call() {
        let mut mb = ModuleBuilder::new();

        let va_start_sig = FuncSig {
            params: vec![Type::ptr(Type::i8())],
            ret: Type::void(),
            variadic: false,
        };
        let va_start = mb.declare_function("llvm.va_start", va_start_sig.clone());
        let va_end = mb.declare_function("llvm.va_end", va_start_sig.clone());

        // variadic callee: uses va_start / va_arg / va_end
        let callee_sig = FuncSig {
            params: vec![Type::i32()],
            ret: Type::i32(),
            variadic: true,
        };
        let mut fb = FunctionBuilder::new("first_vararg", callee_sig.clone());
        let entry = fb.create_block("entry");
        fb.switch_to_block(entry);
        let ap = fb.alloca(Type::ptr(Type::i8()));
        let va_start_fty = Type::func(va_start_sig.params.clone(), Type::void(), false);
        fb.call(
            mb.symbol_const(va_start).into(),
            va_start_fty.clone(),
            vec![ap.clone()],
        );
        let value = fb.va_arg(ap.clone(), Type::i32());
        fb.call(
            mb.symbol_const(va_end).into(),
            va_start_fty,
            vec![ap.clone()],
        );
        fb.ret(Some(value));
        let callee = mb.add_function(fb.finish());

        // caller passing two variable arguments
        let mut fb = FunctionBuilder::new(
            "caller",
            FuncSig {
                params: vec![],
                ret: Type::i32(),
                variadic: false,
            },
        );
        let entry = fb.create_block("entry");
        fb.switch_to_block(entry);
        let result = fb.call(
            mb.symbol_const(callee).into(),
            Type::func(callee_sig.params.clone(), Type::i32(), true),
            vec![
                Const::i32(1).into(),
                Const::i32(100).into(),
                Const::i64(200).into(),
            ],
        );
        fb.ret(Some(result));
        mb.add_function(fb.finish());

        let mut module = mb.finish();
        let layout = DataLayout::new();
        assert!(expand_varargs(&mut module, &layout));

        // the variadic function gained the buffer parameter
        let callee_func = &module.functions[2];
        assert!(!callee_func.sig.variadic);
        assert_eq!(callee_func.sig.params.len(), 2);
        assert_eq!(callee_func.sig.params[1], Type::ptr(Type::i8()));
        // va_end is gone, va_start became a store
        for block in &callee_func.blocks {
            for &id in &block.insts {
                if let InstKind::Call { callee, .. } = &callee_func.inst(id).kind {
                    assert!(
                        !matches!(callee, ValueRef::Const(_)),
                        "an intrinsic call survived: {:?}",
                        callee
                    );
                }
            }
        }

        // the call site packs (i32, i64) into an entry-block alloca
        let caller = &module.functions[3];
        assert!(!caller.sig.variadic);
        let entry_insts = &caller.blocks[0].insts;
        assert!(matches!(
            caller.inst(entry_insts[0]).kind,
            InstKind::Alloca { .. }
        ));
        let call_id = *entry_insts
            .iter()
            .find(|&&id| matches!(caller.inst(id).kind, InstKind::Call { .. }))
            .unwrap();
        match &caller.inst(call_id).kind {
            InstKind::Call { callee_ty, args, .. } => {
                assert_eq!(args.len(), 2); // fixed arg + buffer pointer
                assert_eq!(args[1], ValueRef::Inst(entry_insts[0]));
                match &**callee_ty {
                    Type::Func(sig) => {
                        assert!(!sig.variadic);
                        assert_eq!(sig.params.len(), 2);
                    }
                    other => panic!("unexpected callee type: {:?}", other),
                }
            }
            other => panic!("unexpected instruction: {:?}", other),
        }

        // a second run changes nothing
        assert!(!expand_varargs(&mut module, &layout));
    }
}
