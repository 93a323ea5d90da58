// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// rewrites each getelementptr into explicit pointer arithmetic: a
// ptrtoint of the base, one add per index component (with a mul by the
// element size for array-style steps), and a final inttoptr back to the
// result pointer type. struct-field steps become constant offsets drawn
// from the struct layout.
//
// the getelementptr's own pool slot is rewritten into the final
// inttoptr, so existing uses of the result stay valid without a
// replace-all-uses walk.

use fastgen_ir::{
    BinOp, BlockId, CastOp, Const, DataLayout, Function, Inst, InstKind, Type, TypeRef, ValueRef,
};

use crate::passes::insert_inst;

pub fn expand_getelementptrs(func: &mut Function, block: BlockId, layout: &DataLayout) -> bool {
    let mut modified = false;
    let mut position = 0;
    while position < func.blocks[block].insts.len() {
        let id = func.blocks[block].insts[position];
        let (base, indexes, result_ty) = match &func.inst(id).kind {
            InstKind::GetElementPtr { base, indexes } => {
                (base.clone(), indexes.clone(), func.inst(id).ty.clone())
            }
            _ => {
                position += 1;
                continue;
            }
        };
        modified = true;

        let mut at = position;
        let base_ty = func.value_type(&base);
        let ptrtoint = insert_inst(
            func,
            block,
            at,
            Inst {
                kind: InstKind::Cast {
                    op: CastOp::PtrToInt,
                    value: base,
                },
                ty: Type::i32(),
            },
        );
        at += 1;

        let mut address = ValueRef::Inst(ptrtoint);
        let mut ty: TypeRef = base_ty;
        for index in indexes {
            let offset_value = match &*ty.clone() {
                Type::Struct(def) => {
                    let field = match &index {
                        ValueRef::Const(c) => c
                            .sign_extended()
                            .expect("struct field index is not an integer constant")
                            as usize,
                        _ => panic!("struct field index is not a constant"),
                    };
                    let offset = layout.struct_layout(def).offsets[field];
                    ty = def.fields[field].clone();
                    ValueRef::Const(Const::i32(offset as u32))
                }
                Type::Ptr(elem) | Type::Array(elem, _) => {
                    let elem = elem.clone();
                    let elem_size = layout.alloc_size(&elem);
                    ty = elem;
                    let mul = insert_inst(
                        func,
                        block,
                        at,
                        Inst {
                            kind: InstKind::Binary {
                                op: BinOp::Mul,
                                lhs: index,
                                rhs: Const::i32(elem_size as u32).into(),
                            },
                            ty: Type::i32(),
                        },
                    );
                    at += 1;
                    ValueRef::Inst(mul)
                }
                _ => panic!("getelementptr step into non-aggregate type"),
            };

            let add = insert_inst(
                func,
                block,
                at,
                Inst {
                    kind: InstKind::Binary {
                        op: BinOp::Add,
                        lhs: address,
                        rhs: offset_value,
                    },
                    ty: Type::i32(),
                },
            );
            at += 1;
            address = ValueRef::Inst(add);
        }

        assert_eq!(
            result_ty.pointee(),
            Some(&ty),
            "getelementptr result type does not match the indexed type"
        );

        // the getelementptr's slot becomes the final inttoptr, so all
        // uses of the result keep working
        *func.inst_mut(id) = Inst {
            kind: InstKind::Cast {
                op: CastOp::IntToPtr,
                value: address,
            },
            ty: result_ty,
        };
        position = at + 1;
    }
    modified
}
