// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the builders below are the programmatic front end of the IR: a parser
// (or an embedding host) constructs modules through them, and the test
// suites use them in place of a textual IR reader.
//
// e.g. to build `fn sub_1000(a: i32) -> i32 { 1000 - a }`:
//
//     let mut fb = FunctionBuilder::new(
//         "sub_1000",
//         FuncSig { params: vec![Type::i32()], ret: Type::i32(), variadic: false });
//     let entry = fb.create_block("entry");
//     fb.switch_to_block(entry);
//     let result = fb.binary(BinOp::Sub, Const::i32(1000).into(), ValueRef::Arg(0));
//     fb.ret(Some(result));
//     let sym = module_builder.add_function(fb.finish());

use crate::constant::Const;
use crate::instruction::{
    AtomicOrdering, BinOp, BlockId, CastOp, IcmpPred, Inst, InstKind, RmwOp, ValueRef,
};
use crate::module::{BasicBlock, Function, GlobalVar, Linkage, Module, SymbolRef};
use crate::types::{FuncSig, Type, TypeRef};

#[derive(Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::new(),
        }
    }

    pub fn add_global(&mut self, name: &str, ty: TypeRef, init: Const) -> SymbolRef {
        let index = self.module.globals.len();
        self.module.globals.push(GlobalVar {
            name: name.to_owned(),
            ty,
            init: Some(init),
            linkage: Linkage::External,
        });
        SymbolRef::Data(index)
    }

    pub fn add_weak_external(&mut self, name: &str, ty: TypeRef) -> SymbolRef {
        let index = self.module.globals.len();
        self.module.globals.push(GlobalVar {
            name: name.to_owned(),
            ty,
            init: None,
            linkage: Linkage::ExternalWeak,
        });
        SymbolRef::Data(index)
    }

    /// adds a function without a body. the body can be supplied later
    /// with `set_function_body`, or left absent for an external or
    /// intrinsic declaration.
    pub fn declare_function(&mut self, name: &str, sig: FuncSig) -> SymbolRef {
        let index = self.module.functions.len();
        self.module.functions.push(Function::new(name, sig));
        SymbolRef::Func(index)
    }

    pub fn add_function(&mut self, func: Function) -> SymbolRef {
        let index = self.module.functions.len();
        self.module.functions.push(func);
        SymbolRef::Func(index)
    }

    pub fn set_function_body(&mut self, symbol: SymbolRef, func: Function) {
        let index = match symbol {
            SymbolRef::Func(index) => index,
            _ => panic!("not a function symbol"),
        };
        let declared = &self.module.functions[index];
        assert_eq!(declared.name, func.name, "function name mismatch");
        assert_eq!(declared.sig, func.sig, "function signature mismatch");
        self.module.functions[index] = func;
    }

    /// a constant referring to the address of a declared symbol.
    pub fn symbol_const(&self, symbol: SymbolRef) -> Const {
        Const::Symbol(symbol, self.module.symbol_type(symbol))
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

pub struct FunctionBuilder {
    func: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: &str, sig: FuncSig) -> Self {
        Self {
            func: Function::new(name, sig),
            current: None,
        }
    }

    pub fn create_block(&mut self, name: &str) -> BlockId {
        let id = self.func.blocks.len();
        self.func.blocks.push(BasicBlock {
            name: name.to_owned(),
            insts: vec![],
        });
        id
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn push(&mut self, kind: InstKind, ty: TypeRef) -> ValueRef {
        let block = self.current.expect("no current block");
        let id = self.func.add_inst(Inst { kind, ty });
        self.func.blocks[block].insts.push(id);
        ValueRef::Inst(id)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        let ty = self.func.value_type(&lhs);
        self.push(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        self.push(InstKind::ICmp { pred, lhs, rhs }, Type::i1())
    }

    pub fn cast(&mut self, op: CastOp, value: ValueRef, ty: TypeRef) -> ValueRef {
        self.push(InstKind::Cast { op, value }, ty)
    }

    pub fn load(&mut self, ptr: ValueRef) -> ValueRef {
        let ptr_ty = self.func.value_type(&ptr);
        let ty = ptr_ty.pointee().expect("load from non-pointer").clone();
        self.push(InstKind::Load { ptr }, ty)
    }

    pub fn store(&mut self, value: ValueRef, ptr: ValueRef) {
        self.push(InstKind::Store { value, ptr }, Type::void());
    }

    pub fn atomic_rmw(
        &mut self,
        op: RmwOp,
        ordering: AtomicOrdering,
        ptr: ValueRef,
        value: ValueRef,
    ) -> ValueRef {
        let ty = self.func.value_type(&value);
        self.push(
            InstKind::AtomicRmw {
                op,
                ordering,
                ptr,
                value,
            },
            ty,
        )
    }

    pub fn gep(&mut self, base: ValueRef, indexes: Vec<ValueRef>, result_ty: TypeRef) -> ValueRef {
        self.push(InstKind::GetElementPtr { base, indexes }, result_ty)
    }

    pub fn select(&mut self, cond: ValueRef, on_true: ValueRef, on_false: ValueRef) -> ValueRef {
        let ty = self.func.value_type(&on_true);
        self.push(
            InstKind::Select {
                cond,
                on_true,
                on_false,
            },
            ty,
        )
    }

    pub fn phi(&mut self, ty: TypeRef, incoming: Vec<(BlockId, ValueRef)>) -> ValueRef {
        self.push(InstKind::Phi { incoming }, ty)
    }

    /// `callee_ty` is the function type (not the pointer-to-function type)
    /// the callee is called as.
    pub fn call(&mut self, callee: ValueRef, callee_ty: TypeRef, args: Vec<ValueRef>) -> ValueRef {
        let ret = match &*callee_ty {
            Type::Func(sig) => sig.ret.clone(),
            _ => panic!("callee type is not a function type"),
        };
        self.push(
            InstKind::Call {
                callee,
                callee_ty,
                args,
            },
            ret,
        )
    }

    pub fn va_arg(&mut self, list: ValueRef, ty: TypeRef) -> ValueRef {
        self.push(InstKind::VaArg { list }, ty)
    }

    pub fn alloca(&mut self, allocated_ty: TypeRef) -> ValueRef {
        let ty = Type::ptr(allocated_ty.clone());
        self.push(InstKind::Alloca { allocated_ty }, ty)
    }

    pub fn ret(&mut self, value: Option<ValueRef>) {
        self.push(InstKind::Ret { value }, Type::void());
    }

    pub fn br(&mut self, dest: BlockId) {
        self.push(InstKind::Br { dest }, Type::void());
    }

    pub fn cond_br(&mut self, cond: ValueRef, on_true: BlockId, on_false: BlockId) {
        self.push(
            InstKind::CondBr {
                cond,
                on_true,
                on_false,
            },
            Type::void(),
        );
    }

    pub fn switch(&mut self, cond: ValueRef, cases: Vec<(u64, BlockId)>, default: BlockId) {
        self.push(
            InstKind::Switch {
                cond,
                cases,
                default,
            },
            Type::void(),
        );
    }

    pub fn unreachable(&mut self) {
        self.push(InstKind::Unreachable, Type::void());
    }

    pub fn finish(self) -> Function {
        self.func
    }
}
