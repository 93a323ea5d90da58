// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use crate::constant::Const;
use crate::instruction::{BlockId, Inst, InstId, ValueRef};
use crate::types::{FuncSig, Type, TypeRef};

/// a named global value: either a global variable (by index into the
/// module's global list) or a function (by index into the function list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolRef {
    Data(usize),
    Func(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    ExternalWeak,
}

/// a global variable. `ty` is the type of the variable's contents, the
/// address of the variable has type `ptr(ty)`. a variable without an
/// initializer is an external declaration.
#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub ty: TypeRef,
    pub init: Option<Const>,
    pub linkage: Linkage,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub name: String,
    /// ordered indexes into the owning function's instruction pool.
    pub insts: Vec<InstId>,
}

/// a function. blocks hold the textual order of instructions, the pool
/// owns them. a function with no blocks is a declaration.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub sig: FuncSig,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Inst>,
}

impl Function {
    pub fn new(name: &str, sig: FuncSig) -> Self {
        Self {
            name: name.to_owned(),
            sig,
            blocks: vec![],
            insts: vec![],
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id]
    }

    #[inline]
    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id]
    }

    /// appends an instruction to the pool without placing it in a block.
    pub fn add_inst(&mut self, inst: Inst) -> InstId {
        let id = self.insts.len();
        self.insts.push(inst);
        id
    }

    /// the position of an instruction inside a block, for passes that
    /// insert instructions relative to an existing one.
    pub fn position_in_block(&self, block: BlockId, id: InstId) -> usize {
        self.blocks[block]
            .insts
            .iter()
            .position(|&other| other == id)
            .unwrap_or_else(|| panic!("instruction {} is not in block {}", id, block))
    }

    pub fn terminator_position(&self, block: BlockId) -> usize {
        let insts = &self.blocks[block].insts;
        let last = *insts.last().expect("basic block is empty");
        assert!(
            self.insts[last].kind.is_terminator(),
            "basic block {} has no terminator",
            block
        );
        insts.len() - 1
    }

    pub fn value_type(&self, value: &ValueRef) -> TypeRef {
        match value {
            ValueRef::Arg(index) => self.sig.params[*index].clone(),
            ValueRef::Inst(id) => self.insts[*id].ty.clone(),
            ValueRef::Const(c) => c.ty(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            globals: vec![],
            functions: vec![],
        }
    }

    pub fn symbol_name(&self, symbol: SymbolRef) -> &str {
        match symbol {
            SymbolRef::Data(index) => &self.globals[index].name,
            SymbolRef::Func(index) => &self.functions[index].name,
        }
    }

    /// the pointer type a symbol reference has when used as a value.
    pub fn symbol_type(&self, symbol: SymbolRef) -> TypeRef {
        match symbol {
            SymbolRef::Data(index) => Type::ptr(self.globals[index].ty.clone()),
            SymbolRef::Func(index) => {
                Type::ptr(std::rc::Rc::new(Type::Func(self.functions[index].sig.clone())))
            }
        }
    }
}
