// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the in-memory object model of the typed SSA IR which the code
// generator consumes.
//
// a module is a collection of global variables and functions, a function
// is a collection of basic blocks, and a basic block is a sequence of
// instructions that ends with exactly one control flow instruction:
//
// module
//   |-- global variable 0..n  (name, type, optional initializer)
//   |-- function 0..n
//         |-- basic block 0..n
//               |-- instruction 0..n
//               |-- terminator (br/cond_br/switch/ret/unreachable)
//
// instructions and function arguments are SSA values. a value is referred
// to by a `ValueRef`, which is either a function argument, an instruction
// result, or an inline constant. instructions live in a per-function pool
// and the basic blocks hold ordered lists of pool indexes, so rewrite
// passes can insert and replace instructions without invalidating
// references held by other instructions.
//
// this crate also provides:
// - the x86-32 data layout (type sizes, alignments, struct field offsets)
// - a builder for constructing modules programmatically (the role a
//   parser front end would play in a full tool chain)
// - a module verifier for debugging

pub mod builder;
pub mod constant;
pub mod data_layout;
pub mod instruction;
pub mod module;
pub mod types;
pub mod verify;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use constant::{Const, ConstExpr};
pub use data_layout::{DataLayout, StructLayout};
pub use instruction::{
    AtomicOrdering, BinOp, BlockId, CastOp, IcmpPred, Inst, InstId, InstKind, RmwOp, ValueRef,
};
pub use module::{BasicBlock, Function, GlobalVar, Linkage, Module, SymbolRef};
pub use types::{FuncSig, StructDef, Type, TypeRef};
pub use verify::verify_module;
