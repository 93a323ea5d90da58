// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use std::rc::Rc;

/// types are immutable and shared by reference counting, so cloning a
/// `TypeRef` is cheap and type equality is structural.
pub type TypeRef = Rc<Type>;

/// the signature of a function or of a function pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncSig {
    pub params: Vec<TypeRef>,
    pub ret: TypeRef,
    pub variadic: bool,
}

/// the field list of a struct type.
///
/// a packed struct has no padding between fields and no tail padding,
/// a non-packed struct is laid out with the natural ABI alignments
/// (see the `data_layout` module).
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub fields: Vec<TypeRef>,
    pub packed: bool,
}

/// note that the only supported integer widths are 1, 8, 16, 32 and 64,
/// and all pointers are 32-bit regardless of the pointee type.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Int(u32),
    Double,
    Ptr(TypeRef),
    Array(TypeRef, u64),
    Struct(StructDef),
    Func(FuncSig),
}

impl Type {
    pub fn void() -> TypeRef {
        Rc::new(Type::Void)
    }

    pub fn int(bits: u32) -> TypeRef {
        assert!(
            matches!(bits, 1 | 8 | 16 | 32 | 64),
            "unsupported integer width: {}",
            bits
        );
        Rc::new(Type::Int(bits))
    }

    pub fn i1() -> TypeRef {
        Type::int(1)
    }

    pub fn i8() -> TypeRef {
        Type::int(8)
    }

    pub fn i16() -> TypeRef {
        Type::int(16)
    }

    pub fn i32() -> TypeRef {
        Type::int(32)
    }

    pub fn i64() -> TypeRef {
        Type::int(64)
    }

    pub fn double() -> TypeRef {
        Rc::new(Type::Double)
    }

    pub fn ptr(pointee: TypeRef) -> TypeRef {
        Rc::new(Type::Ptr(pointee))
    }

    pub fn array(elem: TypeRef, len: u64) -> TypeRef {
        Rc::new(Type::Array(elem, len))
    }

    pub fn struct_of(fields: Vec<TypeRef>, packed: bool) -> TypeRef {
        Rc::new(Type::Struct(StructDef { fields, packed }))
    }

    pub fn func(params: Vec<TypeRef>, ret: TypeRef, variadic: bool) -> TypeRef {
        Rc::new(Type::Func(FuncSig {
            params,
            ret,
            variadic,
        }))
    }

    #[inline]
    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    #[inline]
    pub fn is_i64(&self) -> bool {
        matches!(self, Type::Int(64))
    }

    #[inline]
    pub fn is_double(&self) -> bool {
        matches!(self, Type::Double)
    }

    #[inline]
    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn pointee(&self) -> Option<&TypeRef> {
        match self {
            Type::Ptr(pointee) => Some(pointee),
            _ => None,
        }
    }
}
