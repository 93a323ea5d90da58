// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use crate::types::{StructDef, Type, TypeRef};

pub const POINTER_SIZE_IN_BITS: u32 = 32;
pub const POINTER_SIZE_IN_BYTES: u64 = 4;

/// the field offsets and the padded size of one struct type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub offsets: Vec<u64>,
    pub size: u64,
    pub align: u64,
}

/// the target data layout: x86-32, little-endian.
///
/// pointers are 4 bytes with 4-byte alignment, i64 and double are
/// 8-byte aligned. arrays have no padding between elements beyond the
/// element's own allocation size, structs are padded per field alignment
/// unless packed.
#[derive(Debug, Default)]
pub struct DataLayout;

impl DataLayout {
    pub fn new() -> Self {
        DataLayout
    }

    pub fn abi_align(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void => 1,
            Type::Int(1) | Type::Int(8) => 1,
            Type::Int(16) => 2,
            Type::Int(32) => 4,
            Type::Int(64) => 8,
            Type::Int(bits) => panic!("unsupported integer width: {}", bits),
            Type::Double => 8,
            Type::Ptr(_) | Type::Func(_) => POINTER_SIZE_IN_BYTES,
            Type::Array(elem, _) => self.abi_align(elem),
            Type::Struct(def) => self.struct_layout(def).align,
        }
    }

    /// the number of bytes one value of this type occupies in memory,
    /// including padding up to its alignment.
    pub fn alloc_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void => 0,
            Type::Int(1) | Type::Int(8) => 1,
            Type::Int(16) => 2,
            Type::Int(32) => 4,
            Type::Int(64) => 8,
            Type::Int(bits) => panic!("unsupported integer width: {}", bits),
            Type::Double => 8,
            Type::Ptr(_) | Type::Func(_) => POINTER_SIZE_IN_BYTES,
            Type::Array(elem, len) => self.alloc_size(elem) * len,
            Type::Struct(def) => self.struct_layout(def).size,
        }
    }

    pub fn struct_layout(&self, def: &StructDef) -> StructLayout {
        let mut offsets = Vec::with_capacity(def.fields.len());
        let mut offset: u64 = 0;
        let mut align: u64 = 1;

        for field in &def.fields {
            let field_align = if def.packed { 1 } else { self.abi_align(field) };
            offset = round_up(offset, field_align);
            offsets.push(offset);
            offset += self.alloc_size(field);
            align = align.max(field_align);
        }

        StructLayout {
            offsets,
            size: round_up(offset, align),
            align,
        }
    }

    /// the byte offset denoted by a getelementptr-style index vector.
    ///
    /// `base_ty` is the pointer type of the base operand. the first index
    /// steps over whole pointees, subsequent indexes step into arrays
    /// (scaled by the element size) or into struct fields (constant
    /// offsets from the struct layout). indexes are signed, negative
    /// indexes are legal for array steps.
    pub fn indexed_offset(&self, base_ty: &TypeRef, indexes: &[i64]) -> i64 {
        let mut offset: i64 = 0;
        let mut ty: TypeRef = base_ty.clone();

        for (nth, index) in indexes.iter().enumerate() {
            if nth == 0 {
                let elem = ty
                    .pointee()
                    .expect("getelementptr base is not a pointer")
                    .clone();
                offset = offset.wrapping_add(index.wrapping_mul(self.alloc_size(&elem) as i64));
                ty = elem;
            } else {
                match &*ty.clone() {
                    Type::Struct(def) => {
                        let field = usize::try_from(*index).expect("negative struct field index");
                        let layout = self.struct_layout(def);
                        offset = offset.wrapping_add(layout.offsets[field] as i64);
                        ty = def.fields[field].clone();
                    }
                    Type::Array(elem, _) => {
                        offset =
                            offset.wrapping_add(index.wrapping_mul(self.alloc_size(elem) as i64));
                        ty = elem.clone();
                    }
                    _ => panic!("getelementptr index into non-aggregate type"),
                }
            }
        }

        offset
    }
}

#[inline]
fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::data_layout::DataLayout;
    use crate::types::Type;

    #[test]
    fn test_scalar_sizes() {
        let layout = DataLayout::new();
        assert_eq!(layout.alloc_size(&Type::i1()), 1);
        assert_eq!(layout.alloc_size(&Type::i8()), 1);
        assert_eq!(layout.alloc_size(&Type::i16()), 2);
        assert_eq!(layout.alloc_size(&Type::i32()), 4);
        assert_eq!(layout.alloc_size(&Type::i64()), 8);
        assert_eq!(layout.alloc_size(&Type::double()), 8);
        assert_eq!(layout.alloc_size(&Type::ptr(Type::i64())), 4);
        assert_eq!(layout.alloc_size(&Type::array(Type::i16(), 5)), 10);
    }

    #[test]
    fn test_struct_layout() {
        let layout = DataLayout::new();

        // struct { u8 a; u32 b; u8 c; }
        let ty = Type::struct_of(vec![Type::i8(), Type::i32(), Type::i8()], false);
        let (def, sl) = match &*ty {
            crate::types::Type::Struct(def) => (def, layout.struct_layout(def)),
            _ => unreachable!(),
        };
        assert_eq!(def.fields.len(), 3);
        assert_eq!(sl.offsets, vec![0, 4, 8]);
        assert_eq!(sl.size, 12);
        assert_eq!(sl.align, 4);

        // the same fields packed
        let ty = Type::struct_of(vec![Type::i8(), Type::i32(), Type::i8()], true);
        let sl = match &*ty {
            crate::types::Type::Struct(def) => layout.struct_layout(def),
            _ => unreachable!(),
        };
        assert_eq!(sl.offsets, vec![0, 1, 5]);
        assert_eq!(sl.size, 6);
        assert_eq!(sl.align, 1);
    }

    #[test]
    fn test_indexed_offset() {
        let layout = DataLayout::new();

        // struct { u8 a; u32 b; u8 c; } *p; &p[0].c == 8
        let st = Type::struct_of(vec![Type::i8(), Type::i32(), Type::i8()], false);
        let ptr = Type::ptr(st);
        assert_eq!(layout.indexed_offset(&ptr, &[0, 2]), 8);

        // i16 *p; &p[3] == 6, &p[-1] == -2
        let ptr = Type::ptr(Type::i16());
        assert_eq!(layout.indexed_offset(&ptr, &[3]), 6);
        assert_eq!(layout.indexed_offset(&ptr, &[-1]), -2);

        // [8 x i16] *p; &(*p)[2] == 4
        let ptr = Type::ptr(Type::array(Type::i16(), 8));
        assert_eq!(layout.indexed_offset(&ptr, &[0, 2]), 4);
    }
}
