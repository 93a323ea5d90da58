// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the instruction encoder.
//
// all SSA values live in stack slots, EAX/ECX/EDX serve as scratch. the
// operand helpers are the workhorses every lowering is built from:
//
// - move_to_reg / move_part_to_reg:  value  -> register
// - addr_to_reg:                     &value -> register
// - spill / spill_part:              register -> value's slot
//
// constants that resolve to `symbol + offset` emit the offset and record
// a symbol relocation, resolved after all sections are laid out.

use std::collections::HashMap;
use std::ffi::CString;

use fastgen_ir::{Const, ConstExpr, CastOp, DataLayout, Function, InstId, SymbolRef, Type, ValueRef};

use crate::arena::{Arena, Protection};
use crate::options::CodeGenOptions;
use crate::reloc::{BlockRef, JumpReloc, Segment, SymbolReloc};
use crate::slots::{aliased_operand, value_key, StackSlots, ValueKey};

pub const REG_EAX: u8 = 0;
pub const REG_ECX: u8 = 1;
pub const REG_EDX: u8 = 2;
pub const REG_EBX: u8 = 3;
pub const REG_ESP: u8 = 4;
pub const REG_EBP: u8 = 5;
pub const REG_ESI: u8 = 6;
pub const REG_EDI: u8 = 7;

/// the /r group of the classic two-operand arithmetic instructions.
/// the encoded opcode is `(group << 3) | 0b01` for r/m32, r32 forms.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

const MAX_ALIAS_DEPTH: usize = 1000;

pub fn addr32(addr: usize) -> u32 {
    assert!(
        addr <= u32::MAX as usize,
        "address 0x{:x} does not fit in 32 bits",
        addr
    );
    addr as u32
}

fn check_offset_in_value(ty: &Type, offset_in_value: i32) {
    if ty.is_i64() {
        assert!(offset_in_value == 0 || offset_in_value == 4);
    } else {
        assert_eq!(offset_in_value, 0);
    }
}

/// reduces a constant to `(symbol, offset)` form: either the address of
/// a named symbol plus a byte offset, or a plain 64-bit value. returns
/// the name of the construct when the constant cannot be reduced, so
/// that the caller can emit a fail-loud stub.
pub fn resolve_constant(
    layout: &DataLayout,
    value: &Const,
) -> Result<(Option<SymbolRef>, u64), &'static str> {
    match value {
        Const::Symbol(symbol, _) => Ok((Some(*symbol), 0)),
        Const::Int(_, bits) => Ok((None, *bits)),
        Const::Double(value) => Ok((None, value.to_bits())),
        Const::NullPtr(_) => Ok((None, 0)),
        // leaving the memory uninitialized would make the generated
        // code behave unpredictably, zero is as good as any value
        Const::Undef(_) => Ok((None, 0)),
        Const::Expr(expr) => match &**expr {
            ConstExpr::GetElementPtr { base, indexes, .. } => {
                let (symbol, offset) = resolve_constant(layout, base)?;
                let index_values: Vec<i64> = indexes
                    .iter()
                    .map(|index| {
                        index
                            .sign_extended()
                            .expect("getelementptr index is not an integer constant")
                    })
                    .collect();
                let indexed = layout.indexed_offset(&base.ty(), &index_values);
                Ok((symbol, offset.wrapping_add(indexed as u64)))
            }
            ConstExpr::Cast {
                op: CastOp::BitCast | CastOp::PtrToInt | CastOp::IntToPtr,
                value,
                ..
            } => resolve_constant(layout, value),
            _ => Err("Unknown ConstantExpr"),
        },
        Const::Zero(_) | Const::Bytes(..) | Const::Array(..) | Const::Struct(..) => {
            panic!("unexpected aggregate constant in operand position")
        }
    }
}

pub struct Emitter<'a> {
    pub code: Arena,
    pub data: Arena,
    pub layout: &'a DataLayout,
    pub options: &'a CodeGenOptions,

    /// the slot map of the function currently being emitted.
    pub slots: StackSlots,
    pub labels: HashMap<BlockRef, u32>,
    /// resolved absolute addresses. arena addresses always fit 32 bits,
    /// native entries bound on a 64-bit test host may not, so the map
    /// keeps the full width and the width check happens at fixup.
    pub symbols: HashMap<SymbolRef, usize>,
    pub jump_relocs: Vec<JumpReloc>,
    pub symbol_relocs: Vec<SymbolReloc>,
    pub current_func: usize,

    alias_cache: HashMap<InstId, ValueRef>,
}

impl<'a> Emitter<'a> {
    pub fn new(layout: &'a DataLayout, options: &'a CodeGenOptions) -> Self {
        Self {
            code: Arena::new(Protection::ReadWriteExec),
            data: Arena::new(Protection::ReadWrite),
            layout,
            options,
            slots: StackSlots::empty(),
            labels: HashMap::new(),
            symbols: HashMap::new(),
            jump_relocs: vec![],
            symbol_relocs: vec![],
            current_func: 0,
            alias_cache: HashMap::new(),
        }
    }

    pub fn begin_function(&mut self, func_index: usize, slots: StackSlots) {
        self.current_func = func_index;
        self.slots = slots;
        self.alias_cache.clear();
    }

    pub fn put_code(&mut self, code: &[u8]) {
        self.code.put_bytes(code);
    }

    /// follows a chain of no-op casts down to the value that actually
    /// owns a stack slot (or is a constant/argument). results are cached
    /// per value so long chains are only walked once.
    pub fn resolve_alias(&mut self, func: &Function, value: &ValueRef) -> ValueRef {
        if let ValueRef::Inst(first) = value {
            if let Some(cached) = self.alias_cache.get(first) {
                return cached.clone();
            }
        }

        let mut visited: Vec<InstId> = vec![];
        let mut current = value.clone();
        loop {
            let id = match &current {
                ValueRef::Inst(id) => *id,
                _ => break,
            };
            if let Some(cached) = self.alias_cache.get(&id) {
                current = cached.clone();
                break;
            }
            match aliased_operand(func, id) {
                Some(next) => {
                    visited.push(id);
                    assert!(visited.len() <= MAX_ALIAS_DEPTH, "alias chain too deep");
                    current = next;
                }
                None => break,
            }
        }
        for id in visited {
            self.alias_cache.insert(id, current.clone());
        }
        current
    }

    /// generates code to put the 32-bit portion of `value` at
    /// `offset_in_value` into `reg`.
    pub fn move_part_to_reg(
        &mut self,
        func: &Function,
        reg: u8,
        value: &ValueRef,
        offset_in_value: i32,
    ) {
        check_offset_in_value(&func.value_type(value), offset_in_value);
        let value = self.resolve_alias(func, value);
        match &value {
            ValueRef::Const(c) => {
                let (symbol, mut offset) = match resolve_constant(self.layout, c) {
                    Ok(resolved) => resolved,
                    Err(unhandled) => {
                        self.unhandled_case(unhandled);
                        return;
                    }
                };
                if offset_in_value == 4 {
                    assert!(symbol.is_none(), "symbol addresses are not 64-bit");
                    offset >>= 32;
                }
                // movl $imm32, %reg
                self.code.put_byte(0xb8 | reg);
                match symbol {
                    Some(symbol) => self.put_symbol_reloc(symbol, offset as u32),
                    None => self.code.put_u32(offset as u32),
                }
            }
            ValueRef::Arg(_) | ValueRef::Inst(_) => {
                let key = value_key(&value).unwrap();
                let slot = self
                    .slots
                    .get(key)
                    .unwrap_or_else(|| panic!("value {:?} has no stack slot", key));
                let disp = slot + offset_in_value;
                // movl disp(%ebp), %reg
                self.code.put_byte(0x8b);
                self.code.put_byte(0x85 | (reg << 3));
                self.code.put_u32(disp as u32);
            }
        }
    }

    /// generates code to put `value` into `reg`.
    pub fn move_to_reg(&mut self, func: &Function, reg: u8, value: &ValueRef) {
        assert!(!func.value_type(value).is_i64());
        self.move_part_to_reg(func, reg, value, 0);
    }

    /// generates code to put the address of `value` into `reg`. constant
    /// operands are interned into the data arena first so that they have
    /// an address to take.
    pub fn addr_to_reg(&mut self, func: &Function, reg: u8, value: &ValueRef) {
        let value = self.resolve_alias(func, value);
        match &value {
            ValueRef::Const(c) => {
                let (symbol, offset) = resolve_constant(self.layout, c)
                    .expect("unsupported constant expression operand");
                assert!(symbol.is_none(), "cannot intern a symbol address");
                let addr = self.data.current_pos();
                self.data.put_bytes(&offset.to_le_bytes());
                // movl $imm32, %reg
                self.code.put_byte(0xb8 | reg);
                self.code.put_u32(addr32(addr));
            }
            ValueRef::Arg(_) | ValueRef::Inst(_) => {
                let key = value_key(&value).unwrap();
                let slot = self
                    .slots
                    .get(key)
                    .unwrap_or_else(|| panic!("value {:?} has no stack slot", key));
                // leal disp(%ebp), %reg
                self.code.put_byte(0x8d);
                self.code.put_byte(0x85 | (reg << 3));
                self.code.put_u32(slot as u32);
            }
        }
    }

    pub fn write_reg_to_ebp_offset(&mut self, reg: u8, stack_offset: i32) {
        // movl %reg, stack_offset(%ebp)
        self.code.put_byte(0x89);
        self.code.put_byte(0x85 | (reg << 3));
        self.code.put_u32(stack_offset as u32);
    }

    pub fn write_reg_to_esp_offset(&mut self, reg: u8, stack_offset: i32) {
        // movl %reg, stack_offset(%esp)
        self.code.put_byte(0x89);
        self.code.put_byte(0x84 | (reg << 3));
        self.code.put_byte(0x24);
        self.code.put_u32(stack_offset as u32);
    }

    /// writes `reg` to the 32-bit portion of the stack slot of
    /// instruction `id` at `offset_in_value`. the reverse of
    /// `move_part_to_reg`.
    pub fn spill_part(&mut self, func: &Function, reg: u8, id: InstId, offset_in_value: i32) {
        check_offset_in_value(&func.inst(id).ty, offset_in_value);
        let slot = self
            .slots
            .get(ValueKey::Inst(id))
            .expect("instruction has no stack slot");
        self.write_reg_to_ebp_offset(reg, slot + offset_in_value);
    }

    /// writes `reg` to the stack slot of instruction `id`. the reverse
    /// of `move_to_reg`.
    pub fn spill(&mut self, func: &Function, reg: u8, id: InstId) {
        assert!(!func.inst(id).ty.is_i64());
        self.spill_part(func, reg, id, 0);
    }

    pub fn put_direct_call(&mut self, target: usize) {
        // call rel32
        self.code.put_byte(0xe8);
        let after = self.code.current_pos() as u32 + 4;
        self.code.put_u32((target as u32).wrapping_sub(after));
    }

    pub fn put_ret(&mut self) {
        self.code.put_byte(0xc3);
    }

    /// emits the operand-size prefix and the opcode byte for a
    /// byte/word/dword memory access. `opcode_base` is the 8-bit form,
    /// the 16/32-bit form is `opcode_base + 1` (with a DATA16 prefix for
    /// 16-bit).
    pub fn put_sized_opcode(&mut self, ty: &Type, opcode_base: u8) {
        let bits = if ty.is_ptr() {
            32
        } else {
            ty.int_width().expect("sized access on non-integer type")
        };
        assert!(matches!(bits, 8 | 16 | 32), "unsupported access width");
        if bits == 16 {
            self.code.put_byte(0x66); // DATA16 prefix
        }
        if bits == 8 {
            self.code.put_byte(opcode_base);
        } else {
            self.code.put_byte(opcode_base + 1);
        }
    }

    pub fn put_modrm_reg_reg(&mut self, reg1: u8, reg2: u8) {
        self.code.put_byte((3 << 6) | (reg2 << 3) | reg1);
    }

    pub fn put_arith_reg_reg(&mut self, op: ArithOp, dest_reg: u8, src_reg: u8) {
        self.code.put_byte(((op as u8) << 3) | 1);
        self.put_modrm_reg_reg(dest_reg, src_reg);
    }

    /// widens the 1/8/16-bit value in `reg` to a full 32-bit value.
    pub fn extend_to_i32(&mut self, reg: u8, sign_extend: bool, src_size: u32) {
        if src_size == 32 {
            return;
        }
        if src_size == 1 {
            if sign_extend {
                // shll $31, %reg; sarl $31, %reg
                self.put_code(&[0xc1, 0xe0 | reg, 0x1f]);
                self.put_code(&[0xc1, 0xf8 | reg, 0x1f]);
            } else {
                // andl $1, %reg
                self.put_code(&[0x83, 0xe0 | reg, 0x01]);
            }
            return;
        }
        assert!(src_size == 8 || src_size == 16);

        self.code.put_byte(0x0f);
        let opcode = match (sign_extend, src_size) {
            (true, 8) => 0xbe,  // movsbl
            (true, _) => 0xbf,  // movswl
            (false, 8) => 0xb6, // movzbl
            (false, _) => 0xb7, // movzwl
        };
        self.code.put_byte(opcode);
        self.put_modrm_reg_reg(reg, reg);
    }

    pub fn make_label(&mut self, block: BlockRef) {
        let addr = addr32(self.code.current_pos());
        let previous = self.labels.insert(block, addr);
        assert!(previous.is_none(), "label made twice for {:?}", block);
    }

    /// emits a 4-byte displacement placeholder and records a jump
    /// relocation to `target`.
    pub fn direct_jump_offset32(&mut self, target: BlockRef) {
        let site = self.code.used();
        self.code.put_u32(0);
        self.jump_relocs.push(JumpReloc { site, target });
    }

    /// writes the addend and records a symbol relocation at the current
    /// code position.
    pub fn put_symbol_reloc(&mut self, target: SymbolRef, addend: u32) {
        self.symbol_relocs.push(SymbolReloc {
            segment: Segment::Code,
            site: self.code.used(),
            target,
        });
        self.code.put_u32(addend);
    }

    pub fn apply_jump_relocs(&mut self) {
        for reloc in std::mem::take(&mut self.jump_relocs) {
            let label = *self
                .labels
                .get(&reloc.target)
                .unwrap_or_else(|| panic!("jump target {:?} has no label", reloc.target));
            let field_addr = addr32(self.code.base_addr() + reloc.site);
            self.code
                .write_u32(reloc.site, label.wrapping_sub(field_addr + 4));
        }
    }

    pub fn apply_symbol_relocs(&mut self) {
        for reloc in std::mem::take(&mut self.symbol_relocs) {
            let addr = addr32(
                *self
                    .symbols
                    .get(&reloc.target)
                    .unwrap_or_else(|| panic!("symbol {:?} is not resolved", reloc.target)),
            );
            match reloc.segment {
                Segment::Code => self.code.add_u32(reloc.site, addr),
                Segment::Data => self.data.add_u32(reloc.site, addr),
            }
        }
    }

    /// emits a call that logs `msg` at run time.
    pub fn put_log_message(&mut self, msg: &str) {
        // pushl $msg
        self.code.put_byte(0x68);
        self.code.put_u32(leak_cstring(msg) as u32);
        self.put_direct_call(fastgen_runtime::log_message as usize);
        // addl $4, %esp
        self.code.put_byte(0x81);
        self.code.put_byte(0xc4);
        self.code.put_u32(4);
    }

    /// emits a fail-loud stub for an unsupported construct: translation
    /// still completes, the first execution of this code path prints the
    /// description and aborts.
    pub fn unhandled_case(&mut self, desc: &str) {
        eprintln!("Warning: not handled: {}", desc);
        // pushl $desc
        self.code.put_byte(0x68);
        self.code.put_u32(leak_cstring(desc) as u32);
        self.put_direct_call(fastgen_runtime::unhandled as usize);
    }
}

/// the message outlives the generated code, which can call the runtime
/// helpers with it at any time.
fn leak_cstring(message: &str) -> usize {
    let cstring = CString::new(message).unwrap();
    cstring.into_raw() as usize
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use fastgen_ir::{DataLayout, SymbolRef};

    use crate::emitter::{ArithOp, Emitter, REG_EAX, REG_ECX, REG_EDX};
    use crate::options::CodeGenOptions;
    use crate::reloc::BlockRef;

    fn new_test_emitter<'a>(
        layout: &'a DataLayout,
        options: &'a CodeGenOptions,
    ) -> Emitter<'a> {
        Emitter::new(layout, options)
    }

    #[test]
    fn test_arith_encodings() {
        let layout = DataLayout::new();
        let options = CodeGenOptions::default();
        let mut em = new_test_emitter(&layout, &options);

        em.put_arith_reg_reg(ArithOp::Add, REG_EAX, REG_ECX); // addl %ecx, %eax
        em.put_arith_reg_reg(ArithOp::Sub, REG_EAX, REG_ECX); // subl %ecx, %eax
        em.put_arith_reg_reg(ArithOp::Xor, REG_EDX, REG_EDX); // xorl %edx, %edx

        assert_eq!(
            em.code.as_slice(),
            vec![
                0x01, 0xc8, // add
                0x29, 0xc8, // sub
                0x31, 0xd2, // xor
            ]
        );
    }

    #[test]
    fn test_extend_encodings() {
        let layout = DataLayout::new();
        let options = CodeGenOptions::default();
        let mut em = new_test_emitter(&layout, &options);

        em.extend_to_i32(REG_EAX, false, 32); // nothing
        em.extend_to_i32(REG_EAX, false, 8); // movzbl %al, %eax
        em.extend_to_i32(REG_EAX, true, 16); // movswl %ax, %eax
        em.extend_to_i32(REG_ECX, false, 1); // andl $1, %ecx
        em.extend_to_i32(REG_EAX, true, 1); // shll $31; sarl $31

        assert_eq!(
            em.code.as_slice(),
            vec![
                0x0f, 0xb6, 0xc0, // movzbl
                0x0f, 0xbf, 0xc0, // movswl
                0x83, 0xe1, 0x01, // andl $1, %ecx
                0xc1, 0xe0, 0x1f, // shll $31, %eax
                0xc1, 0xf8, 0x1f, // sarl $31, %eax
            ]
        );
    }

    #[test]
    fn test_jump_reloc_fixup() {
        let layout = DataLayout::new();
        let options = CodeGenOptions::default();
        let mut em = new_test_emitter(&layout, &options);
        let target = BlockRef { func: 0, block: 1 };

        // a forward jump followed by the label itself
        em.code.put_byte(0xe9); // jmp rel32
        em.direct_jump_offset32(target);
        em.code.put_byte(0x90); // nop
        em.make_label(target);
        em.apply_jump_relocs();

        // displacement = label - (site + 4) = one nop byte
        assert_eq!(em.code.read_u32(1), 1);
    }

    #[test]
    fn test_symbol_reloc_fixup() {
        let layout = DataLayout::new();
        let options = CodeGenOptions::default();
        let mut em = new_test_emitter(&layout, &options);
        let symbol = SymbolRef::Data(0);

        em.code.put_byte(0xb8); // movl $imm32, %eax
        em.put_symbol_reloc(symbol, 8);
        em.symbols.insert(symbol, 100);
        em.apply_symbol_relocs();

        // the addend has the symbol address added in
        assert_eq!(em.code.read_u32(1), 108);
    }
}
