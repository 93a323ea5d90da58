// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the native helper functions the generated code calls by absolute
// address. the code generator keeps every SSA value in a stack slot and
// does not emit 64-bit arithmetic or atomic instructions itself, instead
// it reserves a small outgoing-argument area in every frame, writes the
// argument words there and emits a direct call to one of these helpers:
//
//     generated function                  runtime (native)
//   /---------------------\            /----------------------\
//   | ...                 |            | i64_add(r, a, b)     |
//   | movl %eax, 0(%esp)  |    /-----> |   *r = *a + *b       |
//   | movl %eax, 4(%esp)  |    |       |                      |
//   | movl %eax, 8(%esp)  |    |       | atomicrmw_i32_add    |
//   | call i64_add        | ---/       | tls_get / tls_init   |
//   | ...                 |            | unhandled / log      |
//   \---------------------/            \----------------------/
//
// all helpers are `extern "C"` (i386 cdecl: arguments on the stack,
// caller cleanup), so the reserved argument area doubles as the call
// frame and nothing has to be pushed or popped per call.

mod arith64;
mod atomic;
mod diag;
mod tls;

pub use arith64::{
    i64_add, i64_and, i64_ashr, i64_icmp_eq, i64_icmp_ne, i64_icmp_sge, i64_icmp_sgt, i64_icmp_sle,
    i64_icmp_slt, i64_icmp_uge, i64_icmp_ugt, i64_icmp_ule, i64_icmp_ult, i64_lshr, i64_mul,
    i64_or, i64_sdiv, i64_shl, i64_srem, i64_sub, i64_udiv, i64_urem, i64_xor,
};
pub use atomic::{
    atomicrmw_i32_add, atomicrmw_i32_and, atomicrmw_i32_max, atomicrmw_i32_min, atomicrmw_i32_nand,
    atomicrmw_i32_or, atomicrmw_i32_sub, atomicrmw_i32_umax, atomicrmw_i32_umin,
    atomicrmw_i32_xchg, atomicrmw_i32_xor,
};
pub use diag::{log_message, unhandled};
pub use tls::{tls_get, tls_init};
