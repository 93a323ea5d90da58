// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the two kinds of deferred patches, kept as plain-data records with
// typed arena offsets rather than raw pointers. both lists are
// append-only during emission and applied once after all code and data
// have been laid out.

use fastgen_ir::SymbolRef;

/// a basic block of a particular function, unique module-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub func: usize,
    pub block: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Code,
    Data,
}

/// a 4-byte field inside the code arena (at offset `site`) that will
/// receive the PC-relative displacement to the target block's label:
/// `label_address - (site_address + 4)`.
#[derive(Debug, Clone, Copy)]
pub struct JumpReloc {
    pub site: usize,
    pub target: BlockRef,
}

/// a 4-byte field inside either arena that already holds a constant
/// addend and will have the target symbol's absolute address added in.
#[derive(Debug, Clone, Copy)]
pub struct SymbolReloc {
    pub segment: Segment,
    pub site: usize,
    pub target: SymbolRef,
}
