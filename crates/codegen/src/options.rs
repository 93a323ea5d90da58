// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use std::collections::HashMap;

/// the recognized configuration of one translation run.
#[derive(Debug, Clone)]
pub struct CodeGenOptions {
    /// after each function is emitted, dump its byte range through the
    /// system disassembler. diagnostic only.
    pub dump_code: bool,

    /// prepend a runtime log call to each function entry and each basic
    /// block that prints its name.
    pub trace_logging: bool,

    /// declared functions whose names appear here are bound to the given
    /// native entry address instead of receiving a fail-loud stub. the
    /// default binds the thread-pointer intrinsic to the runtime's
    /// thread-local-get helper.
    pub intrinsic_bindings: HashMap<String, usize>,
}

impl Default for CodeGenOptions {
    fn default() -> Self {
        Self {
            dump_code: false,
            trace_logging: false,
            intrinsic_bindings: default_intrinsic_bindings(),
        }
    }
}

pub fn default_intrinsic_bindings() -> HashMap<String, usize> {
    let mut bindings = HashMap::new();
    bindings.insert(
        "llvm.nacl.read.tp".to_owned(),
        fastgen_runtime::tls_get as usize,
    );
    bindings
}
