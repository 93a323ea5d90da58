// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// diagnostic helpers called from generated code.
//
// `unhandled` backs the fail-loud stubs the code generator emits for IR
// constructs it does not support: translation still completes and the
// problem surfaces at the first call of the offending code path.
// `log_message` backs the optional per-function/per-block trace logging.

use std::ffi::CStr;

use libc::c_char;

/// # Safety
///
/// `msg` must point to a valid NUL-terminated string.
pub unsafe extern "C" fn log_message(msg: *const c_char) {
    eprintln!("{}", CStr::from_ptr(msg).to_string_lossy());
}

/// # Safety
///
/// `desc` must point to a valid NUL-terminated string.
pub unsafe extern "C" fn unhandled(desc: *const c_char) -> ! {
    eprintln!(
        "Runtime fatal error: case not handled: {}",
        CStr::from_ptr(desc).to_string_lossy()
    );
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use crate::diag::log_message;

    #[test]
    fn test_log_message() {
        let msg = std::ffi::CString::new("trace test").unwrap();
        unsafe { log_message(msg.as_ptr()) };
    }
}
