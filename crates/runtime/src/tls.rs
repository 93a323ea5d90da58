// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the thread-local pointer cell behind the thread-pointer intrinsic.
// each invoking thread sees its own pointer.

use std::cell::Cell;
use std::ptr;

use libc::{c_int, c_void};

thread_local! {
    static THREAD_PTR: Cell<*mut c_void> = const { Cell::new(ptr::null_mut()) };
}

pub extern "C" fn tls_init(thread_ptr: *mut c_void) -> c_int {
    THREAD_PTR.with(|cell| cell.set(thread_ptr));
    0
}

pub extern "C" fn tls_get() -> *mut c_void {
    THREAD_PTR.with(|cell| cell.get())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::tls::{tls_get, tls_init};

    #[test]
    fn test_tls_roundtrip() {
        assert_eq!(tls_init(0x12345 as *mut _), 0);
        assert_eq!(tls_get() as usize, 0x12345);
    }

    #[test]
    fn test_tls_is_per_thread() {
        tls_init(0x1000 as *mut _);
        let other = std::thread::spawn(|| {
            // a fresh thread starts with a null pointer
            let before = tls_get() as usize;
            tls_init(0x2000 as *mut _);
            (before, tls_get() as usize)
        })
        .join()
        .unwrap();
        assert_eq!(other, (0, 0x2000));
        assert_eq!(tls_get() as usize, 0x1000);
    }
}
