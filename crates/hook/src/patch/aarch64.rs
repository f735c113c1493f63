// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! aarch64 redirect encoding

use libc::c_void;

extern "C" {
    fn __clear_cache(start: *mut c_void, end: *mut c_void);
}

/// `ldr x16, #8` + `br x16` + 8-byte absolute address
pub const PATCH_LEN: usize = 16;

/// ldr x16, #8
const LDR_X16_LITERAL: u32 = 0x5800_0050;
/// br x16
const BR_X16: u32 = 0xd61f_0200;

pub fn encode_jump(destination: usize) -> [u8; PATCH_LEN] {
    let mut bytes = [0u8; PATCH_LEN];
    bytes[..4].copy_from_slice(&LDR_X16_LITERAL.to_le_bytes());
    bytes[4..8].copy_from_slice(&BR_X16.to_le_bytes());
    bytes[8..].copy_from_slice(&(destination as u64).to_le_bytes());
    bytes
}

/// Make freshly written instructions visible to instruction fetch
pub fn flush_icache(start: usize, len: usize) {
    // Safety: the range was just written and is mapped.
    unsafe { __clear_cache(start as *mut c_void, (start + len) as *mut c_void) };
}
