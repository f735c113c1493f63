// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! x86_64 redirect encoding

/// `jmp [rip+0]` (6 bytes) + 8-byte absolute address
pub const PATCH_LEN: usize = 14;

pub fn encode_jump(destination: usize) -> [u8; PATCH_LEN] {
    let mut bytes = [0u8; PATCH_LEN];
    bytes[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    bytes[6..].copy_from_slice(&(destination as u64).to_le_bytes());
    bytes
}

/// Instruction fetch is coherent with data writes on x86
#[inline]
pub fn flush_icache(_start: usize, _len: usize) {}
