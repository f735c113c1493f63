//! Writing machine code over a live function entry
//!
//! # Platform-Specific Implementation
//!
//! - **x86_64**: `jmp qword ptr [rip+0]` followed by the absolute destination
//! - **aarch64**: `ldr x16, #8; br x16` followed by the absolute destination,
//!   with an instruction cache flush after every write
//!
//! Both sequences are position independent, so the same bytes work wherever
//! the target and replacement live in the address space.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
use x86_64 as arch;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
use aarch64 as arch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("inline patching only supported on x86_64 and aarch64");

#[cfg(not(unix))]
compile_error!("inline patching only supported on unix platforms");

use libc::{c_void, PROT_EXEC, PROT_READ, PROT_WRITE};
use parking_lot::{const_mutex, Mutex};
use tracing::{trace, warn};

use crate::error::{HookError, HookResult};

/// Number of entry bytes a redirect overwrites
pub const PATCH_LEN: usize = arch::PATCH_LEN;

/// Entry bytes of a function, as saved before patching
pub type EntryBytes = [u8; PATCH_LEN];

/// Serializes every code write in the process
///
/// Two targets may share a page; concurrent protection flips on the same page
/// would otherwise race.
static PATCH_LOCK: Mutex<()> = const_mutex(());

/// Encode an absolute jump to `destination`
pub fn encode_jump(destination: usize) -> EntryBytes {
    arch::encode_jump(destination)
}

/// Fail when any two named targets lie within `PATCH_LEN` bytes of each other
///
/// A redirect written at one of them would overwrite the other's entry.
pub fn ensure_disjoint(targets: &[(&str, usize)]) -> HookResult<()> {
    for (i, &(first, a)) in targets.iter().enumerate() {
        for &(second, b) in &targets[i + 1..] {
            if a.abs_diff(b) < PATCH_LEN {
                return Err(HookError::Patch {
                    address: b,
                    reason: format!("{second} overlaps the patch over {first} at {a:#x}"),
                });
            }
        }
    }
    Ok(())
}

/// Copy the first `PATCH_LEN` bytes at `address`
///
/// # Safety
///
/// `address` must point at `PATCH_LEN` readable bytes of mapped code.
pub unsafe fn read_entry(address: usize) -> EntryBytes {
    let mut bytes = [0u8; PATCH_LEN];
    std::ptr::copy_nonoverlapping(address as *const u8, bytes.as_mut_ptr(), PATCH_LEN);
    bytes
}

/// Overwrite code at `address` with `bytes`
///
/// Makes the covering pages writable, copies, restores read+execute and
/// flushes the instruction cache. Once the copy has happened the write counts
/// as done: failing to drop write permission afterwards is only logged, so
/// callers never see an error for bytes that are already in place.
///
/// # Safety
///
/// `address..address + bytes.len()` must lie within mapped code that no
/// thread is executing mid-way through the overwritten range.
pub unsafe fn write_code(address: usize, bytes: &[u8]) -> HookResult<()> {
    if address == 0 {
        return Err(HookError::Patch {
            address,
            reason: "target address is null".into(),
        });
    }

    let _guard = PATCH_LOCK.lock();

    let page = page_size();
    let start = address & !(page - 1);
    let end = (address + bytes.len() + page - 1) & !(page - 1);
    let len = end - start;

    protect(start, len, PROT_READ | PROT_WRITE | PROT_EXEC, address)?;
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
    seal(start, len, address);

    arch::flush_icache(address, bytes.len());
    trace!(address = ?(address as *const u8), len = bytes.len(), "wrote code");

    Ok(())
}

unsafe fn protect(start: usize, len: usize, prot: libc::c_int, address: usize) -> HookResult<()> {
    if libc::mprotect(start as *mut c_void, len, prot) != 0 {
        return Err(HookError::Patch {
            address,
            reason: format!("mprotect failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}

/// Drop write permission from freshly patched pages
///
/// Returns whether the pages are read+execute again.
unsafe fn seal(start: usize, len: usize, address: usize) -> bool {
    match protect(start, len, PROT_READ | PROT_EXEC, address) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "patched pages left writable");
            false
        }
    }
}

fn page_size() -> usize {
    // Safety: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
