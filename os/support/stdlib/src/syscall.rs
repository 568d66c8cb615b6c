//! Userland syscall wrappers (x86-64 `syscall` instruction).

use crate::syscall_abi::{NO_FD, Sysno};

#[inline(always)]
#[allow(clippy::inline_always)]
unsafe fn syscall6(sysno: Sysno, args: [u64; 6]) -> u64 {
    let mut ret: u64;
    unsafe {
        core::arch::asm!(
            "syscall",
            inlateout("rax") sysno as u64 => ret,
            in("rdi") args[0],
            in("rsi") args[1],
            in("rdx") args[2],
            in("r10") args[3],
            in("r8") args[4],
            in("r9") args[5],
            lateout("rcx") _, // clobbered by SYSCALL
            lateout("r11") _, // clobbered by SYSCALL
            options(nostack)
        );
    }
    ret
}

#[inline(always)]
#[allow(clippy::inline_always)]
pub fn debug_byte(b: u8) {
    unsafe { syscall6(Sysno::DebugWriteByte, [u64::from(b), 0, 0, 0, 0, 0]) };
}

/// Reserve `length` bytes of lazily populated memory, preferably near `hint`.
///
/// Returns a null pointer on failure. `MAP_ANONYMOUS` requires `fd` to be
/// `None` and `MAP_FILE` requires `Some`; `MAP_DEFAULT` ignores `fd` and
/// `offset` and always maps anonymous memory.
#[must_use]
pub fn mmap(hint: *mut u8, length: u64, prot: u64, flags: u64, fd: Option<u32>, offset: u64) -> *mut u8 {
    let fd = fd.map_or(NO_FD, u64::from);
    let addr = unsafe { syscall6(Sysno::Mmap, [hint.addr() as u64, length, prot, flags, fd, offset]) };
    core::ptr::with_exposed_provenance_mut(usize::try_from(addr).unwrap_or(0))
}

/// Release a mapping. `addr` and `length` must match the original `mmap` call.
///
/// # Safety
/// No live reference may point into the mapping.
pub unsafe fn munmap(addr: *mut u8, length: u64) -> Result<(), ()> {
    match unsafe { syscall6(Sysno::Munmap, [addr.addr() as u64, length, 0, 0, 0, 0]) } {
        0 => Ok(()),
        _ => Err(()),
    }
}

/// Write the dirty pages of a file-backed mapping back to the file.
pub fn msync(addr: *mut u8, length: u64) -> Result<(), ()> {
    match unsafe { syscall6(Sysno::Msync, [addr.addr() as u64, length, 0, 0, 0, 0]) } {
        0 => Ok(()),
        _ => Err(()),
    }
}
