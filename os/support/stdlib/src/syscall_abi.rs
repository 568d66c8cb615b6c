//! Numbers and flag values shared by the kernel's syscall dispatcher and userland.
//!
//! Arguments travel in `rdi, rsi, rdx, r10, r8, r9`, the syscall number in
//! `rax`. Failure is reported as [`SYSCALL_FAILED`] (`-1` as `u64`) except for
//! `mmap`, which returns a null address.

#[repr(u64)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Sysno {
    /// Write a single byte to a kernel-chosen “debug” sink.
    DebugWriteByte = 1,
    /// Just return a made-up number to prove plumbing.
    Bogus = 2,
    /// `mmap(hint, length, prot, flags, fd, offset) -> address | 0`
    Mmap = 3,
    /// `munmap(addr, length) -> 0 | -1`
    Munmap = 4,
    /// `msync(addr, length) -> 0 | -1`
    Msync = 5,
}

impl TryFrom<u64> for Sysno {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::DebugWriteByte,
            2 => Self::Bogus,
            3 => Self::Mmap,
            4 => Self::Munmap,
            5 => Self::Msync,
            other => return Err(other),
        })
    }
}

/// `-1` in the return register.
pub const SYSCALL_FAILED: u64 = u64::MAX;

/// Pages may not be accessed. Populated pages are still installed read-only.
pub const PROT_NONE: u64 = 0;
/// Pages may be read.
pub const PROT_READ: u64 = 1;
/// Pages may be read and written.
pub const PROT_WRITE: u64 = 2;

/// No mapping flag given; behaves like [`MAP_ANONYMOUS`].
pub const MAP_DEFAULT: u64 = 0;
/// Zero-filled memory not backed by a file; `fd` must be `-1`.
pub const MAP_ANONYMOUS: u64 = 1;
/// Memory backed by the file behind `fd`, starting at `offset`.
pub const MAP_FILE: u64 = 2;

/// The "no descriptor" value for anonymous mappings, as passed in a register.
pub const NO_FD: u64 = u64::MAX;
