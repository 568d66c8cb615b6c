//! Syscall entry points for the mapping calls.
//!
//! The trap handler passes the raw registers here. Anything that is not a
//! mapping syscall is left to the caller.

use crate::file::FileTable;
use crate::mapping::Vmm;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{FrameAlloc, PhysMapper, UserPageTable};
use log::debug;
use stdlib::syscall_abi::{SYSCALL_FAILED, Sysno};

/// Returned by `mmap` on failure.
pub const MMAP_FAILED: u64 = 0;

/// Run `sysno` with the six raw argument registers.
///
/// Returns `None` if `sysno` is not one of `mmap`, `munmap` or `msync`.
/// Otherwise the value for `rax`: the mapping address or [`MMAP_FAILED`] for
/// `mmap`, `0` or [`SYSCALL_FAILED`] for the others.
pub fn dispatch<T, M, A, F>(vmm: &mut Vmm<'_, T, M, A, F>, sysno: u64, args: [u64; 6]) -> Option<u64>
where
    T: UserPageTable,
    M: PhysMapper,
    A: FrameAlloc,
    F: FileTable,
{
    let [addr, length, prot, flags, fd, offset] = args;
    let result = match Sysno::try_from(sysno).ok()? {
        Sysno::Mmap => {
            #[allow(clippy::cast_possible_wrap)]
            let fd = fd as i64;
            match vmm.mmap(VirtualAddress::new(addr), length, prot, flags, fd, offset) {
                Ok(addr) => addr.as_u64(),
                Err(e) => {
                    debug!("mmap failed: {e}");
                    MMAP_FAILED
                }
            }
        }
        Sysno::Munmap => status(vmm.munmap(VirtualAddress::new(addr), length), "munmap"),
        Sysno::Msync => status(vmm.msync(VirtualAddress::new(addr), length), "msync"),
        Sysno::DebugWriteByte | Sysno::Bogus => return None,
    };
    Some(result)
}

fn status<E: core::fmt::Display>(result: Result<(), E>, name: &str) -> u64 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            debug!("{name} failed: {e}");
            SYSCALL_FAILED
        }
    }
}
