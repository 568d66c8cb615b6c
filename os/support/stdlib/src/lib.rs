#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(feature = "syscall"), forbid(unsafe_code))]
#![cfg_attr(feature = "syscall", allow(unsafe_code))]

#[cfg(all(feature = "syscall", target_arch = "x86_64"))]
pub mod syscall;

#[cfg(feature = "syscall-abi")]
pub mod syscall_abi;
