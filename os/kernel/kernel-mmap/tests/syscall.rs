mod common;

use common::{Harness, START, pattern};
use kernel_info::memory::PAGE_SIZE;
use kernel_mmap::syscall::{MMAP_FAILED, dispatch};
use stdlib::syscall_abi::{
    MAP_ANONYMOUS, MAP_FILE, NO_FD, PROT_READ, PROT_WRITE, SYSCALL_FAILED, Sysno,
};

#[test]
fn mmap_returns_the_address_or_null() {
    let mut h = Harness::new();
    let mut vmm = h.vmm();

    let ok = dispatch(
        &mut vmm,
        Sysno::Mmap as u64,
        [0, 10, PROT_WRITE, MAP_ANONYMOUS, NO_FD, 0],
    );
    assert_eq!(ok, Some(START));

    let bad_fd = dispatch(&mut vmm, Sysno::Mmap as u64, [0, 10, PROT_WRITE, MAP_ANONYMOUS, 4, 0]);
    assert_eq!(bad_fd, Some(MMAP_FAILED));

    let zero = dispatch(&mut vmm, Sysno::Mmap as u64, [0, 0, PROT_WRITE, MAP_ANONYMOUS, NO_FD, 0]);
    assert_eq!(zero, Some(MMAP_FAILED));
}

#[test]
fn munmap_and_msync_return_zero_or_minus_one() {
    let mut h = Harness::new();
    let fd = u64::from(h.files.create(pattern(PAGE_SIZE as usize)).as_u32());
    let mut vmm = h.vmm();

    let anon = dispatch(
        &mut vmm,
        Sysno::Mmap as u64,
        [0, PAGE_SIZE, PROT_WRITE, MAP_ANONYMOUS, NO_FD, 0],
    )
    .expect("mmap is handled");
    let file = dispatch(
        &mut vmm,
        Sysno::Mmap as u64,
        [0, PAGE_SIZE, PROT_READ, MAP_FILE, fd, 0],
    )
    .expect("mmap is handled");
    assert_ne!(file, MMAP_FAILED);

    let msync = Sysno::Msync as u64;
    let munmap = Sysno::Munmap as u64;
    assert_eq!(dispatch(&mut vmm, msync, [file, PAGE_SIZE, 0, 0, 0, 0]), Some(0));
    assert_eq!(dispatch(&mut vmm, msync, [anon, PAGE_SIZE, 0, 0, 0, 0]), Some(SYSCALL_FAILED));

    assert_eq!(dispatch(&mut vmm, munmap, [anon, PAGE_SIZE, 0, 0, 0, 0]), Some(0));
    assert_eq!(dispatch(&mut vmm, munmap, [anon, PAGE_SIZE, 0, 0, 0, 0]), Some(SYSCALL_FAILED));
    assert_eq!(dispatch(&mut vmm, munmap, [file, PAGE_SIZE, 0, 0, 0, 0]), Some(0));
}

#[test]
fn other_syscalls_are_not_handled() {
    let mut h = Harness::new();
    let mut vmm = h.vmm();
    assert_eq!(dispatch(&mut vmm, Sysno::Bogus as u64, [0; 6]), None);
    assert_eq!(dispatch(&mut vmm, Sysno::DebugWriteByte as u64, [0; 6]), None);
    assert_eq!(dispatch(&mut vmm, 0x99, [0; 6]), None);
}
