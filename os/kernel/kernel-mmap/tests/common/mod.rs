#![allow(dead_code)]

use kernel_info::memory::DEFAULT_PROCESS_SIZE;
use kernel_memory_addresses::VirtualAddress;
use kernel_mmap::{FaultError, Fd, FileError, FileTable, ProcessMemory, Vmm};
use kernel_vmem::test_support::{TestFrames, TestPageTable, TestPhys, UserAccessFault};
use std::collections::BTreeMap;

pub const START: u64 = DEFAULT_PROCESS_SIZE;
pub const FRAMES: usize = 64;

struct OpenFile {
    file: usize,
    pos: u64,
}

/// In-memory descriptor table with switchable failures.
///
/// Reads are served in chunks of at most [`MemFiles::READ_CHUNK`] bytes.
#[derive(Default)]
pub struct MemFiles {
    files: Vec<Vec<u8>>,
    open: BTreeMap<u32, OpenFile>,
    next_fd: u32,
    /// `(offset, length)` of every successful write, in order.
    pub writes: Vec<(u64, usize)>,
    pub fail_duplicate: bool,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub short_writes: bool,
    /// Failing closes leave the descriptor open.
    pub fail_close: bool,
}

impl MemFiles {
    pub const READ_CHUNK: usize = 1000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new file holding `contents`.
    pub fn create(&mut self, contents: Vec<u8>) -> Fd {
        self.files.push(contents);
        self.install(self.files.len() - 1)
    }

    pub fn contents(&self, fd: Fd) -> &[u8] {
        &self.files[self.open[&fd.as_u32()].file]
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn position(&self, fd: Fd) -> u64 {
        self.open[&fd.as_u32()].pos
    }

    fn install(&mut self, file: usize) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open.insert(fd, OpenFile { file, pos: 0 });
        Fd::new(fd)
    }

    fn entry(&mut self, fd: Fd) -> Result<&mut OpenFile, FileError> {
        self.open
            .get_mut(&fd.as_u32())
            .ok_or(FileError::BadDescriptor(fd))
    }
}

impl FileTable for MemFiles {
    fn duplicate(&mut self, fd: Fd) -> Result<Fd, FileError> {
        if self.fail_duplicate {
            return Err(FileError::TableFull);
        }
        let file = self.entry(fd)?.file;
        Ok(self.install(file))
    }

    fn seek(&mut self, fd: Fd, offset: u64) -> Result<(), FileError> {
        self.entry(fd)?.pos = offset;
        Ok(())
    }

    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, FileError> {
        if self.fail_reads {
            return Err(FileError::Io);
        }
        let (file, pos) = {
            let entry = self.entry(fd)?;
            (entry.file, entry.pos as usize)
        };
        let data = &self.files[file];
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos).min(Self::READ_CHUNK);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.entry(fd)?.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, FileError> {
        if self.fail_writes {
            return Err(FileError::Io);
        }
        let (file, pos) = {
            let entry = self.entry(fd)?;
            (entry.file, entry.pos)
        };
        let n = if self.short_writes { buf.len() / 2 } else { buf.len() };
        let start = pos as usize;
        let data = &mut self.files[file];
        if data.len() < start + n {
            data.resize(start + n, 0);
        }
        data[start..start + n].copy_from_slice(&buf[..n]);
        self.entry(fd)?.pos += n as u64;
        self.writes.push((pos, n));
        Ok(n)
    }

    fn close(&mut self, fd: Fd) -> Result<(), FileError> {
        if self.fail_close {
            return Err(FileError::Io);
        }
        self.open
            .remove(&fd.as_u32())
            .map(|_| ())
            .ok_or(FileError::BadDescriptor(fd))
    }
}

/// One process with fake hardware around it.
pub struct Harness {
    pub phys: TestPhys,
    pub frames: TestFrames,
    pub table: TestPageTable,
    pub files: MemFiles,
    pub space: ProcessMemory,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            phys: TestPhys::with_frames(FRAMES),
            frames: TestFrames::new(FRAMES),
            table: TestPageTable::new(),
            files: MemFiles::new(),
            space: ProcessMemory::new(VirtualAddress::new(START)),
        }
    }

    pub fn vmm(&mut self) -> Vmm<'_, TestPageTable, TestPhys, TestFrames, MemFiles> {
        Vmm::new(
            &mut self.space,
            &mut self.table,
            &self.phys,
            &mut self.frames,
            &mut self.files,
        )
    }

    /// Store `bytes` at `addr` from user mode, populating pages on demand.
    pub fn touch_write(&mut self, addr: VirtualAddress, bytes: &[u8]) -> Result<(), FaultError> {
        loop {
            match self.table.user_write(&self.phys, addr, bytes) {
                Ok(()) => return Ok(()),
                Err(UserAccessFault::NotPresent(va)) => self.vmm().handle_page_fault(va)?,
                Err(UserAccessFault::ReadOnly(va)) => {
                    return Err(FaultError::ProtectionViolation(va));
                }
            }
        }
    }

    /// Load `len` bytes from `addr` in user mode, populating pages on demand.
    pub fn touch_read(&mut self, addr: VirtualAddress, len: usize) -> Result<Vec<u8>, FaultError> {
        let mut buf = vec![0; len];
        loop {
            match self.table.user_read(&self.phys, addr, &mut buf) {
                Ok(()) => return Ok(buf),
                Err(UserAccessFault::NotPresent(va) | UserAccessFault::ReadOnly(va)) => {
                    self.vmm().handle_page_fault(va)?;
                }
            }
        }
    }
}

/// `len` bytes of a recognisable pattern: byte `i` is `i % 251`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
