//! The per-process open-file table, as seen by the mapping code.

use crate::error::FileError;
use core::fmt;

/// Index into the calling process's descriptor table.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Fd(u32);

impl Fd {
    #[inline]
    #[must_use]
    pub const fn new(fd: u32) -> Self {
        Self(fd)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fd({})", self.0)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// File operations a mapping needs from the process's descriptor table.
///
/// Every file-backed region owns a duplicated descriptor, so seeking it never
/// disturbs the offset of the descriptor the process passed to `mmap`.
pub trait FileTable {
    /// Install a second descriptor referring to the same open file as `fd`.
    ///
    /// # Errors
    /// [`FileError::BadDescriptor`] if `fd` is not open, [`FileError::TableFull`]
    /// if no slot is left.
    fn duplicate(&mut self, fd: Fd) -> Result<Fd, FileError>;

    /// Move the file position of `fd` to `offset` bytes from the start.
    ///
    /// # Errors
    /// Any failure of the underlying file.
    fn seek(&mut self, fd: Fd, offset: u64) -> Result<(), FileError>;

    /// Read into `buf` from the current position; `Ok(0)` signals end of file.
    ///
    /// # Errors
    /// Any failure of the underlying file.
    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, FileError>;

    /// Write `buf` at the current position and return how much was written.
    ///
    /// # Errors
    /// Any failure of the underlying file.
    fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, FileError>;

    /// Release the descriptor.
    ///
    /// # Errors
    /// [`FileError::BadDescriptor`] if `fd` is not open.
    fn close(&mut self, fd: Fd) -> Result<(), FileError>;
}
