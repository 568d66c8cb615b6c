use crate::file::Fd;
use crate::region::RegionId;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::MapError;

/// Coarse classification of every failure the subsystem can report.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// Bad length, flags, protection or descriptor; nothing was changed.
    Argument,
    /// No physical page, no metadata storage or no address space left.
    ResourceExhaustion,
    /// No mapping matches the given address and length.
    Lookup,
    /// Seeking, reading or writing the backing file failed.
    BackingIo,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("out of memory for region metadata")]
    OutOfMemory,
    #[error("no room for {length:#x} more bytes below the mapping ceiling")]
    OutOfAddressSpace { length: u64 },
    #[error("region length must be non-zero")]
    EmptyRange,
    #[error("stale region handle {0:?}")]
    StaleHandle(RegionId),
    #[error("region {0:?} is already free")]
    AlreadyFree(RegionId),
}

impl RegistryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorClass {
        match self {
            Self::OutOfMemory | Self::OutOfAddressSpace { .. } => ErrorClass::ResourceExhaustion,
            Self::EmptyRange => ErrorClass::Argument,
            Self::StaleHandle(_) | Self::AlreadyFree(_) => ErrorClass::Lookup,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FileError {
    #[error("bad file descriptor {0}")]
    BadDescriptor(Fd),
    #[error("file descriptor table is full")]
    TableFull,
    #[error("short transfer: {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("file position past the end of the offset range")]
    OffsetOverflow,
    #[error("i/o error")]
    Io,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("no mapping covers {0}")]
    Unhandled(VirtualAddress),
    #[error("protection violation at {0}")]
    ProtectionViolation(VirtualAddress),
    #[error("out of physical memory")]
    OutOfMemory,
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("failed to read backing file: {0}")]
    File(#[from] FileError),
}

impl FaultError {
    #[must_use]
    pub const fn kind(&self) -> ErrorClass {
        match self {
            Self::Unhandled(_) => ErrorClass::Lookup,
            Self::ProtectionViolation(_) => ErrorClass::Argument,
            Self::OutOfMemory | Self::Map(_) => ErrorClass::ResourceExhaustion,
            Self::File(_) => ErrorClass::BackingIo,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MmapError {
    #[error("mapping length must be non-zero and fit the address space")]
    InvalidLength,
    #[error("file offset {0:#x} leaves no room for the mapping")]
    InvalidOffset(u64),
    #[error("unsupported protection {0:#x}")]
    InvalidProtection(u64),
    #[error("unsupported mapping flags {0:#x}")]
    InvalidFlags(u64),
    #[error("descriptor {fd} does not match the mapping flags")]
    DescriptorMismatch { fd: i64 },
    #[error("no mapping of {length:#x} bytes at {addr}")]
    NotMapped { addr: VirtualAddress, length: u64 },
    #[error("mapping at {0} has no backing file")]
    NotFileBacked(VirtualAddress),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to update page table: {0}")]
    Map(#[from] MapError),
    #[error("backing file: {0}")]
    File(#[from] FileError),
    #[error(transparent)]
    Fault(#[from] FaultError),
}

impl MmapError {
    #[must_use]
    pub const fn kind(&self) -> ErrorClass {
        match self {
            Self::InvalidLength
            | Self::InvalidOffset(_)
            | Self::InvalidProtection(_)
            | Self::InvalidFlags(_)
            | Self::DescriptorMismatch { .. } => ErrorClass::Argument,
            Self::NotMapped { .. } | Self::NotFileBacked(_) => ErrorClass::Lookup,
            Self::Registry(e) => e.kind(),
            Self::Map(_) => ErrorClass::ResourceExhaustion,
            Self::File(_) => ErrorClass::BackingIo,
            Self::Fault(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_keep_their_class() {
        let e = MmapError::from(RegistryError::OutOfAddressSpace { length: 0x1000 });
        assert_eq!(e.kind(), ErrorClass::ResourceExhaustion);

        let e = MmapError::from(FaultError::File(FileError::Io));
        assert_eq!(e.kind(), ErrorClass::BackingIo);

        assert_eq!(MmapError::InvalidFlags(7).kind(), ErrorClass::Argument);
        assert_eq!(
            MmapError::NotMapped {
                addr: VirtualAddress::new(0x4000),
                length: 10
            }
            .kind(),
            ErrorClass::Lookup
        );
    }
}
