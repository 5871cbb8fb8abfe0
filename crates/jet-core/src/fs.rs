//! Read-only file access.
//!
//! The engine only ever reads whole files (pre-compiled SPIR-V), so opening a
//! file loads its contents up front and closing it is simply dropping the
//! returned [`FileContents`].

use crate::error::{Error, Result};
use bitflags::bitflags;
use std::path::Path;

bitflags! {
    /// Requested access to a file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Contents of an opened file.
#[derive(Debug, Clone)]
pub struct FileContents {
    bytes: Vec<u8>,
}

impl FileContents {
    /// Open a file and read all of its bytes.
    ///
    /// Only read access is supported; any mode without [`AccessMode::READ`] or
    /// with [`AccessMode::WRITE`] is rejected.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();

        if !mode.contains(AccessMode::READ) || mode.contains(AccessMode::WRITE) {
            return Err(Error::UnsupportedAccess {
                path: path.display().to_string(),
                mode,
            });
        }

        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;

        tracing::debug!("Opened {} ({} bytes)", path.display(), bytes.len());

        Ok(Self { bytes })
    }

    /// File contents.
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("jet-core-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_whole_file() {
        let path = scratch_file("whole", &[1, 2, 3, 4]);
        let file = FileContents::open(&path, AccessMode::READ).unwrap();
        assert_eq!(file.size(), 4);
        assert_eq!(file.data(), &[1, 2, 3, 4]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = FileContents::open("definitely/not/here.spirv", AccessMode::READ).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn write_access_is_rejected() {
        let path = scratch_file("write", &[0]);
        let err = FileContents::open(&path, AccessMode::READ_WRITE).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAccess { .. }));
        let err = FileContents::open(&path, AccessMode::empty()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAccess { .. }));
        std::fs::remove_file(path).unwrap();
    }
}
