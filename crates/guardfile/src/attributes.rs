//! Security-relevant file metadata and object identity
//!
//! [`FileAttributes`] is a point-in-time snapshot of who owns a file and where
//! it lives. [`FileUniqueId`] is the minimal tuple needed to prove that two
//! opens reached the same underlying object. Both are wiped from memory when
//! dropped.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, Metadata};
use std::path::Path;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the opaque part of a [`FileUniqueId`]
pub const FILE_ID_LEN: usize = 16;

/// Snapshot of a file's security-relevant metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct FileAttributes {
    /// Owning user id
    pub owner: u32,
    /// Owning group id
    pub group: u32,
    /// Device the file resides on
    pub device: u64,
    /// Inode number
    pub inode: u64,
    /// Size in bytes at capture time
    pub size: u64,
    /// Raw mode bits (file type and permissions)
    pub mode: u32,
    /// Serialized access-control description.
    ///
    /// On Unix this is the permission bits (`mode & 0o7777`) in little-endian
    /// byte order.
    #[serde(default)]
    pub security_descriptor: Vec<u8>,
}

impl FileAttributes {
    /// Capture attributes of `path` without following a final symlink.
    ///
    /// Returns `None` if the target cannot be examined; callers must treat
    /// that as insecure.
    #[must_use]
    pub fn capture_path(path: &Path) -> Option<Self> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => Self::from_metadata(&metadata),
            Err(e) => {
                debug!("Cannot stat {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Capture attributes of an open descriptor
    #[must_use]
    pub fn capture_file(file: &File) -> Option<Self> {
        match file.metadata() {
            Ok(metadata) => Self::from_metadata(&metadata),
            Err(e) => {
                debug!("Cannot stat open descriptor: {}", e);
                None
            }
        }
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        let mode = metadata.mode();
        Some(Self {
            owner: metadata.uid(),
            group: metadata.gid(),
            device: metadata.dev(),
            inode: metadata.ino(),
            size: metadata.len(),
            mode,
            security_descriptor: (mode & 0o7777).to_le_bytes().to_vec(),
        })
    }

    #[cfg(not(unix))]
    fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        // No owner/inode model we can trust here: fail closed.
        None
    }

    /// True if this snapshot describes a regular file
    #[cfg(unix)]
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        (self.mode & libc::S_IFMT as u32) == libc::S_IFREG as u32
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        false
    }
}

/// Minimal identity of a file object, stable across opens
#[derive(Debug, Clone, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct FileUniqueId {
    /// Inode number
    pub inode: u64,
    /// Opaque platform identifier. On Unix the first eight bytes carry the
    /// device id; the remainder is zero.
    pub id: [u8; FILE_ID_LEN],
}

impl FileUniqueId {
    /// Capture the identity of an open descriptor
    #[must_use]
    pub fn capture_file(file: &File) -> Option<Self> {
        match file.metadata() {
            Ok(metadata) => Self::from_metadata(&metadata),
            Err(e) => {
                debug!("Cannot read identity of open descriptor: {}", e);
                None
            }
        }
    }

    /// Capture the identity of whatever `path` names right now, without
    /// following a final symlink
    #[must_use]
    pub fn capture_path(path: &Path) -> Option<Self> {
        fs::symlink_metadata(path)
            .ok()
            .and_then(|metadata| Self::from_metadata(&metadata))
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        let mut id = [0u8; FILE_ID_LEN];
        id[..8].copy_from_slice(&metadata.dev().to_le_bytes());
        Some(Self {
            inode: metadata.ino(),
            id,
        })
    }

    #[cfg(not(unix))]
    fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

impl PartialEq for FileUniqueId {
    fn eq(&self, other: &Self) -> bool {
        // Field by field, byte by byte: never compare a raw memory image.
        self.inode == other.inode && self.id.iter().zip(other.id.iter()).all(|(a, b)| a == b)
    }
}
