//! guardfile - Secure file acquisition
//!
//! This library opens, reads, writes and deletes files while defending
//! against path-substitution races: a file is only handed out once its
//! directory chain has been audited and the object actually opened has been
//! verified to be the object that was named.
//!
//! # Overview
//!
//! Every open goes through the same protocol:
//! canonicalize the path, probe existence, check the extension allow-list
//! and any expected attributes, audit every directory from `/` down, open
//! without following symlinks, and finally re-verify the identity of the open
//! descriptor against the path. Any failure yields an invalid handle
//! carrying a [`FileError`].
//!
//! # Example
//!
//! ```no_run
//! use guardfile::{ExtensionAllowList, ExtensionRule, OpenRequest, SecureOpener, SecurityPolicy};
//!
//! fn main() -> guardfile::Result<()> {
//!     let opener = SecureOpener::new(SecurityPolicy::default());
//!
//!     // Only accept .log files that already exist
//!     let logs = ExtensionAllowList::default().allow(ExtensionRule::ignore_case("log"));
//!     let request = OpenRequest::new("/var/lib/app/audit.log", "r").extensions(logs);
//!
//!     let mut file = opener.open(&request).into_result()?;
//!     let mut buf = vec![0u8; file.size() as usize];
//!     let len = buf.len();
//!     file.read(&mut buf, 1, len)?;
//!     file.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Platform Support
//!
//! - **Unix**: full support (`O_NOFOLLOW`, ownership audit, inode identity)
//! - **Other platforms**: attribute capture and directory audit fail closed,
//!   so every open is refused

pub mod attributes;
pub mod audit;
pub mod comparator;
pub mod error;
pub mod extension;
pub mod format;
pub mod handle;
pub mod mode;
pub mod open;
pub mod policy;
pub mod remove;

// Re-exports for convenience
pub use attributes::{FileAttributes, FileUniqueId, FILE_ID_LEN};
pub use audit::{AuditVerdict, DirectoryAuditor, FnAuditor, OwnershipAuditor};
pub use comparator::IdentityComparator;
pub use error::{ConfigError, ErrorCategory, FileError, Result};
pub use extension::{ExtensionAllowList, ExtensionRule};
pub use format::FormatArg;
pub use handle::{SecureFile, SeekOrigin};
pub use mode::{ModeFamily, OpenMode};
pub use open::{OpenRequest, SecureOpener};
pub use policy::{ContractViolation, DirectoryCheck, SecurityPolicy};
pub use remove::OpenFilePolicy;

use std::path::Path;

/// Open `name` with the default policy and no extra expectations
pub fn secure_open(name: impl AsRef<Path>, mode: &str) -> SecureFile {
    SecureOpener::default().open(&OpenRequest::new(name, mode))
}

/// Delete `name` with the default policy
pub fn secure_delete(name: impl AsRef<Path>, policy: OpenFilePolicy) -> Result<()> {
    SecureOpener::default().delete_by_name(name, policy)
}
