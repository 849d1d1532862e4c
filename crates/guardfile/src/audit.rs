//! Directory chain security audit
//!
//! Before any descriptor is obtained, every directory from the filesystem
//! root down to the directory holding the target is checked. A chain is
//! only trusted if no untrusted principal could have replaced any part of it.

use std::fmt;
use std::path::Path;
use tracing::debug;

/// Result of auditing a directory chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditVerdict {
    /// Every directory in the chain is trustworthy
    Safe,
    /// At least one directory is not; the string says which and why
    Unsafe(String),
}

impl AuditVerdict {
    #[must_use]
    pub fn is_safe(&self) -> bool {
        matches!(self, AuditVerdict::Safe)
    }

    /// Human-readable reason, if unsafe
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            AuditVerdict::Safe => None,
            AuditVerdict::Unsafe(reason) => Some(reason),
        }
    }
}

impl fmt::Display for AuditVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditVerdict::Safe => write!(f, "safe"),
            AuditVerdict::Unsafe(reason) => write!(f, "unsafe: {}", reason),
        }
    }
}

/// Audits a canonical directory path
///
/// Implementations must treat anything they cannot determine as unsafe.
pub trait DirectoryAuditor: Send + Sync {
    fn audit(&self, dir: &Path) -> AuditVerdict;
}

/// Adapter turning a closure into a [`DirectoryAuditor`]
pub struct FnAuditor<F>(pub F);

impl<F> DirectoryAuditor for FnAuditor<F>
where
    F: Fn(&Path) -> AuditVerdict + Send + Sync,
{
    fn audit(&self, dir: &Path) -> AuditVerdict {
        (self.0)(dir)
    }
}

/// Ownership and permission based auditor.
///
/// A directory is trusted when it:
/// - is a real directory, not a symlink
/// - is owned by root, the effective uid, or one of `trusted_owners`
/// - is not writable by group or others
///
/// Ancestors that are group/other writable are tolerated only when the
/// sticky bit is set (e.g. `/tmp`), since the sticky bit stops other users
/// from renaming or removing entries they do not own. The final directory
/// is never allowed to be group/other writable.
#[derive(Debug, Clone, Default)]
pub struct OwnershipAuditor {
    trusted_owners: Vec<u32>,
}

impl OwnershipAuditor {
    #[must_use]
    pub fn new(trusted_owners: Vec<u32>) -> Self {
        Self { trusted_owners }
    }

    #[cfg(unix)]
    fn is_trusted_owner(&self, uid: u32, euid: u32) -> bool {
        uid == 0 || uid == euid || self.trusted_owners.contains(&uid)
    }

    #[cfg(unix)]
    fn audit_component(&self, component: &Path, is_target: bool, euid: u32) -> AuditVerdict {
        use std::os::unix::fs::MetadataExt;

        let metadata = match std::fs::symlink_metadata(component) {
            Ok(m) => m,
            Err(e) => {
                return AuditVerdict::Unsafe(format!(
                    "cannot stat {}: {}",
                    component.display(),
                    e
                ))
            }
        };

        if metadata.file_type().is_symlink() {
            return AuditVerdict::Unsafe(format!("{} is a symbolic link", component.display()));
        }
        if !metadata.is_dir() {
            return AuditVerdict::Unsafe(format!("{} is not a directory", component.display()));
        }

        let uid = metadata.uid();
        if !self.is_trusted_owner(uid, euid) {
            return AuditVerdict::Unsafe(format!(
                "{} is owned by untrusted uid {}",
                component.display(),
                uid
            ));
        }

        let mode = metadata.mode();
        let shared_write = mode & 0o022 != 0;
        let sticky = mode & 0o1000 != 0;
        if shared_write && (is_target || !sticky) {
            return AuditVerdict::Unsafe(format!(
                "{} is writable by group or others (mode {:o})",
                component.display(),
                mode & 0o7777
            ));
        }

        AuditVerdict::Safe
    }
}

impl DirectoryAuditor for OwnershipAuditor {
    #[cfg(unix)]
    fn audit(&self, dir: &Path) -> AuditVerdict {
        if !dir.is_absolute() {
            return AuditVerdict::Unsafe(format!("{} is not an absolute path", dir.display()));
        }

        let euid = nix::unistd::geteuid().as_raw();
        let chain: Vec<&Path> = dir.ancestors().collect();
        for component in chain.into_iter().rev() {
            let verdict = self.audit_component(component, component == dir, euid);
            if !verdict.is_safe() {
                return verdict;
            }
        }

        debug!("Directory chain of {} is secure", dir.display());
        AuditVerdict::Safe
    }

    #[cfg(not(unix))]
    fn audit(&self, dir: &Path) -> AuditVerdict {
        AuditVerdict::Unsafe(format!(
            "directory ownership of {} cannot be audited on this platform",
            dir.display()
        ))
    }
}
