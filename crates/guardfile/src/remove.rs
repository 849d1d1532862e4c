//! Delete a file by name, without holding a handle

use crate::attributes::FileUniqueId;
use crate::error::{FileError, Result};
use crate::open::{canonicalize_existing, classify_open_error, SecureOpener};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// What to do when the target cannot be probed because it is held open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenFilePolicy {
    /// Refuse with [`FileError::CannotRemoveFileStillOpen`]
    #[default]
    FailIfOpen,
    /// Unlink anyway. Only possible where the platform allows removing open
    /// files.
    ForceUnlink,
}

impl SecureOpener {
    /// Remove `name` after the same path and directory checks as an open.
    ///
    /// The file is probed with a read-only, non-following open. If the probe
    /// succeeds its identity must still match the path, and the file is
    /// unlinked after the probe is closed. If the probe is refused, `policy`
    /// decides.
    pub fn delete_by_name(&self, name: impl AsRef<Path>, policy: OpenFilePolicy) -> Result<()> {
        let name = name.as_ref();
        self.delete_checked(name, policy).map_err(|err| {
            debug!("Delete of {} failed: {}", name.display(), err);
            self.policy().on_contract_violation.enforce(err)
        })
    }

    fn delete_checked(&self, name: &Path, policy: OpenFilePolicy) -> Result<()> {
        let canonical = canonicalize_existing(name)?;
        if canonical.as_os_str().len() > self.policy().max_path_len {
            return Err(FileError::InvalidPath);
        }

        let metadata = fs::symlink_metadata(&canonical).map_err(|_| FileError::InvalidFile)?;
        if !metadata.is_file() {
            warn!("Refusing to delete {}: not a regular file", canonical.display());
            return Err(FileError::InvalidFile);
        }

        let parent = canonical.parent().ok_or(FileError::InvalidPath)?;
        self.audit_directory(parent)?;

        match probe(&canonical) {
            Ok(file) => {
                let probed = FileUniqueId::capture_file(&file).ok_or(FileError::InvalidFileUniqueId)?;
                drop(file);
                if FileUniqueId::capture_path(&canonical).as_ref() != Some(&probed) {
                    warn!("{} was replaced before it could be deleted", canonical.display());
                    return Err(FileError::InvalidFileUniqueId);
                }
            }
            Err(e) => match classify_open_error(&e) {
                FileError::Failure => {
                    debug!("Probe of {} refused: {}", canonical.display(), e);
                    force_allowed(policy)?;
                    warn!("Force-unlinking {} while it may be open", canonical.display());
                }
                err => return Err(err),
            },
        }

        fs::remove_file(&canonical).map_err(|e| {
            debug!("Failed to remove {}: {}", canonical.display(), e);
            FileError::Failure
        })?;
        debug!("Deleted {}", canonical.display());
        Ok(())
    }
}

fn probe(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC | libc::O_NONBLOCK);
    }
    options.open(path)
}

#[cfg(unix)]
fn force_allowed(policy: OpenFilePolicy) -> Result<()> {
    match policy {
        OpenFilePolicy::FailIfOpen => Err(FileError::CannotRemoveFileStillOpen),
        OpenFilePolicy::ForceUnlink => Ok(()),
    }
}

#[cfg(not(unix))]
fn force_allowed(_policy: OpenFilePolicy) -> Result<()> {
    Err(FileError::CannotRemoveFileStillOpen)
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::{AuditVerdict, FnAuditor};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn deletes_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.tmp");
        fs::write(&path, b"x").unwrap();

        SecureOpener::default()
            .delete_by_name(&path, OpenFilePolicy::FailIfOpen)
            .unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_invalid_file() {
        let dir = tempdir().unwrap();
        let result =
            SecureOpener::default().delete_by_name(dir.path().join("gone"), OpenFilePolicy::FailIfOpen);
        assert_eq!(result, Err(FileError::InvalidFile));
    }

    #[test]
    fn directory_is_not_deleted() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let result = SecureOpener::default().delete_by_name(&sub, OpenFilePolicy::ForceUnlink);
        assert_eq!(result, Err(FileError::InvalidFile));
        assert!(sub.is_dir());
    }

    #[test]
    fn insecure_directory_keeps_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, b"x").unwrap();

        let opener = SecureOpener::default()
            .with_auditor(FnAuditor(|_: &Path| AuditVerdict::Unsafe("shared".to_string())));
        let result = opener.delete_by_name(&path, OpenFilePolicy::ForceUnlink);
        assert_eq!(result, Err(FileError::InsecurePath));
        assert!(path.exists());
    }

    #[test]
    fn symlink_resolves_to_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        SecureOpener::default()
            .delete_by_name(&link, OpenFilePolicy::FailIfOpen)
            .unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn unreadable_file_follows_policy() {
        if nix::unistd::geteuid().is_root() {
            // root can always open for reading
            return;
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        let opener = SecureOpener::default();
        assert_eq!(
            opener.delete_by_name(&path, OpenFilePolicy::FailIfOpen),
            Err(FileError::CannotRemoveFileStillOpen)
        );
        assert!(path.exists());

        opener
            .delete_by_name(&path, OpenFilePolicy::ForceUnlink)
            .unwrap();
        assert!(!path.exists());
    }
}
