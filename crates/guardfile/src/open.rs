//! Secure open protocol
//!
//! Opening a file runs through a fixed sequence of checks. Everything that
//! can be decided from the path alone is decided before a descriptor exists;
//! everything that depends on which object was actually opened is checked
//! against the live descriptor afterwards:
//!
//! 1. decode the mode
//! 2. canonicalize the path (the parent directory when creating)
//! 3. existence / exclusivity probe
//! 4. extension allow-list (existing files)
//! 5. expected attributes against the path (existing files)
//! 6. directory chain audit
//! 7. open with `O_NOFOLLOW`
//! 8. identity and attributes of the open descriptor
//! 9. mark the handle valid
//!
//! Any failure from step 7 on drops the `File`, which closes the descriptor
//! before the handle is returned. A file the attempt itself created is
//! unlinked again, as long as the path still names it.

use crate::attributes::{FileAttributes, FileUniqueId};
use crate::audit::{AuditVerdict, DirectoryAuditor, OwnershipAuditor};
use crate::error::{FileError, Result};
use crate::extension::ExtensionAllowList;
use crate::handle::SecureFile;
use crate::mode::OpenMode;
use crate::policy::SecurityPolicy;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Parameters of a single open attempt
#[derive(Debug, Clone)]
pub struct OpenRequest {
    name: PathBuf,
    mode: std::result::Result<OpenMode, FileError>,
    extensions: Option<ExtensionAllowList>,
    expected_attributes: Option<FileAttributes>,
    expected_id: Option<FileUniqueId>,
}

impl OpenRequest {
    /// Request to open `name` with an fopen-style `mode`.
    ///
    /// An unparseable mode is not an error here; the open attempt reports it
    /// as [`FileError::InvalidMode`] on the returned handle.
    #[must_use]
    pub fn new(name: impl AsRef<Path>, mode: &str) -> Self {
        Self::with_mode_result(name, OpenMode::parse(mode))
    }

    /// Request with an already decoded mode
    #[must_use]
    pub fn with_mode(name: impl AsRef<Path>, mode: OpenMode) -> Self {
        Self::with_mode_result(name, Ok(mode))
    }

    fn with_mode_result(
        name: impl AsRef<Path>,
        mode: std::result::Result<OpenMode, FileError>,
    ) -> Self {
        Self {
            name: name.as_ref().to_path_buf(),
            mode,
            extensions: None,
            expected_attributes: None,
            expected_id: None,
        }
    }

    /// Only allow existing files whose extension is on `list`
    #[must_use]
    pub fn extensions(mut self, list: ExtensionAllowList) -> Self {
        self.extensions = Some(list);
        self
    }

    /// Require the file to match a previously captured snapshot
    #[must_use]
    pub fn expect_attributes(mut self, attributes: FileAttributes) -> Self {
        self.expected_attributes = Some(attributes);
        self
    }

    /// Require the opened object to be exactly `id`
    #[must_use]
    pub fn expect_unique_id(mut self, id: FileUniqueId) -> Self {
        self.expected_id = Some(id);
        self
    }

    /// Path as given by the caller
    #[must_use]
    pub fn name(&self) -> &Path {
        &self.name
    }
}

/// Opens and deletes files under a [`SecurityPolicy`]
pub struct SecureOpener {
    policy: SecurityPolicy,
    auditor: Box<dyn DirectoryAuditor>,
}

impl SecureOpener {
    /// Opener using the default ownership-based directory auditor
    #[must_use]
    pub fn new(policy: SecurityPolicy) -> Self {
        let auditor = OwnershipAuditor::new(policy.trusted_owners.clone());
        Self {
            policy,
            auditor: Box::new(auditor),
        }
    }

    /// Replace the directory auditor
    #[must_use]
    pub fn with_auditor(mut self, auditor: impl DirectoryAuditor + 'static) -> Self {
        self.auditor = Box::new(auditor);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Run the open protocol.
    ///
    /// Always returns a handle. Check [`SecureFile::is_valid`] or
    /// [`SecureFile::last_error`], or call [`SecureFile::into_result`].
    pub fn open(&self, request: &OpenRequest) -> SecureFile {
        let mut handle =
            SecureFile::unopened(request.name.clone(), self.policy.on_contract_violation);
        if let Err(err) = self.run_protocol(request, &mut handle) {
            debug!("Open of {} failed: {}", request.name.display(), err);
            handle.fail(err);
        }
        handle
    }

    fn run_protocol(&self, request: &OpenRequest, handle: &mut SecureFile) -> Result<()> {
        let mode = request.mode?;
        let creating = mode.creates();

        let canonical = if creating {
            canonicalize_for_create(&request.name)?
        } else {
            canonicalize_existing(&request.name)?
        };
        self.check_path_len(&canonical)?;
        handle.set_path(canonical.clone());
        debug!("Opening {} with mode {}", canonical.display(), mode);

        // Whether a successful open brings a new file into existence
        let fresh = match fs::symlink_metadata(&canonical) {
            Ok(metadata) => {
                if mode.exclusive() {
                    return Err(FileError::FileAlreadyExists);
                }
                if !metadata.is_file() {
                    warn!("{} is not a regular file", canonical.display());
                    return Err(FileError::InvalidFile);
                }
                false
            }
            Err(_) if !creating => return Err(FileError::InvalidFile),
            Err(_) => true,
        };

        if !creating {
            if let Some(list) = &request.extensions {
                if !list.permits(&canonical) {
                    warn!("Extension of {} is not allowed", canonical.display());
                    return Err(FileError::InvalidFileExtension);
                }
            }
            if let Some(expected) = &request.expected_attributes {
                let current = FileAttributes::capture_path(&canonical)
                    .ok_or(FileError::InvalidFileAttributes)?;
                self.verify_attributes(expected, &current, &canonical)?;
            }
        }

        let parent = canonical.parent().ok_or(FileError::InvalidPath)?;
        self.audit_directory(parent)?;

        let file = open_no_follow(&canonical, mode)?;
        let verified = self
            .verify_descriptor(&file, &canonical, request)
            .and_then(|verified| {
                if mode.truncates() {
                    file.set_len(0).map_err(|e| {
                        debug!("Failed to truncate {}: {}", canonical.display(), e);
                        FileError::ReadWriteError
                    })?;
                }
                Ok(verified)
            });
        let (attributes, unique_id) = match verified {
            Ok(verified) => verified,
            Err(err) => {
                if fresh {
                    discard_created(&file, &canonical);
                }
                return Err(err);
            }
        };

        handle.activate(file, attributes, unique_id);
        debug!("Opened {}", canonical.display());
        Ok(())
    }

    fn check_path_len(&self, path: &Path) -> Result<()> {
        if path.as_os_str().len() > self.policy.max_path_len {
            warn!(
                "Canonical path exceeds {} bytes: {}",
                self.policy.max_path_len,
                path.display()
            );
            return Err(FileError::InvalidPath);
        }
        Ok(())
    }

    /// Audit the chain leading to `dir` unless the policy disables it
    pub(crate) fn audit_directory(&self, dir: &Path) -> Result<()> {
        if !self.policy.audits_directories() {
            warn!("Directory security check disabled; not auditing {}", dir.display());
            return Ok(());
        }
        match self.auditor.audit(dir) {
            AuditVerdict::Safe => Ok(()),
            AuditVerdict::Unsafe(reason) => {
                warn!("Insecure directory chain for {}: {}", dir.display(), reason);
                Err(FileError::InsecurePath)
            }
        }
    }

    fn verify_attributes(
        &self,
        expected: &FileAttributes,
        actual: &FileAttributes,
        path: &Path,
    ) -> Result<()> {
        let mismatched = self.policy.comparator.mismatches(expected, actual);
        if mismatched.is_empty() {
            return Ok(());
        }
        warn!(
            "Attributes of {} differ from expected: {}",
            path.display(),
            mismatched.join(", ")
        );
        Err(FileError::InvalidFileAttributes)
    }

    /// Check what was actually opened
    fn verify_descriptor(
        &self,
        file: &File,
        canonical: &Path,
        request: &OpenRequest,
    ) -> Result<(FileAttributes, FileUniqueId)> {
        let attributes =
            FileAttributes::capture_file(file).ok_or(FileError::InvalidFileAttributes)?;
        let unique_id = FileUniqueId::capture_file(file).ok_or(FileError::InvalidFileUniqueId)?;

        if !attributes.is_regular_file() {
            warn!("Opened object at {} is not a regular file", canonical.display());
            return Err(FileError::InvalidFile);
        }

        if let Some(expected) = &request.expected_id {
            if *expected != unique_id {
                warn!("Unique id of {} does not match", canonical.display());
                return Err(FileError::InvalidFileUniqueId);
            }
        }

        if let Some(expected) = &request.expected_attributes {
            self.verify_attributes(expected, &attributes, canonical)?;
        }

        // The path must still lead to the object we hold
        if FileUniqueId::capture_path(canonical).as_ref() != Some(&unique_id) {
            warn!("{} was replaced while being opened", canonical.display());
            return Err(FileError::InvalidFileUniqueId);
        }

        Ok((attributes, unique_id))
    }
}

impl Default for SecureOpener {
    fn default() -> Self {
        Self::new(SecurityPolicy::default())
    }
}

impl fmt::Debug for SecureOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureOpener")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Resolve the directory part of `name` and re-attach the file name.
///
/// A bare file name resolves against the current working directory.
pub(crate) fn canonicalize_for_create(name: &Path) -> Result<PathBuf> {
    let file_name = name.file_name().ok_or(FileError::InvalidPath)?;
    let dir = match name.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().map_err(|_| FileError::InvalidPath)?,
    };
    let dir = fs::canonicalize(&dir).map_err(|e| {
        debug!("Cannot resolve {}: {}", dir.display(), e);
        FileError::InvalidPath
    })?;
    Ok(dir.join(file_name))
}

/// Resolve the full path of an existing file.
///
/// A missing file inside a resolvable directory is `InvalidFile`; anything
/// else that prevents resolution is `InvalidPath`.
pub(crate) fn canonicalize_existing(name: &Path) -> Result<PathBuf> {
    match fs::canonicalize(name) {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if canonicalize_for_create(name).is_ok() {
                Err(FileError::InvalidFile)
            } else {
                Err(FileError::InvalidPath)
            }
        }
        Err(e) => {
            debug!("Cannot resolve {}: {}", name.display(), e);
            Err(FileError::InvalidPath)
        }
    }
}

/// Unlink a file this open created but then rejected.
///
/// Only removes `path` while it still names the object behind `file`.
fn discard_created(file: &File, path: &Path) {
    let held = FileUniqueId::capture_file(file);
    if held.is_none() || FileUniqueId::capture_path(path) != held {
        warn!("Leaving {}: it no longer names the file that was created", path.display());
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed rejected new file {}", path.display()),
        Err(e) => warn!("Failed to remove rejected new file {}: {}", path.display(), e),
    }
}

fn open_no_follow(path: &Path, mode: OpenMode) -> Result<File> {
    let mut options = mode.to_open_options();
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC);
        options.mode(0o600);
    }
    options.open(path).map_err(|e| {
        debug!("open({}) failed: {}", path.display(), e);
        classify_open_error(&e)
    })
}

pub(crate) fn classify_open_error(e: &io::Error) -> FileError {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ELOOP) {
        // O_NOFOLLOW hit a symlink that appeared after canonicalization
        return FileError::InsecurePath;
    }
    match e.kind() {
        io::ErrorKind::AlreadyExists => FileError::FileAlreadyExists,
        io::ErrorKind::NotFound => FileError::InvalidFile,
        _ => FileError::Failure,
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::FnAuditor;
    use crate::comparator::IdentityComparator;
    use crate::extension::ExtensionRule;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{tempdir, TempDir};

    fn workspace() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        (dir, base)
    }

    #[test]
    fn opens_existing_file_for_reading() {
        let (_dir, base) = workspace();
        let path = base.join("data.bin");
        fs::write(&path, b"payload").unwrap();

        let handle = SecureOpener::default().open(&OpenRequest::new(&path, "r"));
        assert!(handle.is_valid(), "{:?}", handle.last_error());
        assert_eq!(handle.path(), path);
        assert_eq!(handle.size(), 7);
        assert_eq!(handle.file_name().unwrap(), "data.bin");
        assert!(handle.descriptor().is_some());
    }

    #[test]
    fn relative_path_is_canonicalized() {
        let (_dir, base) = workspace();
        fs::create_dir(base.join("sub")).unwrap();
        fs::write(base.join("a.txt"), b"x").unwrap();

        let twisted = base.join("sub").join("..").join("a.txt");
        let handle = SecureOpener::default().open(&OpenRequest::new(&twisted, "r"));
        assert_eq!(handle.path(), base.join("a.txt"));
    }

    #[test]
    fn invalid_mode_is_reported_on_handle() {
        let (_dir, base) = workspace();
        let handle = SecureOpener::default().open(&OpenRequest::new(base.join("a"), "rx"));
        assert_eq!(handle.last_error(), Some(FileError::InvalidMode));
        assert!(!handle.is_valid());
    }

    #[test]
    fn missing_directory_is_invalid_path() {
        let (_dir, base) = workspace();
        let handle =
            SecureOpener::default().open(&OpenRequest::new(base.join("nope/a.txt"), "w"));
        assert_eq!(handle.last_error(), Some(FileError::InvalidPath));

        let handle =
            SecureOpener::default().open(&OpenRequest::new(base.join("nope/a.txt"), "r"));
        assert_eq!(handle.last_error(), Some(FileError::InvalidPath));
    }

    #[test]
    fn dot_dot_file_name_is_invalid_path() {
        let (_dir, base) = workspace();
        let handle = SecureOpener::default().open(&OpenRequest::new(base.join(".."), "w"));
        assert_eq!(handle.last_error(), Some(FileError::InvalidPath));
    }

    #[test]
    fn create_writes_private_file() {
        let (_dir, base) = workspace();
        let path = base.join("new.log");

        let mut handle = SecureOpener::default().open(&OpenRequest::new(&path, "wx"));
        assert!(handle.is_valid(), "{:?}", handle.last_error());
        handle.write_bytes(b"hello").unwrap();
        handle.close().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn write_mode_truncates_only_after_verification() {
        let (_dir, base) = workspace();
        let path = base.join("a.txt");
        fs::write(&path, b"old content").unwrap();

        let decoy = base.join("decoy");
        fs::write(&decoy, b"x").unwrap();
        let wrong_id = FileUniqueId::capture_path(&decoy).unwrap();

        let handle = SecureOpener::default()
            .open(&OpenRequest::new(&path, "w").expect_unique_id(wrong_id));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFileUniqueId));
        assert_eq!(fs::read(&path).unwrap(), b"old content");

        let handle = SecureOpener::default().open(&OpenRequest::new(&path, "w"));
        assert!(handle.is_valid());
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn symlink_target_is_not_followed_on_create() {
        let (_dir, base) = workspace();
        let secret = base.join("secret");
        fs::write(&secret, b"keep").unwrap();
        std::os::unix::fs::symlink(&secret, base.join("out.log")).unwrap();

        let handle = SecureOpener::default().open(&OpenRequest::new(base.join("out.log"), "w"));
        assert!(!handle.is_valid());
        assert_eq!(fs::read(&secret).unwrap(), b"keep");
    }

    #[test]
    fn rejected_exclusive_create_leaves_no_file() {
        let (_dir, base) = workspace();
        let decoy = base.join("decoy");
        fs::write(&decoy, b"x").unwrap();
        let wrong_id = FileUniqueId::capture_path(&decoy).unwrap();
        let path = base.join("new.dat");

        let handle = SecureOpener::default()
            .open(&OpenRequest::new(&path, "wx").expect_unique_id(wrong_id));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFileUniqueId));
        assert!(!path.exists());

        let retry = SecureOpener::default().open(&OpenRequest::new(&path, "wx"));
        assert!(retry.is_valid(), "{:?}", retry.last_error());
    }

    #[test]
    fn created_file_failing_attribute_check_is_removed() {
        let (_dir, base) = workspace();
        let other = base.join("other");
        fs::write(&other, b"x").unwrap();
        let snapshot = FileAttributes::capture_path(&other).unwrap();
        let path = base.join("fresh.log");

        let handle = SecureOpener::default()
            .open(&OpenRequest::new(&path, "w").expect_attributes(snapshot));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFileAttributes));
        assert!(handle.descriptor().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn existing_file_failing_attribute_check_is_kept() {
        let (_dir, base) = workspace();
        let other = base.join("other");
        fs::write(&other, b"x").unwrap();
        let snapshot = FileAttributes::capture_path(&other).unwrap();
        let path = base.join("kept.log");
        fs::write(&path, b"contents").unwrap();

        let handle = SecureOpener::default()
            .open(&OpenRequest::new(&path, "w").expect_attributes(snapshot));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFileAttributes));
        assert_eq!(fs::read(&path).unwrap(), b"contents");
    }

    #[test]
    fn symlink_swapped_in_after_checks_is_insecure() {
        let (_dir, base) = workspace();
        let path = base.join("a.txt");
        let secret = base.join("secret");
        fs::write(&path, b"x").unwrap();
        fs::write(&secret, b"keep").unwrap();

        let (swap_path, swap_target) = (path.clone(), secret.clone());
        let opener = SecureOpener::default().with_auditor(FnAuditor(move |_: &Path| {
            // Replace the checked file with a link while the chain is audited
            if !fs::symlink_metadata(&swap_path).unwrap().file_type().is_symlink() {
                fs::remove_file(&swap_path).unwrap();
                std::os::unix::fs::symlink(&swap_target, &swap_path).unwrap();
            }
            AuditVerdict::Safe
        }));

        let handle = opener.open(&OpenRequest::new(&path, "r+"));
        assert_eq!(handle.last_error(), Some(FileError::InsecurePath));
        assert_eq!(fs::read(&secret).unwrap(), b"keep");
    }

    #[test]
    fn directory_is_not_a_file() {
        let (_dir, base) = workspace();
        fs::create_dir(base.join("d")).unwrap();
        let handle = SecureOpener::default().open(&OpenRequest::new(base.join("d"), "r"));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFile));
    }

    #[test]
    fn extension_is_checked_for_existing_files() {
        let (_dir, base) = workspace();
        fs::write(base.join("a.LOG"), b"x").unwrap();
        let list = ExtensionAllowList::default().allow(ExtensionRule::ignore_case("log"));

        let handle = SecureOpener::default()
            .open(&OpenRequest::new(base.join("a.LOG"), "r").extensions(list.clone()));
        assert!(handle.is_valid());

        let strict = ExtensionAllowList::default().allow(ExtensionRule::exact("log"));
        let handle = SecureOpener::default()
            .open(&OpenRequest::new(base.join("a.LOG"), "r").extensions(strict));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFileExtension));
    }

    #[test]
    fn matching_expected_attributes_open() {
        let (_dir, base) = workspace();
        let path = base.join("a");
        fs::write(&path, b"x").unwrap();
        let snapshot = FileAttributes::capture_path(&path).unwrap();

        let handle = SecureOpener::default()
            .open(&OpenRequest::new(&path, "r").expect_attributes(snapshot));
        assert!(handle.is_valid());
    }

    #[test]
    fn permission_change_detected_by_descriptor_comparator() {
        let (_dir, base) = workspace();
        let path = base.join("a");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        let snapshot = FileAttributes::capture_path(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let posix = SecureOpener::default()
            .open(&OpenRequest::new(&path, "r").expect_attributes(snapshot.clone()));
        assert!(posix.is_valid());

        let strict = SecureOpener::new(
            SecurityPolicy::default().with_comparator(IdentityComparator::SecurityDescriptor),
        );
        let handle = strict.open(&OpenRequest::new(&path, "r").expect_attributes(snapshot));
        assert_eq!(handle.last_error(), Some(FileError::InvalidFileAttributes));
    }

    #[test]
    fn auditor_sees_parent_directory() {
        let (_dir, base) = workspace();
        let path = base.join("a");
        fs::write(&path, b"x").unwrap();

        let expected = base.clone();
        let opener = SecureOpener::default().with_auditor(FnAuditor(move |dir: &Path| {
            if dir == expected {
                AuditVerdict::Safe
            } else {
                AuditVerdict::Unsafe(format!("unexpected {}", dir.display()))
            }
        }));
        assert!(opener.open(&OpenRequest::new(&path, "r")).is_valid());
    }

    #[test]
    fn overlong_path_is_invalid() {
        let (_dir, base) = workspace();
        let path = base.join("a");
        fs::write(&path, b"x").unwrap();

        let mut policy = SecurityPolicy::default();
        policy.max_path_len = 4;
        let handle = SecureOpener::new(policy).open(&OpenRequest::new(&path, "r"));
        assert_eq!(handle.last_error(), Some(FileError::InvalidPath));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn debug_builds_may_skip_audit() {
        let (_dir, base) = workspace();
        let path = base.join("a");
        fs::write(&path, b"x").unwrap();

        let opener = SecureOpener::new(SecurityPolicy::default().skip_directory_check())
            .with_auditor(FnAuditor(|_: &Path| AuditVerdict::Unsafe("never".to_string())));
        assert!(opener.open(&OpenRequest::new(&path, "r")).is_valid());
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn abort_policy_panics_on_invalid_mode() {
        let (_dir, base) = workspace();
        let opener = SecureOpener::new(SecurityPolicy::default().abort_on_contract_violation());
        let _ = opener.open(&OpenRequest::new(base.join("a"), "bogus"));
    }
}
