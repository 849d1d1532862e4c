//! Security posture configuration
//!
//! A [`SecurityPolicy`] is built once (in code or from a TOML file) and handed
//! to a [`SecureOpener`](crate::SecureOpener). There is no process-wide
//! default state: two openers with different policies can coexist.
//!
//! ```toml
//! directory_check = "enforce"
//! trusted_owners = [998]
//! comparator = "posix"
//! on_contract_violation = "report"
//! ```

use crate::comparator::IdentityComparator;
use crate::error::{ConfigError, FileError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, error};

/// Maximum canonical path length accepted by default
#[cfg(unix)]
pub const DEFAULT_MAX_PATH_LEN: usize = libc::PATH_MAX as usize;
#[cfg(not(unix))]
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Whether the directory chain of every opened path is audited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryCheck {
    /// Audit every directory from the root down (the only release option)
    #[default]
    Enforce,
    /// Skip the audit. Only exists in debug builds.
    #[cfg(debug_assertions)]
    Skip,
}

/// What happens when a caller violates the API contract
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractViolation {
    /// Return the error code
    #[default]
    Report,
    /// Panic with the error
    Abort,
}

impl ContractViolation {
    /// Pass `err` through, panicking first if it is a contract violation
    /// and this posture asks for that.
    pub(crate) fn enforce(self, err: FileError) -> FileError {
        if self == ContractViolation::Abort && err.is_contract_violation() {
            error!("Contract violation: {}", err);
            panic!("guardfile contract violation: {err}");
        }
        err
    }
}

/// Security posture applied by a [`SecureOpener`](crate::SecureOpener)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityPolicy {
    /// Directory chain audit
    pub directory_check: DirectoryCheck,
    /// Extra uids trusted to own directories, in addition to root and the
    /// effective uid
    pub trusted_owners: Vec<u32>,
    /// How expected attributes are compared with captured ones
    pub comparator: IdentityComparator,
    /// Reaction to API misuse
    pub on_contract_violation: ContractViolation,
    /// Longest canonical path accepted
    pub max_path_len: usize,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            directory_check: DirectoryCheck::default(),
            trusted_owners: Vec::new(),
            comparator: IdentityComparator::default(),
            on_contract_violation: ContractViolation::default(),
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

impl SecurityPolicy {
    /// Parse a policy from TOML. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let policy: SecurityPolicy = toml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let policy = Self::from_toml_str(&content)?;
        debug!("Loaded security policy from {}", path.display());
        Ok(policy)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_path_len == 0 || self.max_path_len > DEFAULT_MAX_PATH_LEN {
            return Err(ConfigError::Invalid {
                key: "max_path_len".to_string(),
                reason: format!("must be between 1 and {}", DEFAULT_MAX_PATH_LEN),
            });
        }
        Ok(())
    }

    /// Use a different attribute comparator
    #[must_use]
    pub fn with_comparator(mut self, comparator: IdentityComparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Trust an additional directory owner
    #[must_use]
    pub fn trust_owner(mut self, uid: u32) -> Self {
        self.trusted_owners.push(uid);
        self
    }

    /// Panic on contract violations instead of reporting them
    #[must_use]
    pub fn abort_on_contract_violation(mut self) -> Self {
        self.on_contract_violation = ContractViolation::Abort;
        self
    }

    /// Disable the directory audit. Debug builds only.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn skip_directory_check(mut self) -> Self {
        self.directory_check = DirectoryCheck::Skip;
        self
    }

    /// True if the directory audit runs
    #[must_use]
    pub fn audits_directories(&self) -> bool {
        match self.directory_check {
            DirectoryCheck::Enforce => true,
            #[cfg(debug_assertions)]
            DirectoryCheck::Skip => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let policy = SecurityPolicy::from_toml_str("").unwrap();
        assert_eq!(policy, SecurityPolicy::default());
        assert!(policy.audits_directories());
    }

    #[test]
    fn parses_all_keys() {
        let policy = SecurityPolicy::from_toml_str(
            r#"
            directory_check = "enforce"
            trusted_owners = [998, 999]
            comparator = "security-descriptor"
            on_contract_violation = "abort"
            max_path_len = 1024
            "#,
        )
        .unwrap();
        assert_eq!(policy.trusted_owners, vec![998, 999]);
        assert_eq!(policy.comparator, IdentityComparator::SecurityDescriptor);
        assert_eq!(policy.on_contract_violation, ContractViolation::Abort);
        assert_eq!(policy.max_path_len, 1024);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            SecurityPolicy::from_toml_str("follow_symlinks = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_zero_path_len() {
        assert!(matches!(
            SecurityPolicy::from_toml_str("max_path_len = 0"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn skip_is_available_in_debug_builds() {
        let policy = SecurityPolicy::from_toml_str(r#"directory_check = "skip""#).unwrap();
        assert!(!policy.audits_directories());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SecurityPolicy::load(&dir.path().join("policy.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn abort_posture_panics_on_contract_violation() {
        ContractViolation::Abort.enforce(FileError::InvalidParameter);
    }

    #[test]
    fn abort_posture_passes_other_errors() {
        assert_eq!(
            ContractViolation::Abort.enforce(FileError::EndOfFile),
            FileError::EndOfFile
        );
    }
}
