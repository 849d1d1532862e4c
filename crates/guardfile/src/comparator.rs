//! Platform identity comparison
//!
//! Decides whether a freshly captured [`FileAttributes`] snapshot describes
//! the same object, owned the same way, as an expected snapshot.

use crate::attributes::FileAttributes;
use serde::{Deserialize, Serialize};

/// How two attribute snapshots are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityComparator {
    /// Owner, group, device and inode must match
    Posix,
    /// Posix fields plus a byte-exact security descriptor
    SecurityDescriptor,
}

impl Default for IdentityComparator {
    #[cfg(unix)]
    fn default() -> Self {
        IdentityComparator::Posix
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        IdentityComparator::SecurityDescriptor
    }
}

impl IdentityComparator {
    /// True if `actual` satisfies `expected`
    #[must_use]
    pub fn matches(&self, expected: &FileAttributes, actual: &FileAttributes) -> bool {
        self.mismatches(expected, actual).is_empty()
    }

    /// Names of the fields that differ, in a stable order
    #[must_use]
    pub fn mismatches(&self, expected: &FileAttributes, actual: &FileAttributes) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if expected.owner != actual.owner {
            fields.push("owner");
        }
        if expected.group != actual.group {
            fields.push("group");
        }
        if expected.device != actual.device {
            fields.push("device");
        }
        if expected.inode != actual.inode {
            fields.push("inode");
        }
        if *self == IdentityComparator::SecurityDescriptor
            && expected.security_descriptor != actual.security_descriptor
        {
            fields.push("security_descriptor");
        }
        fields
    }
}

impl std::fmt::Display for IdentityComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityComparator::Posix => write!(f, "posix"),
            IdentityComparator::SecurityDescriptor => write!(f, "security-descriptor"),
        }
    }
}
