//! File extension allow-lists

use std::path::Path;

/// A single allowed extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRule {
    /// Extension without the leading dot
    pattern: String,
    case_sensitive: bool,
}

impl ExtensionRule {
    /// Create a rule. A leading `.` in `pattern` is ignored.
    #[must_use]
    pub fn new(pattern: impl AsRef<str>, case_sensitive: bool) -> Self {
        let pattern = pattern.as_ref();
        Self {
            pattern: pattern.strip_prefix('.').unwrap_or(pattern).to_string(),
            case_sensitive,
        }
    }

    /// Case-sensitive rule
    #[must_use]
    pub fn exact(pattern: impl AsRef<str>) -> Self {
        Self::new(pattern, true)
    }

    /// Case-insensitive rule
    #[must_use]
    pub fn ignore_case(pattern: impl AsRef<str>) -> Self {
        Self::new(pattern, false)
    }

    /// Extension this rule accepts, without the dot
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Check a bare extension (no dot) against this rule
    #[must_use]
    pub fn matches(&self, extension: &str) -> bool {
        if self.case_sensitive {
            self.pattern == extension
        } else {
            self.pattern.eq_ignore_ascii_case(extension)
        }
    }
}

/// Ordered list of allowed extensions, evaluated first-match-wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionAllowList {
    rules: Vec<ExtensionRule>,
}

impl ExtensionAllowList {
    #[must_use]
    pub fn new(rules: Vec<ExtensionRule>) -> Self {
        Self { rules }
    }

    /// Append a rule (builder style)
    #[must_use]
    pub fn allow(mut self, rule: ExtensionRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[ExtensionRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching the extension of `path`.
    ///
    /// Paths without an extension, or whose extension is not valid UTF-8,
    /// never match.
    #[must_use]
    pub fn first_match(&self, path: &Path) -> Option<&ExtensionRule> {
        let extension = path.extension()?.to_str()?;
        self.rules.iter().find(|rule| rule.matches(extension))
    }

    /// True if `path` carries an allowed extension
    #[must_use]
    pub fn permits(&self, path: &Path) -> bool {
        self.first_match(path).is_some()
    }
}

impl FromIterator<ExtensionRule> for ExtensionAllowList {
    fn from_iter<I: IntoIterator<Item = ExtensionRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
