//! Open mode interpretation
//!
//! Modes are written the way `fopen` spells them (`"r"`, `"w+"`, `"wx"`, ...)
//! and decoded into an [`OpenMode`] before any path is touched.

use crate::error::FileError;
use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;

/// Base access family of an open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFamily {
    /// `r`: open an existing file
    Read,
    /// `w`: create or truncate
    Write,
    /// `a`: create or append
    Append,
}

/// Decoded open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    family: ModeFamily,
    update: bool,
    exclusive: bool,
}

impl OpenMode {
    /// Read-only access to an existing file (`"r"`)
    pub const READ: OpenMode = OpenMode {
        family: ModeFamily::Read,
        update: false,
        exclusive: false,
    };

    /// Create or truncate for writing (`"w"`)
    pub const WRITE: OpenMode = OpenMode {
        family: ModeFamily::Write,
        update: false,
        exclusive: false,
    };

    /// Create a new file, failing if it exists (`"wx"`)
    pub const CREATE_NEW: OpenMode = OpenMode {
        family: ModeFamily::Write,
        update: false,
        exclusive: true,
    };

    /// Create or append (`"a"`)
    pub const APPEND: OpenMode = OpenMode {
        family: ModeFamily::Append,
        update: false,
        exclusive: false,
    };

    /// Parse an fopen-style mode string.
    ///
    /// `b` is accepted and ignored. `x` is only valid together with `w`.
    pub fn parse(mode: &str) -> Result<Self, FileError> {
        let mut chars = mode.chars();
        let family = match chars.next() {
            Some('r') => ModeFamily::Read,
            Some('w') => ModeFamily::Write,
            Some('a') => ModeFamily::Append,
            _ => return Err(FileError::InvalidMode),
        };

        let mut update = false;
        let mut exclusive = false;
        let mut binary = false;
        for c in chars {
            let seen = match c {
                '+' => std::mem::replace(&mut update, true),
                'x' => std::mem::replace(&mut exclusive, true),
                'b' => std::mem::replace(&mut binary, true),
                _ => return Err(FileError::InvalidMode),
            };
            if seen {
                return Err(FileError::InvalidMode);
            }
        }

        if exclusive && family != ModeFamily::Write {
            return Err(FileError::InvalidMode);
        }

        Ok(Self {
            family,
            update,
            exclusive,
        })
    }

    /// Access family
    #[must_use]
    pub fn family(&self) -> ModeFamily {
        self.family
    }

    /// True if the mode may create the file (write or append families)
    #[must_use]
    pub fn creates(&self) -> bool {
        matches!(self.family, ModeFamily::Write | ModeFamily::Append)
    }

    /// True if creation must fail when the target exists
    #[must_use]
    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    /// True if the opened stream is readable
    #[must_use]
    pub fn readable(&self) -> bool {
        self.family == ModeFamily::Read || self.update
    }

    /// True if the opened stream is writable
    #[must_use]
    pub fn writable(&self) -> bool {
        self.family != ModeFamily::Read || self.update
    }

    /// True if existing content must be discarded once the file is verified
    #[must_use]
    pub fn truncates(&self) -> bool {
        self.family == ModeFamily::Write && !self.exclusive
    }

    /// Build the `OpenOptions` for this mode.
    ///
    /// Never truncates. The caller truncates once the opened descriptor has
    /// passed identity verification.
    pub(crate) fn to_open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(self.readable());
        match self.family {
            ModeFamily::Read => {
                options.write(self.update);
            }
            ModeFamily::Write => {
                options.write(true);
                if self.exclusive {
                    options.create_new(true);
                } else {
                    options.create(true).truncate(false);
                }
            }
            ModeFamily::Append => {
                options.append(true).create(true);
            }
        }
        options
    }
}

impl FromStr for OpenMode {
    type Err = FileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.family {
            ModeFamily::Read => "r",
            ModeFamily::Write => "w",
            ModeFamily::Append => "a",
        };
        write!(f, "{base}")?;
        if self.update {
            write!(f, "+")?;
        }
        if self.exclusive {
            write!(f, "x")?;
        }
        Ok(())
    }
}
