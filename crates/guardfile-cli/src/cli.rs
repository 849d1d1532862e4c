//! CLI argument definitions for guardfile
//!
//! Uses clap for argument parsing. This module defines all subcommands
//! and their options.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// guardfile - open, write and delete files without trusting the path
///
/// Every command audits the directory chain of its target and verifies the
/// identity of the file it opens before touching any data.
#[derive(Parser, Debug)]
#[command(name = "guardfile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Security policy file (TOML)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log every protocol step to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a file to stdout
    #[command(after_help = "EXAMPLES:
    # Print a log file
    guardfile cat /var/lib/app/audit.log

    # Only accept .log or .txt files, in any case
    guardfile cat --ext log --ext txt --ignore-case ./notes.TXT

    # Refuse unless the file still matches an earlier snapshot
    guardfile stat --json ./key.pem > key.json
    guardfile cat --expect key.json ./key.pem
")]
    Cat(CatArgs),

    /// Copy stdin into a file
    #[command(after_help = "EXAMPLES:
    # Replace a file's contents
    echo hello | guardfile write ./greeting.txt

    # Create a new file, failing if it already exists
    guardfile write --exclusive ./fresh.dat < payload.bin

    # Append to a file
    date | guardfile write --append ./times.log
")]
    Write(WriteArgs),

    /// Delete a file
    #[command(after_help = "EXAMPLES:
    # Delete a file
    guardfile rm ./scratch.tmp

    # Delete even if the file cannot be probed (may still be open)
    guardfile rm --force-open ./locked.tmp
")]
    Rm(RmArgs),

    /// Show the attributes and identity of a file
    #[command(after_help = "EXAMPLES:
    # Human-readable summary
    guardfile stat ./key.pem

    # Snapshot usable with `cat --expect`
    guardfile stat --json ./key.pem
")]
    Stat(StatArgs),

    /// Check whether a directory chain is safe to open files in
    #[command(after_help = "EXAMPLES:
    # Audit the current directory
    guardfile audit .

    # Audit with extra trusted owners from a policy file
    guardfile --config policy.toml audit /srv/data
")]
    Audit(AuditArgs),
}

#[derive(Args, Debug)]
pub struct CatArgs {
    /// File to print
    pub path: PathBuf,

    /// Allowed extension (repeatable); any extension if omitted
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Compare extensions case-insensitively
    #[arg(long, requires = "extensions")]
    pub ignore_case: bool,

    /// JSON attribute snapshot the file must match (see `stat --json`)
    #[arg(long, value_name = "FILE")]
    pub expect: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// File to write
    pub path: PathBuf,

    /// Append instead of truncating
    #[arg(long, short = 'a', conflicts_with = "exclusive")]
    pub append: bool,

    /// Fail if the file already exists
    #[arg(long, short = 'x')]
    pub exclusive: bool,
}

impl WriteArgs {
    /// Open mode string for these flags
    pub fn mode(&self) -> &'static str {
        if self.append {
            "a"
        } else if self.exclusive {
            "wx"
        } else {
            "w"
        }
    }
}

#[derive(Args, Debug)]
pub struct RmArgs {
    /// File to delete
    pub path: PathBuf,

    /// Unlink even when the file cannot be probed for reading
    #[arg(long)]
    pub force_open: bool,
}

#[derive(Args, Debug)]
pub struct StatArgs {
    /// File to inspect
    pub path: PathBuf,

    /// Print the attribute snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Directory to audit
    pub dir: PathBuf,
}
