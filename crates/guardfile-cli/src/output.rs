//! CLI output styling for guardfile

use colored::Colorize;
use guardfile::{AuditVerdict, FileAttributes, SecureFile};
use std::path::Path;

/// Render permission bits the way `ls -l` does
pub fn permission_string(mode: u32) -> String {
    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    let mut out: Vec<char> = BITS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect();

    if mode & 0o4000 != 0 {
        out[2] = if out[2] == 'x' { 's' } else { 'S' };
    }
    if mode & 0o2000 != 0 {
        out[5] = if out[5] == 'x' { 's' } else { 'S' };
    }
    if mode & 0o1000 != 0 {
        out[8] = if out[8] == 'x' { 't' } else { 'T' };
    }
    out.into_iter().collect()
}

/// Print a human-readable summary of an open file
pub fn print_stat(file: &SecureFile, attributes: &FileAttributes) {
    let perms = permission_string(attributes.mode);
    let perms = if attributes.mode & 0o022 != 0 {
        perms.yellow()
    } else {
        perms.green()
    };

    println!("{}", file.path().display().to_string().white().bold());
    println!("  size:     {}", attributes.size);
    println!("  mode:     {} ({:o})", perms, attributes.mode & 0o7777);
    println!("  owner:    uid {} gid {}", attributes.owner, attributes.group);
    println!("  device:   {}", attributes.device);
    println!("  inode:    {}", attributes.inode);
}

/// Print the outcome of a directory audit
pub fn print_verdict(dir: &Path, verdict: &AuditVerdict) {
    match verdict {
        AuditVerdict::Safe => {
            println!("{} {}", "safe".green().bold(), dir.display());
        }
        AuditVerdict::Unsafe(reason) => {
            println!("{} {}", "unsafe".red().bold(), dir.display());
            println!("  {}", reason);
        }
    }
}

/// Confirm a deletion on stderr
pub fn print_removed(path: &Path, verbose: bool) {
    if verbose {
        eprintln!("{} {}", "removed".green(), path.display());
    }
}
