//! guardfile CLI - TOCTOU-checked file access from the shell
//!
//! This is the CLI binary that uses the guardfile library for every file it
//! touches.

mod cli;
mod error;
mod output;

use clap::Parser;
use cli::{AuditArgs, CatArgs, Cli, Commands, RmArgs, StatArgs, WriteArgs};
use colored::Colorize;
use error::{CliError, Result};
use guardfile::{
    DirectoryAuditor, ExtensionAllowList, ExtensionRule, FileAttributes, FileError,
    OpenFilePolicy, OpenRequest, OwnershipAuditor, SecureFile, SecureOpener, SecurityPolicy,
};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("{} {}", "guardfile:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let policy = match &cli.config {
        Some(path) => SecurityPolicy::load(path)?,
        None => SecurityPolicy::default(),
    };
    debug!("Using policy {:?}", policy);

    match cli.command {
        Commands::Cat(args) => run_cat(args, policy),
        Commands::Write(args) => run_write(args, policy),
        Commands::Rm(args) => run_rm(args, policy, cli.verbose),
        Commands::Stat(args) => run_stat(args, policy),
        Commands::Audit(args) => run_audit(args, policy),
    }
}

/// Open `request` or fail with the handle's error
fn open(opener: &SecureOpener, request: &OpenRequest) -> Result<SecureFile> {
    opener
        .open(request)
        .into_result()
        .map_err(|e| CliError::file(request.name(), e))
}

/// Map a stream error from `io::copy` back to the handle's error code
fn copy_error(file: &SecureFile, e: io::Error) -> CliError {
    match file.last_error() {
        Some(err) => CliError::file(file.path(), err),
        None => CliError::Io(e),
    }
}

fn run_cat(args: CatArgs, policy: SecurityPolicy) -> Result<()> {
    let mut request = OpenRequest::new(&args.path, "r");

    if !args.extensions.is_empty() {
        let list: ExtensionAllowList = args
            .extensions
            .iter()
            .map(|ext| ExtensionRule::new(ext, !args.ignore_case))
            .collect();
        request = request.extensions(list);
    }

    if let Some(snapshot) = &args.expect {
        request = request.expect_attributes(load_snapshot(snapshot)?);
    }

    let opener = SecureOpener::new(policy);
    let mut file = open(&opener, &request)?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut file, &mut stdout).map_err(|e| copy_error(&file, e))?;
    file.close().map_err(|e| CliError::file(file.path(), e))
}

fn load_snapshot(path: &Path) -> Result<FileAttributes> {
    let content = fs::read_to_string(path).map_err(|e| CliError::SnapshotRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| CliError::SnapshotParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn run_write(args: WriteArgs, policy: SecurityPolicy) -> Result<()> {
    let opener = SecureOpener::new(policy);
    let mut file = open(&opener, &OpenRequest::new(&args.path, args.mode()))?;
    let mut stdin = io::stdin().lock();
    io::copy(&mut stdin, &mut file).map_err(|e| copy_error(&file, e))?;
    file.flush().map_err(|e| CliError::file(file.path(), e))?;
    file.close().map_err(|e| CliError::file(file.path(), e))
}

fn run_rm(args: RmArgs, policy: SecurityPolicy, verbose: bool) -> Result<()> {
    let open_policy = if args.force_open {
        OpenFilePolicy::ForceUnlink
    } else {
        OpenFilePolicy::FailIfOpen
    };
    SecureOpener::new(policy)
        .delete_by_name(&args.path, open_policy)
        .map_err(|e| CliError::file(&args.path, e))?;
    output::print_removed(&args.path, verbose);
    Ok(())
}

fn run_stat(args: StatArgs, policy: SecurityPolicy) -> Result<()> {
    let opener = SecureOpener::new(policy);
    let mut file = open(&opener, &OpenRequest::new(&args.path, "r"))?;
    let attributes = file
        .attributes()
        .cloned()
        .ok_or_else(|| CliError::file(file.path(), FileError::InvalidFileAttributes))?;

    if args.json {
        let json = serde_json::to_string_pretty(&attributes).map_err(|e| {
            CliError::SnapshotParse {
                path: args.path.clone(),
                source: e,
            }
        })?;
        println!("{}", json);
    } else {
        output::print_stat(&file, &attributes);
    }
    file.close().map_err(|e| CliError::file(file.path(), e))
}

fn run_audit(args: AuditArgs, policy: SecurityPolicy) -> Result<()> {
    let dir = fs::canonicalize(&args.dir)
        .map_err(|_| CliError::file(&args.dir, FileError::InvalidPath))?;
    let verdict = OwnershipAuditor::new(policy.trusted_owners.clone()).audit(&dir);
    output::print_verdict(&dir, &verdict);
    if verdict.is_safe() {
        Ok(())
    } else {
        Err(CliError::file(dir, FileError::InsecurePath))
    }
}
