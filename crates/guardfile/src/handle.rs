//! Secure file handle and the I/O operations it permits
//!
//! A [`SecureFile`] is always produced by
//! [`SecureOpener::open`](crate::SecureOpener::open), even when opening
//! failed, so the caller can inspect what went wrong. All I/O goes through
//! the handle's state machine:
//!
//! ```text
//! Created ──open ok──▶ Open ──close ok──▶ Closed
//!    │                  │
//!    └──close──▶ Closed └──close fails──▶ CloseFailed (terminal)
//! ```

use crate::attributes::{FileAttributes, FileUniqueId};
use crate::error::{FileError, Result};
use crate::format::{self, FormatArg};
use crate::policy::ContractViolation;
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Reference point for [`SecureFile::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Lifecycle state of a [`SecureFile`]
#[derive(Debug)]
enum HandleState {
    /// Never opened, or opening failed
    Created,
    /// Verified and open
    Open(File),
    /// Closed cleanly
    Closed,
    /// Closing failed; nothing but that error is ever reported again
    CloseFailed,
}

/// An open, verified file plus the metadata captured when it was opened
pub struct SecureFile {
    path: PathBuf,
    state: HandleState,
    attributes: Option<FileAttributes>,
    unique_id: Option<FileUniqueId>,
    size: u64,
    descriptor: Option<i32>,
    last_error: Option<FileError>,
    transferred: usize,
    contract: ContractViolation,
}

impl SecureFile {
    pub(crate) fn unopened(path: PathBuf, contract: ContractViolation) -> Self {
        Self {
            path,
            state: HandleState::Created,
            attributes: None,
            unique_id: None,
            size: 0,
            descriptor: None,
            last_error: None,
            transferred: 0,
            contract,
        }
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub(crate) fn fail(&mut self, err: FileError) {
        self.last_error = Some(self.contract.enforce(err));
    }

    pub(crate) fn activate(&mut self, file: File, attributes: FileAttributes, unique_id: FileUniqueId) {
        self.size = attributes.size;
        self.descriptor = raw_descriptor(&file);
        self.attributes = Some(attributes);
        self.unique_id = Some(unique_id);
        self.state = HandleState::Open(file);
        self.last_error = None;
    }

    /// Canonical path of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final component of the canonical path
    #[must_use]
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }

    /// True while the handle holds a verified open stream
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self.state, HandleState::Open(_))
    }

    /// True once closing has failed; the handle is then unusable
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, HandleState::CloseFailed)
    }

    /// Outcome of the most recent operation, `None` meaning success
    #[must_use]
    pub fn last_error(&self) -> Option<FileError> {
        self.last_error
    }

    /// Attributes captured from the open descriptor
    #[must_use]
    pub fn attributes(&self) -> Option<&FileAttributes> {
        self.attributes.as_ref()
    }

    /// Identity captured from the open descriptor
    #[must_use]
    pub fn unique_id(&self) -> Option<&FileUniqueId> {
        self.unique_id.as_ref()
    }

    /// Size in bytes when the file was opened
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Low-level descriptor number, for diagnostics only
    #[must_use]
    pub fn descriptor(&self) -> Option<i32> {
        self.descriptor
    }

    /// Elements moved by the most recent `read` or `write`, including
    /// short transfers that ended in an error
    #[must_use]
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    /// Convert into a `Result`, yielding the handle only if it is open
    pub fn into_result(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(self.last_error.unwrap_or(FileError::InvalidHandle))
        }
    }

    /// Record the outcome of an operation and pass it through
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(err) => {
                let err = self.contract.enforce(err);
                self.last_error = Some(err);
                Err(err)
            }
        }
    }

    fn stream(&mut self) -> Result<&mut File> {
        open_stream(&mut self.state)
    }

    /// Read up to `count` elements of `elem_size` bytes into `buf`.
    ///
    /// Returns the number of complete elements read. A short read fails with
    /// [`FileError::EndOfFile`] or [`FileError::ReadWriteError`];
    /// [`transferred`](Self::transferred) still reports what was read.
    pub fn read(&mut self, buf: &mut [u8], elem_size: usize, count: usize) -> Result<usize> {
        self.transferred = 0;
        let result = self.read_elements(buf, elem_size, count);
        self.finish(result)
    }

    fn read_elements(&mut self, buf: &mut [u8], elem_size: usize, count: usize) -> Result<usize> {
        let file = open_stream(&mut self.state)?;
        let Some(total) = transfer_len(buf.len(), elem_size, count)? else {
            return Ok(0);
        };

        let mut filled = 0;
        let mut outcome = Ok(());
        while filled < total {
            match file.read(&mut buf[filled..total]) {
                Ok(0) => {
                    outcome = Err(FileError::EndOfFile);
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Read from {} failed: {}", self.path.display(), e);
                    outcome = Err(classify_io(&e));
                    break;
                }
            }
        }

        self.transferred = filled / elem_size;
        outcome.map(|()| count)
    }

    /// Write `count` elements of `elem_size` bytes from `buf`.
    ///
    /// Returns the number of elements written. Short writes fail with
    /// [`FileError::DiskFull`] or [`FileError::ReadWriteError`].
    pub fn write(&mut self, buf: &[u8], elem_size: usize, count: usize) -> Result<usize> {
        self.transferred = 0;
        let result = self.write_elements(buf, elem_size, count);
        self.finish(result)
    }

    fn write_elements(&mut self, buf: &[u8], elem_size: usize, count: usize) -> Result<usize> {
        let file = open_stream(&mut self.state)?;
        let Some(total) = transfer_len(buf.len(), elem_size, count)? else {
            return Ok(0);
        };

        let mut written = 0;
        let mut outcome = Ok(());
        while written < total {
            match file.write(&buf[written..total]) {
                Ok(0) => {
                    outcome = Err(FileError::ReadWriteError);
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Write to {} failed: {}", self.path.display(), e);
                    outcome = Err(classify_io(&e));
                    break;
                }
            }
        }

        self.transferred = written / elem_size;
        outcome.map(|()| count)
    }

    /// Write all of `bytes`
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        self.write(bytes, 1, bytes.len())
    }

    /// Write compile-time checked formatted output.
    ///
    /// ```no_run
    /// # fn demo(file: &mut guardfile::SecureFile) -> guardfile::Result<()> {
    /// file.write_fmt_args(format_args!("{} records\n", 12))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn write_fmt_args(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        let text = fmt::format(args);
        self.write_bytes(text.as_bytes())
    }

    /// Write printf-style output whose template is only known at runtime.
    ///
    /// The template is validated against `args` before anything is written.
    pub fn write_formatted(&mut self, template: &str, args: &[FormatArg<'_>]) -> Result<usize> {
        if let Err(err) = self.stream().map(|_| ()) {
            return self.finish(Err(err));
        }
        match format::render(template, args) {
            Ok(text) => self.write_bytes(text.as_bytes()),
            Err(err) => {
                warn!("Rejected format template {:?}", template);
                self.finish(Err(err))
            }
        }
    }

    /// Move the stream position; returns the new offset from the start
    pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let result = self.seek_to(offset, origin);
        self.finish(result)
    }

    fn seek_to(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let file = self.stream()?;
        let target = match origin {
            SeekOrigin::Start => {
                SeekFrom::Start(u64::try_from(offset).map_err(|_| FileError::InvalidParameter)?)
            }
            SeekOrigin::Current => SeekFrom::Current(offset),
            SeekOrigin::End => SeekFrom::End(offset),
        };
        file.seek(target).map_err(|_| FileError::SeekFailure)
    }

    /// Current stream position
    pub fn tell(&mut self) -> Result<u64> {
        let result = self
            .stream()
            .and_then(|file| file.stream_position().map_err(|_| FileError::Failure));
        self.finish(result)
    }

    /// Seek to the start and clear any earlier stream error
    pub fn rewind(&mut self) -> Result<()> {
        let result = self.seek_to(0, SeekOrigin::Start).map(|_| ());
        self.finish(result)
    }

    /// Push buffered data to the operating system
    pub fn flush(&mut self) -> Result<()> {
        let result = self
            .stream()
            .and_then(|file| file.flush().map_err(|_| FileError::FlushFailure));
        self.finish(result)
    }

    /// Flush data and metadata to stable storage
    pub fn sync(&mut self) -> Result<()> {
        let result = self
            .stream()
            .and_then(|file| file.sync_all().map_err(|_| FileError::FlushFailure));
        self.finish(result)
    }

    /// Close the stream.
    ///
    /// Closing a closed or never-opened handle succeeds. If the close itself
    /// fails the handle becomes terminal and every later call, including
    /// another `close`, reports [`FileError::FailureClosingFile`].
    pub fn close(&mut self) -> Result<()> {
        let result = match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Open(file) => match close_file(file) {
                Ok(()) => {
                    debug!("Closed {}", self.path.display());
                    Ok(())
                }
                Err(e) => {
                    error!("Failed to close {}: {}", self.path.display(), e);
                    self.state = HandleState::CloseFailed;
                    Err(FileError::FailureClosingFile)
                }
            },
            HandleState::CloseFailed => {
                self.state = HandleState::CloseFailed;
                Err(FileError::FailureClosingFile)
            }
            HandleState::Created | HandleState::Closed => Ok(()),
        };
        self.descriptor = None;
        self.finish(result)
    }

    /// Delete the file this handle refers to, then close it.
    ///
    /// The canonical path must still name the object captured at open time;
    /// if it was replaced, nothing is removed.
    pub fn remove(&mut self) -> Result<()> {
        let result = self.remove_verified();
        self.finish(result)
    }

    fn remove_verified(&mut self) -> Result<()> {
        let expected = match &self.state {
            HandleState::Open(file) => {
                FileUniqueId::capture_file(file).ok_or(FileError::InvalidFileUniqueId)?
            }
            HandleState::Closed => self.unique_id.clone().ok_or(FileError::InvalidHandle)?,
            HandleState::CloseFailed => return Err(FileError::FailureClosingFile),
            HandleState::Created => return Err(FileError::InvalidHandle),
        };

        match FileUniqueId::capture_path(&self.path) {
            Some(current) if current == expected => {}
            Some(_) => {
                warn!(
                    "Refusing to remove {}: path now names a different file",
                    self.path.display()
                );
                return Err(FileError::InvalidFileUniqueId);
            }
            None => return Err(FileError::InvalidFile),
        }

        fs::remove_file(&self.path).map_err(|e| {
            debug!("Failed to remove {}: {}", self.path.display(), e);
            FileError::Failure
        })?;
        debug!("Removed {}", self.path.display());
        self.close()
    }
}

impl Drop for SecureFile {
    fn drop(&mut self) {
        if let HandleState::Open(file) = std::mem::replace(&mut self.state, HandleState::Closed) {
            if let Err(e) = close_file(file) {
                warn!("Failed to close {} on drop: {}", self.path.display(), e);
            }
        }
        // FileAttributes and FileUniqueId wipe themselves when dropped.
    }
}

impl fmt::Debug for SecureFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureFile")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("size", &self.size)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl Read for SecureFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        let result = SecureFile::read(self, buf, 1, len);
        partial_transfer(result, self.transferred)
    }
}

impl Write for SecureFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = SecureFile::write(self, buf, 1, buf.len());
        partial_transfer(result, self.transferred)
    }

    fn flush(&mut self) -> io::Result<()> {
        SecureFile::flush(self).map_err(io::Error::from)
    }
}

impl From<FileError> for io::Error {
    fn from(err: FileError) -> Self {
        let kind = match err {
            FileError::EndOfFile => io::ErrorKind::UnexpectedEof,
            FileError::InvalidParameter | FileError::BufferTooSmall => io::ErrorKind::InvalidInput,
            FileError::InvalidFile => io::ErrorKind::NotFound,
            FileError::FileAlreadyExists => io::ErrorKind::AlreadyExists,
            FileError::InsecurePath
            | FileError::InvalidFileExtension
            | FileError::InvalidFileAttributes
            | FileError::InvalidFileUniqueId => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Byte-stream view of an element transfer. Bytes already moved are
/// reported as success; the error stays in `last_error`.
fn partial_transfer(result: Result<usize>, transferred: usize) -> io::Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(FileError::EndOfFile) => Ok(transferred),
        Err(_) if transferred > 0 => Ok(transferred),
        Err(err) => Err(err.into()),
    }
}

fn open_stream(state: &mut HandleState) -> Result<&mut File> {
    match state {
        HandleState::Open(file) => Ok(file),
        HandleState::CloseFailed => Err(FileError::FailureClosingFile),
        HandleState::Created | HandleState::Closed => Err(FileError::InvalidHandle),
    }
}

/// Validate a transfer request. `None` means a zero-length request.
fn transfer_len(buf_len: usize, elem_size: usize, count: usize) -> Result<Option<usize>> {
    if elem_size == 0 || count == 0 {
        return Ok(None);
    }
    let total = elem_size
        .checked_mul(count)
        .ok_or(FileError::InvalidParameter)?;
    if buf_len < total {
        return Err(FileError::BufferTooSmall);
    }
    Ok(Some(total))
}

fn classify_io(e: &io::Error) -> FileError {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ENOSPC) {
        return FileError::DiskFull;
    }
    match e.kind() {
        io::ErrorKind::OutOfMemory => FileError::Failure,
        io::ErrorKind::WriteZero | io::ErrorKind::UnexpectedEof => FileError::EndOfFile,
        _ => FileError::ReadWriteError,
    }
}

#[cfg(unix)]
fn raw_descriptor(file: &File) -> Option<i32> {
    use std::os::unix::io::AsRawFd;
    Some(file.as_raw_fd())
}

#[cfg(not(unix))]
fn raw_descriptor(_file: &File) -> Option<i32> {
    None
}

/// Close a file and report the result, which dropping a `File` cannot do
#[cfg(unix)]
fn close_file(file: File) -> io::Result<()> {
    use std::os::unix::io::IntoRawFd;
    nix::unistd::close(file.into_raw_fd()).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn close_file(file: File) -> io::Result<()> {
    drop(file);
    Ok(())
}
