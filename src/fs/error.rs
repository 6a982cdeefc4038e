//! Error kinds surfaced by the engine.

use std::io;
use thiserror::Error;

/// Errors returned by engine operations.
///
/// Partial I/O is not an error: short reads and writes are reported as byte
/// counts by the operations themselves.
#[derive(Debug, Error)]
pub enum FsError {
    /// The operation requires a logged-in session.
    #[error("not logged in")]
    NotLoggedIn,
    /// No image is mounted.
    #[error("no filesystem mounted")]
    NotMounted,
    /// A device access failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The superblock does not carry the expected signature.
    #[error("bad filesystem signature")]
    Corrupt,
    /// A path component or a user does not exist.
    #[error("no such file, directory or user")]
    NotFound,
    /// A user record with the same name, uid or gid already exists.
    #[error("already exists")]
    AlreadyExists,
    /// A directory was expected.
    #[error("not a directory")]
    NotADirectory,
    /// A directory was given where a file was expected.
    #[error("is a directory")]
    IsADirectory,
    /// The directory still holds entries besides `.` and `..`.
    #[error("directory not empty")]
    NotEmpty,
    /// The inode permission bits deny the requested access.
    #[error("permission denied")]
    AccessDenied,
    /// The path-scope policy denies the requested access.
    #[error("access to this path denied")]
    PathDenied,
    /// No open file matches the descriptor.
    #[error("bad file descriptor")]
    BadDescriptor,
    /// The open-file table is full.
    #[error("too many open files")]
    TooManyOpenFiles,
    /// A bitmap ran out of zero bits, or the user table is full.
    #[error("no space left on device")]
    NoSpace,
    /// A logical block index lies past the single-indirect range.
    #[error("file too large")]
    FileTooLarge,
    /// A malformed argument.
    #[error("invalid argument")]
    BadArgument,
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, FsError>;
