//! The driver's single flat result enum.
//!
//! Every public entry point, and every internal layer beneath it (FAT
//! access, directory engine, path resolver, ...), returns `FatResult<T>`
//! so that `?` composes across the whole call chain down to the
//! `BlockDevice` trait at the bottom.

/// Errors surfaced by the driver. Mirrors the FatFs `FRESULT` taxonomy:
/// one flat enum, not a family of per-layer error types.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError {
    #[error("the underlying block device reported an error")]
    DiskErr,

    #[error("a structural invariant was violated (reserved cluster, chain cycle, corrupt directory)")]
    IntErr,

    #[error("the device failed to initialize")]
    NotReady,

    #[error("the file does not exist")]
    NoFile,

    #[error("a directory in the path does not exist")]
    NoPath,

    #[error("the path was rejected by name-syntax rules")]
    InvalidName,

    #[error("the operation was forbidden by an attribute or open-file lock")]
    Denied,

    #[error("the name already exists")]
    Exist,

    #[error("the handle has outlived its volume (stale mount generation)")]
    InvalidObject,

    #[error("the device is write protected")]
    WriteProtected,

    #[error("the drive prefix does not name a mounted volume")]
    InvalidDrive,

    #[error("the drive number is not bound to a block device")]
    NotEnabled,

    #[error("no FAT volume boot record was found")]
    NoFilesystem,

    #[error("the format parameters are inconsistent with the volume")]
    MkfsAborted,

    #[error("timed out waiting for the volume mutex")]
    Timeout,

    #[error("blocked by the open-file registry")]
    Locked,

    #[error("a transient buffer allocation failed")]
    NotEnoughCore,

    #[error("the open-file registry is full")]
    TooManyOpenFiles,

    #[error("an argument was invalid")]
    InvalidParameter,

    #[error("the volume has no space left")]
    NoSpaceLeft,

    #[error("operation not permitted")]
    NoPermission,

    #[error("the target is a directory")]
    IsDirectory,

    #[error("the target is not a directory")]
    NotDirectory,

    #[error("the directory is not empty")]
    DirectoryNotEmpty,
}

pub type FatResult<T> = Result<T, FatError>;
