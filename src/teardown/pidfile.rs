//! PID files: one decimal process ID per file.
//!
//! A PID file is a claim that a process was started, not proof that it is
//! still running. This module only reads, writes and deletes the files;
//! liveness is decided by [`super::terminator`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("pid file {path} is malformed: {contents:?}")]
    Malformed { path: PathBuf, contents: String },
    #[error("failed to access pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read the PID recorded at `path`.
///
/// A missing file is `Ok(None)`: nothing was started, or it was already
/// cleaned up. Zero and negative values are rejected as malformed since
/// signalling them would address a whole process group.
pub fn read(path: &Path) -> Result<Option<i32>, PidFileError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PidFileError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(PidFileError::Malformed {
            path: path.to_path_buf(),
            contents,
        }),
    }
}

/// Record `pid` at `path`, creating the parent directory if needed.
pub fn write(path: &Path, pid: u32) -> Result<(), PidFileError> {
    let io_err = |source| PidFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, pid.to_string()).map_err(io_err)
}

/// Delete the PID file. Already gone is fine.
pub fn remove(path: &Path) -> Result<(), PidFileError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PidFileError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
