// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// A failed launch.
///
/// Every variant carries the operation that failed and the path it failed
/// on, along with the underlying OS error as its source.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The requested working directory does not exist.
    #[error("chdir {}", .path.display())]
    Chdir {
        /// The missing directory.
        path: PathBuf,
        /// The error from querying the directory.
        #[source]
        source: io::Error,
    },
    /// The native process creation call failed, or its parameters could not
    /// be encoded. No process was created.
    #[error("fork/exec {}", .program.display())]
    ForkExec {
        /// The program that was being launched.
        program: PathBuf,
        /// The native error.
        #[source]
        source: io::Error,
    },
    /// The process was created but could not be reopened by identifier.
    #[error("findprocess {} (pid {pid})", .program.display())]
    FindProcess {
        /// The program that was launched.
        program: PathBuf,
        /// The identifier of the created process.
        pid: u32,
        /// The lookup error.
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Returns the tag of the failed operation: `chdir`, `fork/exec` or
    /// `findprocess`.
    pub fn op(&self) -> &'static str {
        match self {
            LaunchError::Chdir { .. } => "chdir",
            LaunchError::ForkExec { .. } => "fork/exec",
            LaunchError::FindProcess { .. } => "findprocess",
        }
    }

    /// Returns the path the operation failed on.
    pub fn path(&self) -> &Path {
        match self {
            LaunchError::Chdir { path, .. } => path,
            LaunchError::ForkExec { program, .. } | LaunchError::FindProcess { program, .. } => {
                program
            }
        }
    }

    /// Returns the underlying OS error code, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().raw_os_error()
    }

    /// Returns the underlying IO error.
    pub fn io_error(&self) -> &io::Error {
        match self {
            LaunchError::Chdir { source, .. }
            | LaunchError::ForkExec { source, .. }
            | LaunchError::FindProcess { source, .. } => source,
        }
    }
}
