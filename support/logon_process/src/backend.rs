// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The native seams of a launch: process creation, process lookup, and handle
//! closing.

use crate::marshal::NativeParams;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;

/// A raw native handle with exactly one owner.
pub trait NativeHandle: Sized {
    /// Closes the handle, reporting any error from the OS.
    fn close(self) -> io::Result<()>;
}

/// The exit status of a process.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExitStatus(u32);

impl ExitStatus {
    /// Wraps a native exit code.
    pub const fn from_raw(code: u32) -> Self {
        Self(code)
    }

    /// The native exit code.
    pub const fn code(&self) -> u32 {
        self.0
    }

    /// Returns true if the process exited with code zero.
    pub const fn success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code: {}", self.0)
    }
}

/// A process reference that supports waiting and killing.
///
/// This is never the raw creation handle. Its validity does not depend on
/// whether the raw creation handles are still open.
pub trait ProcessObject {
    /// The process identifier.
    fn id(&self) -> u32;

    /// Blocks until the process exits.
    fn wait(&self) -> io::Result<ExitStatus>;

    /// Returns the exit status if the process has exited.
    fn try_wait(&self) -> io::Result<Option<ExitStatus>>;

    /// Terminates the process.
    fn kill(&self) -> io::Result<()>;
}

/// The values produced by a successful native create call.
#[derive(Debug)]
pub struct CreatedProcess<H> {
    /// The new process identifier.
    pub pid: u32,
    /// The raw process creation handle.
    pub process: H,
    /// The raw handle to the initial thread.
    pub thread: H,
}

/// A platform's process creation and lookup primitives.
pub trait LogonBackend {
    /// The raw creation handle type.
    type Handle: NativeHandle;
    /// The process object type produced by lookup.
    type Process: ProcessObject;

    /// Returns the environment of the calling process.
    fn environment(&self) -> Vec<(OsString, OsString)> {
        std::env::vars_os().collect()
    }

    /// Performs the native create call, exactly once.
    ///
    /// On failure, no native resources may remain.
    fn create_process(
        &self,
        program: &Path,
        args: &[OsString],
        params: &NativeParams<'_>,
    ) -> io::Result<CreatedProcess<Self::Handle>>;

    /// Opens a process object for `pid`.
    fn find_process(&self, pid: u32) -> io::Result<Self::Process>;
}
