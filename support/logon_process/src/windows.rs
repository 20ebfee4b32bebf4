// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Windows backend.

#![cfg(windows)]
// UNSAFETY: Calls to Win32 process creation, handle and wait functions.
#![expect(unsafe_code)]

pub mod command;
mod launcher;
pub mod process;

pub use self::command::Child;
pub use self::command::Command;
pub use self::command::CommandError;
pub use self::command::Output;
pub use self::command::Stdio;
pub use self::process::Process;

use crate::backend::CreatedProcess;
use crate::backend::LogonBackend;
use crate::backend::NativeHandle;
use crate::error::LaunchError;
use crate::launch::LaunchResult;
use crate::launch::Launcher;
use crate::marshal::NativeParams;
use crate::request::LaunchRequest;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io;
use std::os::windows::prelude::*;
use std::path::Path;
use std::ptr::null_mut;
use winapi::um::handleapi;
use winapi::um::processthreadsapi;
use winapi::um::winnt;

impl NativeHandle for OwnedHandle {
    fn close(self) -> io::Result<()> {
        // SAFETY: the handle is owned and is not used after this call.
        if unsafe { handleapi::CloseHandle(self.into_raw_handle()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Duplicates `handle` into a new handle that child processes can inherit.
pub(crate) fn duplicate_inheritable(handle: BorrowedHandle<'_>) -> io::Result<OwnedHandle> {
    let mut new = null_mut();
    // SAFETY: duplicating a valid borrowed handle within the current process
    // into a fresh handle slot.
    unsafe {
        let process = processthreadsapi::GetCurrentProcess();
        if handleapi::DuplicateHandle(
            process,
            handle.as_raw_handle(),
            process,
            &mut new,
            0,
            true.into(),
            winnt::DUPLICATE_SAME_ACCESS,
        ) == 0
        {
            return Err(io::Error::last_os_error());
        }
        Ok(OwnedHandle::from_raw_handle(new))
    }
}

/// Creates processes with `CreateProcessWithLogonW` when credentials are
/// supplied, and with `CreateProcessW` otherwise.
#[derive(Debug, Default, Copy, Clone)]
pub struct HostBackend;

impl LogonBackend for HostBackend {
    type Handle = OwnedHandle;
    type Process = Process;

    fn create_process(
        &self,
        program: &Path,
        args: &[OsString],
        params: &NativeParams<'_>,
    ) -> io::Result<CreatedProcess<OwnedHandle>> {
        launcher::create_process(program, args, params)
    }

    fn find_process(&self, pid: u32) -> io::Result<Process> {
        Process::open(pid)
    }
}

/// Launches `program` on the host.
///
/// See [`Launcher::launch`].
pub fn launch<I, S>(
    program: impl AsRef<Path>,
    args: I,
    request: LaunchRequest<'_>,
) -> Result<LaunchResult<OwnedHandle, Process>, LaunchError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Launcher::new(HostBackend).launch(program, args, request)
}
