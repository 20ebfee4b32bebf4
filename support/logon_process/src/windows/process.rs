// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process objects obtained by identifier.

use crate::backend::ExitStatus;
use crate::backend::ProcessObject;
use std::io;
use std::os::windows::prelude::*;
use winapi::shared::minwindef::FALSE;
use winapi::shared::winerror::WAIT_TIMEOUT;
use winapi::um::minwinbase::STILL_ACTIVE;
use winapi::um::processthreadsapi::GetExitCodeProcess;
use winapi::um::processthreadsapi::OpenProcess;
use winapi::um::processthreadsapi::TerminateProcess;
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::INFINITE;
use winapi::um::winbase::WAIT_OBJECT_0;
use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;
use winapi::um::winnt::PROCESS_TERMINATE;
use winapi::um::winnt::SYNCHRONIZE;

/// The exit code [`Process::kill`] terminates with.
pub const KILL_EXIT_CODE: u32 = 1;

/// A process opened by identifier, with access to wait for, query and
/// terminate it.
///
/// This handle is independent of the raw creation handles and stays valid
/// after they are closed.
#[derive(Debug)]
pub struct Process {
    handle: OwnedHandle,
    pid: u32,
}

impl Process {
    /// Opens the process with identifier `pid`.
    pub fn open(pid: u32) -> io::Result<Self> {
        // SAFETY: OpenProcess has no preconditions; a null return is an
        // error.
        let raw = unsafe {
            OpenProcess(
                SYNCHRONIZE | PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_TERMINATE,
                FALSE,
                pid,
            )
        };
        if raw.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: the handle was just opened and is owned by nothing else.
        let handle = unsafe { OwnedHandle::from_raw_handle(raw) };
        Ok(Self { handle, pid })
    }

    /// The process identifier.
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Waits up to `timeout_ms` milliseconds for the process to exit.
    /// Returns false on timeout.
    fn wait_for(&self, timeout_ms: u32) -> io::Result<bool> {
        // SAFETY: the handle is valid and has SYNCHRONIZE access.
        match unsafe { WaitForSingleObject(self.handle.as_raw_handle(), timeout_ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Blocks until the process exits, returning its status.
    pub fn wait(&self) -> io::Result<ExitStatus> {
        self.wait_for(INFINITE)?;
        self.exit_code().map(ExitStatus::from_raw)
    }

    /// Returns the exit status if the process has exited.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        if !self.wait_for(0)? {
            return Ok(None);
        }
        self.exit_code().map(|code| Some(ExitStatus::from_raw(code)))
    }

    /// The raw exit code. A running process reports `STILL_ACTIVE` (259).
    pub fn exit_code(&self) -> io::Result<u32> {
        let mut code = 0;
        // SAFETY: the handle is valid and has query access.
        if unsafe { GetExitCodeProcess(self.handle.as_raw_handle(), &mut code) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(code)
    }

    /// Returns true if the process has not exited.
    pub fn is_running(&self) -> io::Result<bool> {
        Ok(!self.wait_for(0)? && self.exit_code()? == STILL_ACTIVE)
    }

    /// Terminates the process immediately with exit code
    /// [`KILL_EXIT_CODE`].
    pub fn kill(&self) -> io::Result<()> {
        // SAFETY: the handle is valid and has PROCESS_TERMINATE access.
        if unsafe { TerminateProcess(self.handle.as_raw_handle(), KILL_EXIT_CODE) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsHandle for Process {
    fn as_handle(&self) -> BorrowedHandle<'_> {
        self.handle.as_handle()
    }
}

impl From<Process> for OwnedHandle {
    fn from(value: Process) -> OwnedHandle {
        value.handle
    }
}

impl ProcessObject for Process {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        Process::wait(self)
    }

    fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        Process::try_wait(self)
    }

    fn kill(&self) -> io::Result<()> {
        Process::kill(self)
    }
}
