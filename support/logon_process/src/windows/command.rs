// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A `std::process::Command`-like builder over [`launch`](super::launch).

use super::Process;
use crate::backend::ExitStatus;
use crate::error::LaunchError;
use crate::lifecycle::CreationHandles;
use crate::lifecycle::HandleDisposition;
use crate::request::LaunchRequest;
use crate::request::NativeAttributes;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::io::Read;
use std::os::windows::prelude::*;
use std::path::Path;
use std::path::PathBuf;
use std::ptr::null_mut;
use thiserror::Error;
use winapi::um::namedpipeapi::CreatePipe;

/// Errors from running a [`Command`].
#[derive(Debug, Error)]
pub enum CommandError {
    /// The launch itself failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// A standard handle for the child could not be set up.
    #[error("failed to set up standard handles")]
    Stdio(#[source] io::Error),
    /// Waiting for the child failed.
    #[error("failed to wait for process {pid}")]
    Wait {
        /// The child's identifier.
        pid: u32,
        /// The wait error.
        #[source]
        source: io::Error,
    },
    /// Reading the child's output failed.
    #[error("failed to read process output")]
    Read(#[source] io::Error),
    /// Closing the exposed creation handles failed.
    #[error("failed to close creation handles")]
    Close(#[source] io::Error),
}

/// Where a child's standard handle comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stdio {
    /// Inherit this process's handle.
    Inherit,
    /// Connect to `nul`.
    Null,
    /// Connect to a new pipe, whose other end is returned in [`Child`].
    Piped,
}

/// Creates a pair of pipe files, returning (read, write).
fn pipe() -> io::Result<(File, File)> {
    let mut read = null_mut();
    let mut write = null_mut();
    // SAFETY: both out pointers are valid; no security attributes.
    if unsafe { CreatePipe(&mut read, &mut write, null_mut(), 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both handles were just created and are owned by nothing else.
    unsafe { Ok((File::from_raw_handle(read), File::from_raw_handle(write))) }
}

/// The child's end of one standard handle, and the parent's end if piped.
enum StdioEnd {
    Inherit,
    Owned(File),
}

impl StdioEnd {
    fn add_to<'a>(&'a self, request: &mut LaunchRequest<'a>, inherited: &'a impl AsHandle) {
        match self {
            StdioEnd::Inherit => request.file(inherited),
            StdioEnd::Owned(file) => request.file(file),
        };
    }
}

impl Stdio {
    /// Returns `(child, parent)` ends. `input` is true for stdin.
    fn setup(self, input: bool) -> io::Result<(StdioEnd, Option<File>)> {
        Ok(match self {
            Stdio::Inherit => (StdioEnd::Inherit, None),
            Stdio::Null => {
                let nul = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open("nul")?;
                (StdioEnd::Owned(nul), None)
            }
            Stdio::Piped => {
                let (read, write) = pipe()?;
                if input {
                    (StdioEnd::Owned(read), Some(write))
                } else {
                    (StdioEnd::Owned(write), Some(read))
                }
            }
        })
    }
}

/// A process builder.
///
/// Environment changes are applied on top of this process's environment as
/// it is when the command is spawned.
#[derive(Debug)]
pub struct Command {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    env: BTreeMap<OsString, Option<OsString>>,
    clear_env: bool,
    native_attributes: Option<NativeAttributes>,
    stdin: Option<Stdio>,
    stdout: Option<Stdio>,
    stderr: Option<Stdio>,
}

impl Command {
    /// Creates a command for `program`, which is searched for on `PATH` if it
    /// is not a path.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().into(),
            args: Vec::new(),
            current_dir: None,
            env: BTreeMap::new(),
            clear_env: false,
            native_attributes: None,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Appends an argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Appends arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Sets the working directory.
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets an environment variable.
    pub fn env(&mut self, key: impl AsRef<OsStr>, val: impl AsRef<OsStr>) -> &mut Self {
        self.env
            .insert(key.as_ref().to_owned(), Some(val.as_ref().to_owned()));
        self
    }

    /// Removes an environment variable.
    pub fn env_remove(&mut self, key: impl AsRef<OsStr>) -> &mut Self {
        self.env.insert(key.as_ref().to_owned(), None);
        self
    }

    /// Starts from an empty environment instead of this process's.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env.clear();
        self.clear_env = true;
        self
    }

    /// Supplies a native attribute block. The exposed creation handles are
    /// closed by [`Child::wait`], or can be taken with
    /// [`Child::take_creation_handles`].
    pub fn native_attributes(&mut self, attributes: NativeAttributes) -> &mut Self {
        self.native_attributes = Some(attributes);
        self
    }

    /// Sets the child's standard input.
    pub fn stdin(&mut self, stdio: Stdio) -> &mut Self {
        self.stdin = Some(stdio);
        self
    }

    /// Sets the child's standard output.
    pub fn stdout(&mut self, stdio: Stdio) -> &mut Self {
        self.stdout = Some(stdio);
        self
    }

    /// Sets the child's standard error.
    pub fn stderr(&mut self, stdio: Stdio) -> &mut Self {
        self.stderr = Some(stdio);
        self
    }

    fn environment(&self) -> Option<Vec<(OsString, OsString)>> {
        if self.env.is_empty() && !self.clear_env {
            return None;
        }
        let mut vars: Vec<(OsString, OsString)> = if self.clear_env {
            Vec::new()
        } else {
            std::env::vars_os().collect()
        };
        for (key, val) in &self.env {
            vars.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
            if let Some(val) = val {
                vars.push((key.clone(), val.clone()));
            }
        }
        Some(vars)
    }

    fn spawn_with_defaults(self, defaults: [Stdio; 3]) -> Result<Child, CommandError> {
        let [stdin_default, stdout_default, stderr_default] = defaults;
        let (stdin_end, stdin) = self
            .stdin
            .unwrap_or(stdin_default)
            .setup(true)
            .map_err(CommandError::Stdio)?;
        let (stdout_end, stdout) = self
            .stdout
            .unwrap_or(stdout_default)
            .setup(false)
            .map_err(CommandError::Stdio)?;
        let (stderr_end, stderr) = self
            .stderr
            .unwrap_or(stderr_default)
            .setup(false)
            .map_err(CommandError::Stdio)?;

        let environment = self.environment();
        let std_in = io::stdin();
        let std_out = io::stdout();
        let std_err = io::stderr();

        let mut request = LaunchRequest::new();
        if let Some(dir) = &self.current_dir {
            request.directory(dir);
        }
        if let Some(environment) = environment {
            request.environment(environment);
        }
        stdin_end.add_to(&mut request, &std_in);
        stdout_end.add_to(&mut request, &std_out);
        stderr_end.add_to(&mut request, &std_err);
        if let Some(attributes) = self.native_attributes {
            request.native_attributes(attributes);
        }

        let result = super::launch(&self.program, &self.args, request)?;
        Ok(Child {
            pid: result.pid,
            process: result.process,
            handles: result.handles,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Spawns the command. Standard handles default to [`Stdio::Inherit`].
    pub fn spawn(self) -> Result<Child, CommandError> {
        self.spawn_with_defaults([Stdio::Inherit; 3])
    }

    /// Runs the command to completion and returns its exit status.
    pub fn status(self) -> Result<ExitStatus, CommandError> {
        self.spawn()?.wait()
    }

    /// Runs the command to completion, capturing its output. Standard output
    /// and error default to [`Stdio::Piped`], standard input to
    /// [`Stdio::Null`].
    pub fn output(self) -> Result<Output, CommandError> {
        self.spawn_with_defaults([Stdio::Null, Stdio::Piped, Stdio::Piped])?
            .wait_with_output()
    }
}

/// The output of a finished command.
#[derive(Debug, Clone)]
pub struct Output {
    /// The exit status.
    pub status: ExitStatus,
    /// Everything written to standard output, if piped.
    pub stdout: Vec<u8>,
    /// Everything written to standard error, if piped.
    pub stderr: Vec<u8>,
}

/// A spawned command.
#[derive(Debug)]
pub struct Child {
    pid: u32,
    process: Process,
    handles: HandleDisposition<OwnedHandle>,
    /// The parent's end of a piped standard input.
    pub stdin: Option<File>,
    /// The parent's end of a piped standard output.
    pub stdout: Option<File>,
    /// The parent's end of a piped standard error.
    pub stderr: Option<File>,
}

impl Child {
    /// The process identifier.
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// The process object.
    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Takes the exposed creation handles, if the command had a native
    /// attribute block and they have not been taken or closed yet.
    pub fn take_creation_handles(&mut self) -> Option<CreationHandles<OwnedHandle>> {
        std::mem::replace(&mut self.handles, HandleDisposition::Managed).exposed()
    }

    /// Terminates the child.
    pub fn kill(&self) -> io::Result<()> {
        self.process.kill()
    }

    /// Waits for the child to exit, then closes any exposed creation
    /// handles. Standard input is closed first.
    pub fn wait(&mut self) -> Result<ExitStatus, CommandError> {
        drop(self.stdin.take());
        let status = self.process.wait().map_err(|source| CommandError::Wait {
            pid: self.pid,
            source,
        })?;
        if let Some(handles) = self.take_creation_handles() {
            handles.close().map_err(CommandError::Close)?;
        }
        Ok(status)
    }

    /// Waits for the child to exit, collecting its piped output.
    pub fn wait_with_output(mut self) -> Result<Output, CommandError> {
        drop(self.stdin.take());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let stdout_pipe = self.stdout.take();
        let stderr_pipe = self.stderr.take();
        std::thread::scope(|s| {
            let stderr_thread = stderr_pipe.map(|mut pipe| {
                s.spawn(move || {
                    let mut buf = Vec::new();
                    pipe.read_to_end(&mut buf).map(|_| buf)
                })
            });
            if let Some(mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut stdout).map_err(CommandError::Read)?;
            }
            if let Some(thread) = stderr_thread {
                stderr = thread
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked")))
                    .map_err(CommandError::Read)?;
            }
            Ok::<_, CommandError>(())
        })?;
        let status = self.wait()?;
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }
}
