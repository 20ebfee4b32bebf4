// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The launch sequence.

use crate::backend::CreatedProcess;
use crate::backend::LogonBackend;
use crate::error::LaunchError;
use crate::lifecycle;
use crate::lifecycle::CreationHandles;
use crate::lifecycle::HandleDisposition;
use crate::lifecycle::Owner;
use crate::marshal;
use crate::request::LaunchRequest;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use tracing::instrument;

/// The stages of a single launch. No stage is retried.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaunchState {
    /// Checking the request and building native parameters.
    Validating,
    /// Inside the native create call.
    Launching,
    /// Reopening the new process by identifier.
    Reacquiring,
    /// Applying the ownership rule to the raw creation handles.
    Disposing,
    /// The launch completed.
    Succeeded,
    /// The launch failed. Raw handles were already reconciled.
    Failed,
}

impl LaunchState {
    /// A short name for the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchState::Validating => "validating",
            LaunchState::Launching => "launching",
            LaunchState::Reacquiring => "reacquiring",
            LaunchState::Disposing => "disposing",
            LaunchState::Succeeded => "succeeded",
            LaunchState::Failed => "failed",
        }
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(state: LaunchState) {
    tracing::trace!(state = state.as_str(), "launch state");
}

fn fail(err: LaunchError) -> LaunchError {
    enter(LaunchState::Failed);
    tracing::debug!(
        op = err.op(),
        error = &err as &dyn std::error::Error,
        "launch failed"
    );
    err
}

/// A successfully launched process.
#[derive(Debug)]
pub struct LaunchResult<H, P> {
    /// The process identifier.
    pub pid: u32,
    /// The process object, obtained by identifier lookup.
    pub process: P,
    /// The raw creation handles, if the caller opted in to owning them.
    pub handles: HandleDisposition<H>,
}

/// Launches processes through a [`LogonBackend`].
///
/// A launcher holds no per-launch state. If the backend is `Sync`, one
/// launcher can serve concurrent launches.
#[derive(Debug, Default, Clone)]
pub struct Launcher<B> {
    backend: B,
}

impl<B: LogonBackend> Launcher<B> {
    /// Creates a launcher over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Launches `program` with `args`, as described by `request`.
    ///
    /// The request is consumed, so any credentials in it are dropped when
    /// this returns. On success the raw creation handles are either in
    /// [`LaunchResult::handles`] (if the request carried native attributes)
    /// or already closed. On failure no raw handle remains open.
    #[instrument(
        name = "launch",
        skip_all,
        fields(program = %program.as_ref().display(), pid = tracing::field::Empty)
    )]
    pub fn launch<I, S>(
        &self,
        program: impl AsRef<Path>,
        args: I,
        request: LaunchRequest<'_>,
    ) -> Result<LaunchResult<B::Handle, B::Process>, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();

        enter(LaunchState::Validating);
        let owner = Owner::for_request(request.has_native_attributes());
        let params =
            marshal::marshal(program, &request, || self.backend.environment()).map_err(fail)?;

        enter(LaunchState::Launching);
        let CreatedProcess {
            pid,
            process,
            thread,
        } = self
            .backend
            .create_process(program, &args, &params)
            .map_err(|source| {
                fail(LaunchError::ForkExec {
                    program: program.to_owned(),
                    source,
                })
            })?;
        tracing::Span::current().record("pid", pid);
        let handles = CreationHandles::new(process, thread);

        enter(LaunchState::Reacquiring);
        let process = match self.backend.find_process(pid) {
            Ok(process) => process,
            Err(source) => {
                enter(LaunchState::Disposing);
                // There is no result to carry exposed handles back to the
                // caller, so they are released here whoever owns them.
                lifecycle::release(handles);
                return Err(fail(LaunchError::FindProcess {
                    program: program.to_owned(),
                    pid,
                    source,
                }));
            }
        };

        enter(LaunchState::Disposing);
        let handles = lifecycle::dispose(handles, owner);

        enter(LaunchState::Succeeded);
        tracing::debug!(pid, exposed = handles.is_exposed(), "launched process");
        Ok(LaunchResult {
            pid,
            process,
            handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProcessObject;
    use crate::request::Credentials;
    use crate::request::NativeAttributes;
    use crate::test_support::init_tracing;
    use crate::test_support::FakeBackend;
    use crate::NativeHandle;

    const NO_ARGS: [&str; 0] = [];

    #[test]
    fn managed_handles_are_closed() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        for _ in 0..16 {
            let result = launcher
                .launch("prog", NO_ARGS, LaunchRequest::new())
                .unwrap();
            assert!(matches!(result.handles, HandleDisposition::Managed));
        }
        let table = &launcher.backend().table;
        assert_eq!(table.open_count(), 0);
        assert_eq!(table.closed_count(), 32);
        assert_eq!(table.dropped_count(), 0);
    }

    #[test]
    fn exposed_handles_belong_to_caller() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        let mut request = LaunchRequest::new();
        request.native_attributes(NativeAttributes::new());
        let result = launcher.launch("prog", ["0"], request).unwrap();

        let table = &launcher.backend().table;
        let handles = result.handles.exposed().expect("handles exposed");
        assert!(table.is_open(handles.process()));
        assert!(table.is_open(handles.thread()));
        assert_ne!(handles.process().id(), handles.thread().id());
        assert_eq!(table.closed_count(), 0);

        let (process, thread) = handles.into_parts();
        thread.close().unwrap();
        process.close().unwrap();
        assert_eq!(table.open_count(), 0);
        assert_eq!(table.closed_count(), 2);
    }

    #[test]
    fn missing_directory_fails_before_create() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        let mut request = LaunchRequest::new();
        request.directory(std::env::temp_dir().join("logon_process-missing-dir"));
        let err = launcher.launch("prog", NO_ARGS, request).unwrap_err();
        assert_eq!(err.op(), "chdir");
        assert!(launcher.backend().calls().is_empty());
    }

    #[test]
    fn create_failure_is_fork_exec() {
        init_tracing();
        let mut backend = FakeBackend::new();
        backend.fail_create = Some(1326);
        let launcher = Launcher::new(backend);
        let err = launcher
            .launch("C:\\tools\\prog.exe", NO_ARGS, LaunchRequest::new())
            .unwrap_err();
        assert_eq!(err.op(), "fork/exec");
        assert_eq!(err.path(), Path::new("C:\\tools\\prog.exe"));
        assert_eq!(err.raw_os_error(), Some(1326));
        assert_eq!(launcher.backend().calls().len(), 1);
        assert_eq!(launcher.backend().table.open_count(), 0);
    }

    #[test]
    fn lookup_failure_closes_managed_handles() {
        init_tracing();
        let mut backend = FakeBackend::new();
        backend.fail_lookup = true;
        let launcher = Launcher::new(backend);
        let err = launcher
            .launch("prog", NO_ARGS, LaunchRequest::new())
            .unwrap_err();
        assert_eq!(err.op(), "findprocess");
        assert!(matches!(err, LaunchError::FindProcess { pid: 100, .. }));
        let table = &launcher.backend().table;
        assert_eq!(table.open_count(), 0);
        assert_eq!(table.closed_count(), 2);
    }

    #[test]
    fn lookup_failure_does_not_leak_exposed_handles() {
        init_tracing();
        let mut backend = FakeBackend::new();
        backend.fail_lookup = true;
        let launcher = Launcher::new(backend);
        let mut request = LaunchRequest::new();
        request.native_attributes(NativeAttributes::new());
        launcher.launch("prog", NO_ARGS, request).unwrap_err();
        assert_eq!(launcher.backend().table.open_count(), 0);
        assert_eq!(launcher.backend().table.closed_count(), 2);
    }

    #[test]
    fn close_failure_does_not_fail_launch() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        launcher.backend().table.fail_closes(true);
        let result = launcher
            .launch("prog", NO_ARGS, LaunchRequest::new())
            .unwrap();
        assert!(!result.handles.is_exposed());
        assert_eq!(launcher.backend().table.close_attempts(), 2);
    }

    #[test]
    fn environment_snapshot_taken_at_launch() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        let request = LaunchRequest::new();
        assert_eq!(launcher.backend().environment_reads(), 0);
        launcher.launch("prog", NO_ARGS, request).unwrap();
        assert_eq!(launcher.backend().environment_reads(), 1);
        assert_eq!(
            launcher.backend().calls()[0].environment,
            vec![("FAKE_ENV".into(), "1".into())]
        );
    }

    #[test]
    fn request_reaches_backend() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        let dir = std::env::temp_dir();
        let mut attributes = NativeAttributes::new();
        attributes.credentials(Credentials::new("bob", None::<String>, "pw"));
        let mut request = LaunchRequest::new();
        request
            .directory(&dir)
            .env("A", "1")
            .closed_file()
            .native_attributes(attributes);
        let result = launcher.launch("prog", ["7", "x y"], request).unwrap();

        let calls = launcher.backend().calls();
        let call = &calls[0];
        assert_eq!(call.program, Path::new("prog"));
        assert_eq!(call.args, [OsString::from("7"), OsString::from("x y")]);
        assert_eq!(call.directory.as_deref(), Some(dir.as_path()));
        assert_eq!(call.environment, vec![("A".into(), "1".into())]);
        assert_eq!(call.open_files, [false]);
        assert!(call.had_attributes);
        assert!(call.had_credentials);
        assert_eq!(launcher.backend().environment_reads(), 0);

        assert_eq!(result.process.wait().unwrap().code(), 7);
        result.handles.exposed().unwrap().close().unwrap();
    }

    #[test]
    fn concurrent_launches_are_independent() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        let results = std::thread::scope(|s| {
            let a = s.spawn(|| {
                let mut request = LaunchRequest::new();
                request.native_attributes(NativeAttributes::new());
                launcher.launch("a", ["3"], request).unwrap()
            });
            let b = s.spawn(|| {
                let mut request = LaunchRequest::new();
                request.native_attributes(NativeAttributes::new());
                launcher.launch("b", ["5"], request).unwrap()
            });
            [a.join().unwrap(), b.join().unwrap()]
        });

        let [a, b] = results;
        assert_ne!(a.pid, b.pid);
        assert_eq!(a.process.id(), a.pid);
        assert_eq!(b.process.id(), b.pid);
        assert_eq!(a.process.wait().unwrap().code(), 3);
        assert_eq!(b.process.wait().unwrap().code(), 5);
        assert_eq!(launcher.backend().table.open_count(), 4);
        a.handles.exposed().unwrap().close().unwrap();
        b.handles.exposed().unwrap().close().unwrap();
        assert_eq!(launcher.backend().table.open_count(), 0);
    }

    #[test]
    fn process_object_outlives_raw_handles() {
        init_tracing();
        let launcher = Launcher::new(FakeBackend::new());
        let result = launcher.launch("prog", ["9"], LaunchRequest::new()).unwrap();
        assert_eq!(launcher.backend().table.open_count(), 0);
        assert_eq!(result.process.try_wait().unwrap().map(|s| s.code()), Some(9));
        result.process.kill().unwrap();
        assert!(!result.process.wait().unwrap().success());
    }
}
