// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A counting fake backend for exercising handle ownership without creating
//! real processes.

use crate::backend::CreatedProcess;
use crate::backend::ExitStatus;
use crate::backend::LogonBackend;
use crate::backend::NativeHandle;
use crate::backend::ProcessObject;
use crate::marshal::NativeParams;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Initializes `tracing` output for tests, once per process.
pub fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let targets = match std::env::var("RUST_LOG") {
            Ok(var) => var.parse().unwrap_or_default(),
            Err(_) => Targets::new().with_default(LevelFilter::TRACE),
        };
        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_test_writer()
            .with_max_level(LevelFilter::TRACE)
            .finish()
            .with(targets)
            .try_init();
    });
}

#[derive(Default)]
struct TableState {
    next: u64,
    open: BTreeSet<u64>,
    closed: usize,
    dropped: usize,
    close_attempts: usize,
    fail_closes: bool,
}

/// Tracks which fake handles are open and how they went away.
#[derive(Clone, Default)]
pub struct HandleTable(Arc<Mutex<TableState>>);

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> FakeHandle {
        let mut state = self.0.lock();
        state.next += 1;
        let id = state.next;
        state.open.insert(id);
        FakeHandle {
            id,
            table: self.clone(),
            consumed: false,
        }
    }

    pub fn fail_closes(&self, fail: bool) {
        self.0.lock().fail_closes = fail;
    }

    /// Handles neither closed nor dropped.
    pub fn open_count(&self) -> usize {
        self.0.lock().open.len()
    }

    /// Handles closed explicitly and successfully.
    pub fn closed_count(&self) -> usize {
        self.0.lock().closed
    }

    /// Handles that were dropped without an explicit close.
    pub fn dropped_count(&self) -> usize {
        self.0.lock().dropped
    }

    pub fn close_attempts(&self) -> usize {
        self.0.lock().close_attempts
    }

    pub fn is_open(&self, handle: &FakeHandle) -> bool {
        self.0.lock().open.contains(&handle.id)
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    id: u64,
    table: HandleTable,
    consumed: bool,
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable").finish_non_exhaustive()
    }
}

impl FakeHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl NativeHandle for FakeHandle {
    fn close(mut self) -> io::Result<()> {
        self.consumed = true;
        let mut state = self.table.0.lock();
        state.close_attempts += 1;
        let was_open = state.open.remove(&self.id);
        if state.fail_closes {
            return Err(io::Error::other("injected close failure"));
        }
        assert!(was_open, "handle {} closed twice", self.id);
        state.closed += 1;
        Ok(())
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if !self.consumed {
            let mut state = self.table.0.lock();
            state.open.remove(&self.id);
            state.dropped += 1;
        }
    }
}

/// A fake process whose exit code is its first numeric argument.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    exit_code: u32,
    killed: AtomicBool,
}

impl ProcessObject for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(ExitStatus::from_raw(1));
        }
        Ok(ExitStatus::from_raw(self.exit_code))
    }

    fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.wait().map(Some)
    }

    fn kill(&self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// What the fake saw on a create call.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub directory: Option<PathBuf>,
    pub environment: Vec<(OsString, OsString)>,
    pub open_files: Vec<bool>,
    pub had_attributes: bool,
    pub had_credentials: bool,
}

pub struct FakeBackend {
    pub table: HandleTable,
    pub environment: Vec<(OsString, OsString)>,
    pub fail_create: Option<i32>,
    pub fail_lookup: bool,
    next_pid: AtomicU32,
    environment_reads: AtomicUsize,
    calls: Mutex<Vec<CreateCall>>,
    exit_codes: Mutex<HashMap<u32, u32>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            table: HandleTable::new(),
            environment: vec![("FAKE_ENV".into(), "1".into())],
            fail_create: None,
            fail_lookup: false,
            next_pid: AtomicU32::new(100),
            environment_reads: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            exit_codes: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<CreateCall> {
        self.calls.lock().clone()
    }

    pub fn environment_reads(&self) -> usize {
        self.environment_reads.load(Ordering::SeqCst)
    }
}

impl LogonBackend for FakeBackend {
    type Handle = FakeHandle;
    type Process = FakeProcess;

    fn environment(&self) -> Vec<(OsString, OsString)> {
        self.environment_reads.fetch_add(1, Ordering::SeqCst);
        self.environment.clone()
    }

    fn create_process(
        &self,
        program: &Path,
        args: &[OsString],
        params: &NativeParams<'_>,
    ) -> io::Result<CreatedProcess<FakeHandle>> {
        self.calls.lock().push(CreateCall {
            program: program.to_owned(),
            args: args.to_vec(),
            directory: params.directory.map(Path::to_owned),
            environment: params.environment.clone(),
            open_files: params.files.iter().map(Option::is_some).collect(),
            had_attributes: params.attributes.is_some(),
            had_credentials: params.attributes.is_some_and(|a| a.has_credentials()),
        });
        if let Some(code) = self.fail_create {
            return Err(io::Error::from_raw_os_error(code));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let exit_code = args
            .first()
            .and_then(|arg| arg.to_str())
            .and_then(|arg| arg.parse().ok())
            .unwrap_or(0);
        self.exit_codes.lock().insert(pid, exit_code);
        Ok(CreatedProcess {
            pid,
            process: self.table.open(),
            thread: self.table.open(),
        })
    }

    fn find_process(&self, pid: u32) -> io::Result<FakeProcess> {
        if self.fail_lookup {
            return Err(io::ErrorKind::NotFound.into());
        }
        let exit_code = *self
            .exit_codes
            .lock()
            .get(&pid)
            .ok_or(io::ErrorKind::NotFound)?;
        Ok(FakeProcess {
            pid,
            exit_code,
            killed: AtomicBool::new(false),
        })
    }
}
