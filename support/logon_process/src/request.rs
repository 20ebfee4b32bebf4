// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Launch requests and the native attribute block.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// A borrowed native file reference that can be inherited by a child.
#[cfg(windows)]
pub type BorrowedNative<'a> = std::os::windows::io::BorrowedHandle<'a>;
/// A borrowed native file reference that can be inherited by a child.
#[cfg(unix)]
pub type BorrowedNative<'a> = std::os::unix::io::BorrowedFd<'a>;

/// Types that can lend their native handle to a [`LaunchRequest`].
pub trait AsNative {
    /// Borrows the underlying native handle.
    fn as_native(&self) -> BorrowedNative<'_>;
}

#[cfg(windows)]
impl<T: std::os::windows::io::AsHandle> AsNative for T {
    fn as_native(&self) -> BorrowedNative<'_> {
        self.as_handle()
    }
}

#[cfg(unix)]
impl<T: std::os::unix::io::AsFd> AsNative for T {
    fn as_native(&self) -> BorrowedNative<'_> {
        self.as_fd()
    }
}

/// Logon options for a credentialed launch.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LogonFlags {
    /// Log on and load the user's profile.
    #[default]
    WithProfile,
    /// Use the credentials on the network only. The new process runs with
    /// the caller's local identity.
    NetCredentialsOnly,
}

impl LogonFlags {
    /// Returns the native `dwLogonFlags` value.
    pub const fn bits(self) -> u32 {
        match self {
            LogonFlags::WithProfile => 0x1,
            LogonFlags::NetCredentialsOnly => 0x2,
        }
    }
}

/// Credentials for a single logon.
///
/// The password is wiped from memory when the credentials are dropped. They
/// are consumed by the launch they are passed to and never stored.
pub struct Credentials {
    username: String,
    domain: Option<String>,
    password: String,
}

impl Credentials {
    /// Creates credentials for `username` with `password`.
    ///
    /// If `domain` is `None`, `username` must be in UPN form
    /// (`user@domain`) or name a local account.
    pub fn new(
        username: impl Into<String>,
        domain: Option<impl Into<String>>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            domain: domain.map(Into::into),
            password: password.into(),
        }
    }

    /// The account name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The account domain, if any.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    #[cfg(windows)]
    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.password).into_bytes();
        bytes.fill(0);
        std::hint::black_box(&bytes);
    }
}

/// The native attribute block.
///
/// Supplying this block to a launch opts the caller into ownership of the raw
/// creation handles: they are returned in
/// [`HandleDisposition::Exposed`](crate::HandleDisposition::Exposed) and
/// must be closed by the caller. It also skips the working directory
/// pre-check, since the native logon call validates the directory itself.
#[derive(Debug, Default)]
pub struct NativeAttributes {
    pub(crate) credentials: Option<Credentials>,
    pub(crate) logon_flags: LogonFlags,
    pub(crate) creation_flags: u32,
    pub(crate) hide_window: bool,
}

impl NativeAttributes {
    /// Creates an empty attribute block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the credentials to log on with.
    ///
    /// Without credentials the process is created under the current user.
    pub fn credentials(&mut self, credentials: Credentials) -> &mut Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the logon flags. Defaults to [`LogonFlags::WithProfile`].
    pub fn logon_flags(&mut self, flags: LogonFlags) -> &mut Self {
        self.logon_flags = flags;
        self
    }

    /// Sets additional native process creation flags.
    pub fn creation_flags(&mut self, flags: u32) -> &mut Self {
        self.creation_flags = flags;
        self
    }

    /// Starts the process with its main window hidden.
    pub fn hide_window(&mut self, hide: bool) -> &mut Self {
        self.hide_window = hide;
        self
    }

    /// Returns true if credentials were supplied.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

/// A description of a single launch.
///
/// A request is consumed by the launch it describes, so any credentials it
/// carries do not outlive the call.
#[derive(Debug, Default)]
pub struct LaunchRequest<'a> {
    pub(crate) directory: Option<PathBuf>,
    pub(crate) environment: Option<Vec<(OsString, OsString)>>,
    pub(crate) files: Vec<Option<BorrowedNative<'a>>>,
    pub(crate) native_attributes: Option<NativeAttributes>,
}

impl<'a> LaunchRequest<'a> {
    /// Creates an empty request: current directory, inherited environment,
    /// no inherited files, no native attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the working directory of the new process.
    pub fn directory(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.directory = Some(dir.into());
        self
    }

    /// Replaces the environment of the new process.
    ///
    /// Without this, the new process receives the launching process's
    /// environment as it is at launch time.
    pub fn environment<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.environment = Some(
            vars.into_iter()
                .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
                .collect(),
        );
        self
    }

    /// Appends `key=val` to the environment, starting from an empty
    /// environment if none was set.
    pub fn env(&mut self, key: impl AsRef<OsStr>, val: impl AsRef<OsStr>) -> &mut Self {
        self.environment
            .get_or_insert_with(Vec::new)
            .push((key.as_ref().to_owned(), val.as_ref().to_owned()));
        self
    }

    /// Appends an inherited file. Positions 0, 1 and 2 are standard input,
    /// output and error.
    pub fn file(&mut self, file: &'a impl AsNative) -> &mut Self {
        self.files.push(Some(file.as_native()));
        self
    }

    /// Appends a file position that is closed in the new process.
    pub fn closed_file(&mut self) -> &mut Self {
        self.files.push(None);
        self
    }

    /// Supplies the native attribute block, taking ownership of the raw
    /// creation handles for this launch.
    pub fn native_attributes(&mut self, attributes: NativeAttributes) -> &mut Self {
        self.native_attributes = Some(attributes);
        self
    }

    /// Returns true if a native attribute block was supplied.
    pub fn has_native_attributes(&self) -> bool {
        self.native_attributes.is_some()
    }
}
