// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Launching processes under explicit logon credentials, and managing the raw
//! native handles such a launch produces.
//!
//! A launch produces two references to the new process: the raw creation
//! handles returned by the native create call, and a portable process object
//! obtained afterwards by looking the process up by its identifier. The raw
//! handles have exactly one owner, decided by whether the caller supplied a
//! [`NativeAttributes`] block:
//!
//! * with a block, the handles are returned to the caller in
//!   [`HandleDisposition::Exposed`], and the caller closes them;
//! * without one, they are closed before [`Launcher::launch`] returns.
//!
//! The process object in [`LaunchResult::process`] stays usable for waiting
//! and killing regardless of what happens to the raw handles.

pub mod backend;
mod error;
mod launch;
mod lifecycle;
pub mod marshal;
mod request;
#[cfg(test)]
mod test_support;
pub mod windows;

pub use backend::CreatedProcess;
pub use backend::ExitStatus;
pub use backend::LogonBackend;
pub use backend::NativeHandle;
pub use backend::ProcessObject;
pub use error::LaunchError;
pub use launch::LaunchResult;
pub use launch::LaunchState;
pub use launch::Launcher;
pub use lifecycle::CreationHandles;
pub use lifecycle::HandleDisposition;
pub use lifecycle::Owner;
pub use request::AsNative;
pub use request::BorrowedNative;
pub use request::Credentials;
pub use request::LaunchRequest;
pub use request::LogonFlags;
pub use request::NativeAttributes;

#[cfg(windows)]
pub use windows::launch;
