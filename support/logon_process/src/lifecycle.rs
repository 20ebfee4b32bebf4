// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ownership of raw creation handles.

use crate::backend::NativeHandle;
use std::io;

/// The party responsible for closing a launch's raw creation handles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Owner {
    /// The caller supplied a native attribute block and closes the handles.
    Caller,
    /// The launcher closes the handles before returning.
    Subsystem,
}

impl Owner {
    /// Determines ownership from whether a native attribute block was
    /// supplied. Fixed for the duration of the launch.
    pub fn for_request(has_native_attributes: bool) -> Self {
        if has_native_attributes {
            Owner::Caller
        } else {
            Owner::Subsystem
        }
    }
}

/// The raw process and thread handles of a newly created process.
///
/// Each handle is closed exactly once: by [`CreationHandles::close`], or by
/// whatever the caller does with the parts from
/// [`CreationHandles::into_parts`].
#[derive(Debug)]
#[must_use = "raw creation handles must be closed by their owner"]
pub struct CreationHandles<H> {
    process: H,
    thread: H,
}

impl<H: NativeHandle> CreationHandles<H> {
    pub(crate) fn new(process: H, thread: H) -> Self {
        Self { process, thread }
    }

    /// The raw process handle.
    pub fn process(&self) -> &H {
        &self.process
    }

    /// The raw handle to the initial thread.
    pub fn thread(&self) -> &H {
        &self.thread
    }

    /// Takes the handles apart, returning `(process, thread)`.
    pub fn into_parts(self) -> (H, H) {
        (self.process, self.thread)
    }

    /// Closes both handles.
    ///
    /// Both are closed even if the first close fails; the first error is
    /// returned.
    pub fn close(self) -> io::Result<()> {
        let thread = self.thread.close();
        let process = self.process.close();
        thread.and(process)
    }
}

/// What happened to a launch's raw creation handles.
#[derive(Debug)]
pub enum HandleDisposition<H> {
    /// The caller opted in and now owns the handles.
    Exposed(CreationHandles<H>),
    /// The handles were closed by the launcher.
    Managed,
}

impl<H> HandleDisposition<H> {
    /// Returns true if the handles were handed to the caller.
    pub fn is_exposed(&self) -> bool {
        matches!(self, HandleDisposition::Exposed(_))
    }

    /// Returns the exposed handles, if any.
    pub fn exposed(self) -> Option<CreationHandles<H>> {
        match self {
            HandleDisposition::Exposed(handles) => Some(handles),
            HandleDisposition::Managed => None,
        }
    }
}

/// Applies the ownership rule to freshly created handles.
pub(crate) fn dispose<H: NativeHandle>(
    handles: CreationHandles<H>,
    owner: Owner,
) -> HandleDisposition<H> {
    match owner {
        Owner::Caller => HandleDisposition::Exposed(handles),
        Owner::Subsystem => {
            release(handles);
            HandleDisposition::Managed
        }
    }
}

/// Closes both handles, logging rather than returning close failures so that
/// they never mask the outcome of the launch.
pub(crate) fn release<H: NativeHandle>(handles: CreationHandles<H>) {
    let CreationHandles { process, thread } = handles;
    if let Err(err) = thread.close() {
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            "failed to close raw thread handle"
        );
    }
    if let Err(err) = process.close() {
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            "failed to close raw process handle"
        );
    }
}
