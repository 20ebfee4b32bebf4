// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Translation of a [`LaunchRequest`] into native creation parameters.
//!
//! Everything here runs before any OS resource is created, so a failure
//! leaves nothing behind.

use crate::error::LaunchError;
use crate::request::BorrowedNative;
use crate::request::LaunchRequest;
use crate::request::NativeAttributes;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::Path;

/// Native creation parameters derived from a [`LaunchRequest`].
#[derive(Debug)]
pub struct NativeParams<'a> {
    /// The working directory, if one was requested.
    pub directory: Option<&'a Path>,
    /// The complete environment of the new process.
    pub environment: Vec<(OsString, OsString)>,
    /// The inherited descriptor table. `None` entries are closed in the child.
    pub files: Vec<Option<BorrowedNative<'a>>>,
    /// The native attribute block, if the caller supplied one.
    pub attributes: Option<&'a NativeAttributes>,
}

/// Builds the native parameters for launching `program`.
///
/// `environ` is only called when the request does not carry its own
/// environment.
pub(crate) fn marshal<'a>(
    program: &Path,
    request: &'a LaunchRequest<'_>,
    environ: impl FnOnce() -> Vec<(OsString, OsString)>,
) -> Result<NativeParams<'a>, LaunchError> {
    let directory = request
        .directory
        .as_deref()
        .filter(|dir| !dir.as_os_str().is_empty());

    // With native attributes the logon call validates the directory as part
    // of establishing the new security context.
    if request.native_attributes.is_none() {
        if let Some(dir) = directory {
            if let Err(source) = std::fs::metadata(dir) {
                return Err(LaunchError::Chdir {
                    path: dir.to_owned(),
                    source,
                });
            }
        }
    }

    let environment = match &request.environment {
        Some(env) => env.clone(),
        None => environ(),
    };
    let environment = normalize_environment(environment).map_err(|source| {
        LaunchError::ForkExec {
            program: program.to_owned(),
            source,
        }
    })?;

    Ok(NativeParams {
        directory,
        environment,
        files: request.files.clone(),
        attributes: request.native_attributes.as_ref(),
    })
}

/// Validates environment entries and removes duplicate keys.
///
/// Keys compare ASCII case-insensitively. A later entry overrides the value
/// of an earlier one but keeps the earlier entry's position.
pub fn normalize_environment(
    vars: Vec<(OsString, OsString)>,
) -> io::Result<Vec<(OsString, OsString)>> {
    let mut out: Vec<(OsString, OsString)> = Vec::with_capacity(vars.len());
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    for (key, val) in vars {
        let key_bytes = key.as_encoded_bytes();
        // A leading '=' is allowed for the per-drive current directory
        // entries, e.g. "=C:".
        if key_bytes.is_empty()
            || key_bytes[1..].contains(&b'=')
            || key_bytes.contains(&0)
            || val.as_encoded_bytes().contains(&0)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid environment variable {key:?}"),
            ));
        }
        match index.entry(key_bytes.to_ascii_uppercase()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                out[*entry.get()].1 = val;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(out.len());
                out.push((key, val));
            }
        }
    }
    Ok(out)
}

/// Appends `arg` to a wide command line, quoting it so that it parses back
/// as a single argument under the MSVC runtime rules.
pub fn append_quoted_arg(cmd: &mut Vec<u16>, arg: &[u16]) {
    const QUOTE: u16 = b'"' as u16;
    const BACKSLASH: u16 = b'\\' as u16;

    let quote = arg.is_empty()
        || arg
            .iter()
            .any(|&c| c == u16::from(b' ') || c == u16::from(b'\t'));
    if quote {
        cmd.push(QUOTE);
    }
    let mut backslashes = 0;
    for &c in arg {
        if c == BACKSLASH {
            backslashes += 1;
        } else {
            if c == QUOTE {
                // Backslashes before a quote are literal only when doubled,
                // and the quote itself needs one more.
                cmd.extend(std::iter::repeat(BACKSLASH).take(backslashes + 1));
            }
            backslashes = 0;
        }
        cmd.push(c);
    }
    if quote {
        // Trailing backslashes would otherwise escape the closing quote.
        cmd.extend(std::iter::repeat(BACKSLASH).take(backslashes));
        cmd.push(QUOTE);
    }
}

/// Builds a wide command line from a program and its arguments, without a
/// terminating null.
pub fn command_line<A: AsRef<[u16]>>(program: &[u16], args: &[A]) -> Vec<u16> {
    let mut cmd = Vec::new();
    append_quoted_arg(&mut cmd, program);
    for arg in args {
        cmd.push(u16::from(b' '));
        append_quoted_arg(&mut cmd, arg.as_ref());
    }
    cmd
}

/// Encodes an environment block: `key=value` entries, each null terminated,
/// followed by a final null.
///
/// Entries must already be validated with [`normalize_environment`].
pub fn environment_block<K, V>(vars: &[(K, V)]) -> Vec<u16>
where
    K: AsRef<[u16]>,
    V: AsRef<[u16]>,
{
    let mut block = Vec::new();
    for (key, val) in vars {
        block.extend_from_slice(key.as_ref());
        block.push(u16::from(b'='));
        block.extend_from_slice(val.as_ref());
        block.push(0);
    }
    // An empty block still needs two terminators.
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}
