// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The native create call.

use super::duplicate_inheritable;
use crate::backend::CreatedProcess;
use crate::marshal;
use crate::marshal::NativeParams;
use crate::request::Credentials;
use crate::request::NativeAttributes;
use std::ffi::OsString;
use std::io;
use std::mem::zeroed;
use std::os::windows::prelude::*;
use std::path::Path;
use std::ptr::null;
use std::ptr::null_mut;
use widestring::U16CString;
use winapi::shared::winerror::ERROR_INVALID_PARAMETER;
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::processenv::GetStdHandle;
use winapi::um::processthreadsapi::CreateProcessW;
use winapi::um::processthreadsapi::DeleteProcThreadAttributeList;
use winapi::um::processthreadsapi::InitializeProcThreadAttributeList;
use winapi::um::processthreadsapi::UpdateProcThreadAttribute;
use winapi::um::processthreadsapi::LPPROC_THREAD_ATTRIBUTE_LIST;
use winapi::um::processthreadsapi::PROCESS_INFORMATION;
use winapi::um::processthreadsapi::STARTUPINFOW;
use winapi::um::winbase::CreateProcessWithLogonW;
use winapi::um::winbase::CREATE_UNICODE_ENVIRONMENT;
use winapi::um::winbase::EXTENDED_STARTUPINFO_PRESENT;
use winapi::um::winbase::STARTF_USESHOWWINDOW;
use winapi::um::winbase::STARTF_USESTDHANDLES;
use winapi::um::winbase::STARTUPINFOEXW;
use winapi::um::winbase::STD_ERROR_HANDLE;
use winapi::um::winbase::STD_INPUT_HANDLE;
use winapi::um::winbase::STD_OUTPUT_HANDLE;
use winapi::um::winuser::SW_HIDE;

const PROC_THREAD_ATTRIBUTE_HANDLE_LIST: u32 = 0x00020002;

const STD_HANDLES: [u32; 3] = [STD_INPUT_HANDLE, STD_OUTPUT_HANDLE, STD_ERROR_HANDLE];

fn null_terminate(v: Vec<u16>) -> io::Result<U16CString> {
    U16CString::from_vec(v)
        .map_err(|_| io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER as i32))
}

fn wide(s: impl AsRef<std::ffi::OsStr>) -> Vec<u16> {
    s.as_ref().encode_wide().collect()
}

fn ptr_or_null<T, U>(v: &Option<U>) -> *const T
where
    U: AsRef<[T]>,
{
    v.as_ref().map(|v| v.as_ref().as_ptr()).unwrap_or(null())
}

struct AttrList(Vec<u8>);

impl AttrList {
    fn new(n: u32) -> io::Result<Self> {
        let mut size = 0;
        // SAFETY: querying the required size; the call is expected to fail
        // with ERROR_INSUFFICIENT_BUFFER.
        unsafe { InitializeProcThreadAttributeList(null_mut(), n, 0, &mut size) };
        let mut v = vec![0; size];
        // SAFETY: the buffer is `size` bytes, as requested above.
        if unsafe { InitializeProcThreadAttributeList(v.as_mut_ptr().cast(), n, 0, &mut size) }
            == 0
        {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(v))
    }

    fn as_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.0.as_mut_ptr().cast()
    }

    fn update<'a, T: ?Sized>(&'a mut self, attr: u32, value: &'a T) -> io::Result<()> {
        // SAFETY: the list is initialized, and `value` is borrowed for as long
        // as the list is.
        unsafe {
            if UpdateProcThreadAttribute(
                self.as_ptr(),
                0,
                attr as usize,
                std::ptr::from_ref(value) as *mut _,
                size_of_val(value),
                null_mut(),
                null_mut(),
            ) == 0
            {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

impl Drop for AttrList {
    fn drop(&mut self) {
        // SAFETY: the list was initialized in `new`.
        unsafe { DeleteProcThreadAttributeList(self.as_ptr()) }
    }
}

fn usable(raw: RawHandle) -> bool {
    !raw.is_null() && raw != INVALID_HANDLE_VALUE
}

/// Encodes a password as a null-terminated wide string in a single
/// allocation, so the only copy is the one the caller wipes.
fn wide_password(password: &str) -> io::Result<Vec<u16>> {
    let len = password.encode_utf16().count();
    let mut buf = Vec::with_capacity(len + 1);
    buf.extend(password.encode_utf16());
    buf.push(0);
    if buf[..len].contains(&0) {
        buf.fill(0);
        return Err(io::Error::from_raw_os_error(ERROR_INVALID_PARAMETER as i32));
    }
    Ok(buf)
}

/// Standard handles for the child, duplicated as inheritable.
///
/// A missing position inherits this process's standard handle. An explicitly
/// closed position gets no handle.
fn standard_handles(params: &NativeParams<'_>) -> io::Result<[Option<OwnedHandle>; 3]> {
    if params.files.len() > STD_HANDLES.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "only the three standard handles can be inherited",
        ));
    }
    let mut handles = [None, None, None];
    for (slot, (i, index)) in handles.iter_mut().zip(STD_HANDLES.into_iter().enumerate()) {
        let source = match params.files.get(i) {
            Some(file) => file.filter(|h| usable(h.as_raw_handle())),
            None => {
                // SAFETY: reading this process's standard handle.
                let raw = unsafe { GetStdHandle(index) };
                // SAFETY: standard handles stay open for the duration of the
                // call.
                usable(raw).then(|| unsafe { BorrowedHandle::borrow_raw(raw) })
            }
        };
        *slot = source.map(duplicate_inheritable).transpose()?;
    }
    Ok(handles)
}

fn raw_or_null(handle: &Option<OwnedHandle>) -> RawHandle {
    handle
        .as_ref()
        .map_or(null_mut(), |h| h.as_raw_handle())
}

/// Calls `CreateProcessWithLogonW` or `CreateProcessW`, exactly once.
pub(super) fn create_process(
    program: &Path,
    args: &[OsString],
    params: &NativeParams<'_>,
) -> io::Result<CreatedProcess<OwnedHandle>> {
    let args: Vec<Vec<u16>> = args.iter().map(wide).collect();
    let mut command_line =
        null_terminate(marshal::command_line(&wide(program), &args))?.into_vec_with_nul();

    let environment: Vec<(Vec<u16>, Vec<u16>)> = params
        .environment
        .iter()
        .map(|(k, v)| (wide(k), wide(v)))
        .collect();
    let mut environment = marshal::environment_block(&environment);

    let directory = params
        .directory
        .map(|dir| null_terminate(wide(dir)))
        .transpose()?;

    let std_handles = standard_handles(params)?;

    // SAFETY: STARTUPINFOW is plain data; all-zero is a valid empty value.
    let mut startup_info: STARTUPINFOW = unsafe { zeroed() };
    startup_info.cb = size_of::<STARTUPINFOW>() as u32;
    startup_info.dwFlags = STARTF_USESTDHANDLES;
    startup_info.hStdInput = raw_or_null(&std_handles[0]);
    startup_info.hStdOutput = raw_or_null(&std_handles[1]);
    startup_info.hStdError = raw_or_null(&std_handles[2]);

    let attributes = params.attributes;
    if attributes.is_some_and(|a| a.hide_window) {
        startup_info.dwFlags |= STARTF_USESHOWWINDOW;
        startup_info.wShowWindow = SW_HIDE as u16;
    }
    let creation_flags =
        CREATE_UNICODE_ENVIRONMENT | attributes.map_or(0, |a| a.creation_flags);

    // SAFETY: PROCESS_INFORMATION is plain data.
    let mut info: PROCESS_INFORMATION = unsafe { zeroed() };
    let logon = attributes.and_then(|a| Some((a, a.credentials.as_ref()?)));
    match logon {
        Some((attributes, credentials)) => create_with_logon(
            attributes,
            credentials,
            &mut command_line,
            creation_flags,
            &mut environment,
            &directory,
            &mut startup_info,
            &mut info,
        )?,
        None => {
            let handles: Vec<RawHandle> = std_handles
                .iter()
                .flatten()
                .map(|h| h.as_raw_handle())
                .collect();
            let mut list = AttrList::new(1)?;
            let mut startup_info = STARTUPINFOEXW {
                StartupInfo: STARTUPINFOW {
                    cb: size_of::<STARTUPINFOEXW>() as u32,
                    ..startup_info
                },
                lpAttributeList: list.as_ptr(),
            };
            // Restrict inheritance to the standard handles.
            if !handles.is_empty() {
                list.update(PROC_THREAD_ATTRIBUTE_HANDLE_LIST, handles.as_slice())?;
            }
            // SAFETY: all buffers are null terminated and outlive the call.
            let ok = unsafe {
                CreateProcessW(
                    null(),
                    command_line.as_mut_ptr(),
                    null_mut(),
                    null_mut(),
                    (!handles.is_empty()).into(),
                    creation_flags | EXTENDED_STARTUPINFO_PRESENT,
                    environment.as_mut_ptr().cast(),
                    ptr_or_null(&directory),
                    &mut startup_info.StartupInfo,
                    &mut info,
                )
            };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    // SAFETY: both handles were just returned by the create call and are
    // owned by nothing else.
    let (process, thread) = unsafe {
        (
            OwnedHandle::from_raw_handle(info.hProcess),
            OwnedHandle::from_raw_handle(info.hThread),
        )
    };
    Ok(CreatedProcess {
        pid: info.dwProcessId,
        process,
        thread,
    })
}

#[expect(clippy::too_many_arguments)]
fn create_with_logon(
    attributes: &NativeAttributes,
    credentials: &Credentials,
    command_line: &mut [u16],
    creation_flags: u32,
    environment: &mut [u16],
    directory: &Option<U16CString>,
    startup_info: &mut STARTUPINFOW,
    info: &mut PROCESS_INFORMATION,
) -> io::Result<()> {
    let username = null_terminate(wide(credentials.username()))?;
    let domain = credentials
        .domain()
        .map(|d| null_terminate(wide(d)))
        .transpose()?;
    let mut password = wide_password(credentials.password())?;

    // SAFETY: all buffers are null terminated and outlive the call.
    let ok = unsafe {
        CreateProcessWithLogonW(
            username.as_ptr(),
            ptr_or_null(&domain),
            password.as_ptr(),
            attributes.logon_flags.bits(),
            null(),
            command_line.as_mut_ptr(),
            creation_flags,
            environment.as_mut_ptr().cast(),
            ptr_or_null(directory),
            startup_info,
            info,
        )
    };
    let result = if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    };
    password.fill(0);
    std::hint::black_box(&password);
    result
}
