//! Host functions placed in every module's `OrApi` table.
//!
//! Each call resolves the caller by identity first. Unknown identities get
//! `OR_ERR_INVALID_CALLER`; everything after that is the router's or the
//! logger's decision.

use super::BoundaryHost;
use super::handler::NativeHandler;
use crate::capabilities::Capabilities;
use crate::context::RequestContext;
use crate::modules::muid::MuidDisplay;
use host_bridge::{
    HttpHandlerFn, LogLevel, Muid, OR_ERR_INVALID_ARGUMENT, OR_ERR_INVALID_CALLER,
    OR_ERR_LOGGING_CAP, OR_SUCCESS, OrCtx, OrHost,
};
use std::ffi::{CStr, c_char, c_void};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Recover the host behind an `OrApi::host` pointer.
///
/// # Safety
///
/// `host` must be null or the pointer the host placed in an `OrApi` table,
/// and the owning module must still be alive.
unsafe fn resolve_host<'a>(host: *const OrHost) -> Option<&'a BoundaryHost> {
    unsafe { host.cast::<BoundaryHost>().as_ref() }
}

/// Borrow a NUL-terminated UTF-8 string from a module.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Per-request context behind a handler's `ctx` pointer.
///
/// # Safety
///
/// `ctx` must be null or the pointer passed to the handler currently running.
unsafe fn request_context<'a>(ctx: *mut OrCtx) -> Option<&'a mut RequestContext> {
    unsafe { ctx.cast::<RequestContext>().as_mut() }
}

pub(crate) extern "C" fn register_http(
    host: *const OrHost,
    muid: Muid,
    path: *const c_char,
    method_mask: u8,
    handler: HttpHandlerFn,
    extra: *mut c_void,
) -> u64 {
    // SAFETY: `host` comes from the caller's own `OrApi` table.
    let Some(host) = (unsafe { resolve_host(host) }) else {
        return OR_ERR_INVALID_CALLER;
    };
    let (Some(caps), Some(module)) = (
        host.registry.capabilities(muid),
        host.libraries.get(&muid).map(|m| m.value().clone()),
    ) else {
        warn!(muid = %MuidDisplay(muid), "register_http from unknown caller");
        return OR_ERR_INVALID_CALLER;
    };
    // SAFETY: the module passes a string it owns for the duration of the call.
    let Some(path) = (unsafe { borrow_str(path) }) else {
        return OR_ERR_INVALID_ARGUMENT;
    };

    let handler = Arc::new(NativeHandler::new(handler, extra, muid, module));
    match host.router.register(caps, method_mask, path, handler) {
        Ok(()) => OR_SUCCESS,
        Err(e) => e.status_code(),
    }
}

pub(crate) extern "C" fn unregister_http(
    host: *const OrHost,
    muid: Muid,
    path: *const c_char,
    method_mask: u8,
) -> u64 {
    // SAFETY: `host` comes from the caller's own `OrApi` table.
    let Some(host) = (unsafe { resolve_host(host) }) else {
        return OR_ERR_INVALID_CALLER;
    };
    let Some(caps) = host.registry.capabilities(muid) else {
        warn!(muid = %MuidDisplay(muid), "unregister_http from unknown caller");
        return OR_ERR_INVALID_CALLER;
    };
    // SAFETY: the module passes a string it owns for the duration of the call.
    let Some(path) = (unsafe { borrow_str(path) }) else {
        return OR_ERR_INVALID_ARGUMENT;
    };

    match host.router.unregister(caps, method_mask, path) {
        Ok(()) => OR_SUCCESS,
        Err(e) => e.status_code(),
    }
}

pub(crate) extern "C" fn log(
    host: *const OrHost,
    muid: Muid,
    level: u32,
    msg: *const c_char,
    location: *const c_char,
) -> u64 {
    // SAFETY: `host` comes from the caller's own `OrApi` table.
    let Some(host) = (unsafe { resolve_host(host) }) else {
        return OR_ERR_INVALID_CALLER;
    };
    let Some(module) = host.registry.lookup(muid) else {
        return OR_ERR_INVALID_CALLER;
    };
    let Some(level) = LogLevel::from_raw(level) else {
        return OR_ERR_INVALID_ARGUMENT;
    };

    let needed = match level {
        LogLevel::Fatal => Capabilities::LOGGING_FATAL,
        _ => Capabilities::LOGGING,
    };
    if !module.capabilities.has(Capabilities::LOGGING) || !module.capabilities.has(needed) {
        warn!(
            module = %module.name,
            capabilities = %module.capabilities,
            needed = %needed,
            "Insufficient capabilities to log"
        );
        return OR_ERR_LOGGING_CAP;
    }

    // SAFETY: both strings are owned by the module for the duration of the call.
    let Some(msg) = (unsafe { borrow_str(msg) }) else {
        return OR_ERR_INVALID_ARGUMENT;
    };
    let location = unsafe { borrow_str(location) }.unwrap_or("");

    let name = module.name.as_str();
    match level {
        LogLevel::Debug => debug!(target: "module", module = name, location, "{}", msg),
        LogLevel::Info => info!(target: "module", module = name, location, "{}", msg),
        LogLevel::Warn => warn!(target: "module", module = name, location, "{}", msg),
        LogLevel::Error => error!(target: "module", module = name, location, "{}", msg),
        LogLevel::Fatal => error!(target: "module", module = name, location, fatal = true, "{}", msg),
    }
    OR_SUCCESS
}

pub(crate) extern "C" fn response_set_status(ctx: *mut OrCtx, status: u16) {
    // SAFETY: only ever called from inside a handler with its own `ctx`.
    if let Some(ctx) = unsafe { request_context(ctx) } {
        ctx.set_status(status);
    }
}

pub(crate) extern "C" fn response_set_header(ctx: *mut OrCtx, name: *const c_char, value: *const c_char) -> u64 {
    // SAFETY: only ever called from inside a handler with its own `ctx`;
    // strings are owned by the module for the duration of the call.
    let (Some(ctx), Some(name), Some(value)) = (unsafe {
        (
            request_context(ctx),
            borrow_str(name),
            borrow_str(value),
        )
    }) else {
        return OR_ERR_INVALID_ARGUMENT;
    };
    if name.is_empty() {
        return OR_ERR_INVALID_ARGUMENT;
    }
    ctx.set_header(name, value);
    OR_SUCCESS
}

pub(crate) extern "C" fn response_write(ctx: *mut OrCtx, data: *const u8, len: usize) {
    if len == 0 || data.is_null() {
        return;
    }
    // SAFETY: only ever called from inside a handler with its own `ctx`;
    // `data` points at `len` readable bytes owned by the module.
    unsafe {
        if let Some(ctx) = request_context(ctx) {
            ctx.write(std::slice::from_raw_parts(data, len));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_response_callbacks_fill_context() {
        let mut ctx = RequestContext::new("GET", "/");
        let raw = (&mut ctx as *mut RequestContext).cast::<OrCtx>();

        response_set_status(raw, 201);
        let name = CString::new("X-Module").unwrap();
        let value = CString::new("hello").unwrap();
        assert_eq!(response_set_header(raw, name.as_ptr(), value.as_ptr()), OR_SUCCESS);
        response_write(raw, b"abc".as_ptr(), 3);

        assert_eq!(ctx.status, 201);
        assert_eq!(ctx.headers, vec![("X-Module".to_string(), "hello".to_string())]);
        assert_eq!(ctx.body, b"abc");
    }

    #[test]
    fn test_response_callbacks_reject_null() {
        let value = CString::new("v").unwrap();
        assert_eq!(
            response_set_header(std::ptr::null_mut(), value.as_ptr(), value.as_ptr()),
            OR_ERR_INVALID_ARGUMENT
        );

        let mut ctx = RequestContext::new("GET", "/");
        let raw = (&mut ctx as *mut RequestContext).cast::<OrCtx>();
        assert_eq!(
            response_set_header(raw, std::ptr::null(), value.as_ptr()),
            OR_ERR_INVALID_ARGUMENT
        );
        response_write(raw, std::ptr::null(), 10);
        response_set_status(std::ptr::null_mut(), 500);
        assert!(ctx.body.is_empty());
        assert!(ctx.headers.is_empty());
    }

    #[test]
    fn test_null_host_is_invalid_caller() {
        let path = CString::new("/x").unwrap();
        assert_eq!(
            unregister_http(std::ptr::null(), 1, path.as_ptr(), 0),
            OR_ERR_INVALID_CALLER
        );
        assert_eq!(
            log(std::ptr::null(), 1, 1, path.as_ptr(), std::ptr::null()),
            OR_ERR_INVALID_CALLER
        );
    }
}
