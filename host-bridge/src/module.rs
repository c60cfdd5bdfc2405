//! Safe wrappers for modules written in Rust.
//!
//! C modules call the function pointers in [`OrApi`] directly; Rust modules
//! can wrap the table once in `or_module_init` and use these helpers instead.

use std::ffi::{c_void, CStr};

use crate::error::{BridgeError, BridgeResult};
use crate::log::LogLevel;
use crate::{HttpHandlerFn, Muid, OrApi, OrCtx};

/// Borrowed view of the host API table.
#[derive(Clone, Copy)]
pub struct ModuleApi<'a> {
    api: &'a OrApi,
}

impl<'a> ModuleApi<'a> {
    /// Wrap the pointer handed to `or_module_init`.
    ///
    /// # Safety
    ///
    /// `api` must be null or the pointer the host passed to this module, and
    /// the module must still be loaded for the whole lifetime `'a`.
    pub unsafe fn from_raw(api: *const OrApi) -> Option<Self> {
        unsafe { api.as_ref() }.map(|api| Self { api })
    }

    /// Identity the host assigned to this module instance.
    pub fn muid(&self) -> Muid {
        self.api.muid
    }

    pub fn as_ptr(&self) -> *const OrApi {
        self.api
    }

    /// Register `handler` for every method in `method_mask` on `path`.
    ///
    /// A trailing `*` registers a wildcard (prefix) route.
    pub fn register_http(
        &self,
        path: &CStr,
        method_mask: u8,
        handler: HttpHandlerFn,
        extra: *mut c_void,
    ) -> BridgeResult<()> {
        let status = (self.api.register_http)(
            self.api.host,
            self.api.muid,
            path.as_ptr(),
            method_mask,
            handler,
            extra,
        );
        BridgeError::check(status)
    }

    pub fn unregister_http(&self, path: &CStr, method_mask: u8) -> BridgeResult<()> {
        let status =
            (self.api.unregister_http)(self.api.host, self.api.muid, path.as_ptr(), method_mask);
        BridgeError::check(status)
    }

    pub fn log(&self, level: LogLevel, msg: &CStr, location: &CStr) -> BridgeResult<()> {
        let status = (self.api.log)(
            self.api.host,
            self.api.muid,
            level as u32,
            msg.as_ptr(),
            location.as_ptr(),
        );
        BridgeError::check(status)
    }

    /// Wrap the context pointer a handler received.
    ///
    /// # Safety
    ///
    /// `ctx` must be the pointer passed to the currently running handler.
    pub unsafe fn response(&self, ctx: *mut OrCtx) -> Option<Response<'a>> {
        if ctx.is_null() {
            return None;
        }
        Some(Response { api: self.api, ctx })
    }
}

/// Response being built for the request a handler is serving.
pub struct Response<'a> {
    api: &'a OrApi,
    ctx: *mut OrCtx,
}

impl Response<'_> {
    pub fn set_status(&mut self, status: u16) {
        (self.api.response_set_status)(self.ctx, status);
    }

    pub fn set_header(&mut self, name: &CStr, value: &CStr) -> BridgeResult<()> {
        BridgeError::check((self.api.response_set_header)(
            self.ctx,
            name.as_ptr(),
            value.as_ptr(),
        ))
    }

    /// Append `data` to the response body.
    pub fn write(&mut self, data: &[u8]) {
        (self.api.response_write)(self.ctx, data.as_ptr(), data.len());
    }
}
