//! Router handler backed by a module's `extern "C"` callback.

use super::NativeModule;
use crate::context::RequestContext;
use crate::router::HttpHandler;
use host_bridge::{HttpHandlerFn, Muid, OrCtx};
use std::ffi::c_void;
use std::sync::Arc;

pub(crate) struct NativeHandler {
    func: HttpHandlerFn,
    extra: *mut c_void,
    owner: Muid,
    /// Keeps the library mapped while the router can still reach `func`.
    _module: Arc<NativeModule>,
}

// SAFETY: `extra` is opaque to the host and only handed back to the module
// that supplied it. Modules must accept calls from any thread.
unsafe impl Send for NativeHandler {}
unsafe impl Sync for NativeHandler {}

impl NativeHandler {
    pub(crate) fn new(func: HttpHandlerFn, extra: *mut c_void, owner: Muid, module: Arc<NativeModule>) -> Self {
        Self {
            func,
            extra,
            owner,
            _module: module,
        }
    }
}

impl HttpHandler for NativeHandler {
    fn invoke(&self, ctx: &mut RequestContext) {
        let ctx = (ctx as *mut RequestContext).cast::<OrCtx>();
        (self.func)(ctx, std::ptr::null(), self.extra);
    }

    fn owner(&self) -> Option<Muid> {
        Some(self.owner)
    }
}
