//! Hello World module
//!
//! Build with `cargo build -p hello-world` and copy the resulting
//! `libhello_world.so` (or `.dylib` / `.dll`) into the module root.
//!
//! Routes:
//! - `GET /` plain-text greeting
//! - `/hello*` any method, echoes that the wildcard matched
//!   (needs the `http_register_wildcard` capability)

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use host_bridge::{
    LogLevel, ModuleApi, ModuleInfo, OrApi, OrCtx, OrHttpReq, ABI_VERSION, METHOD_ANY, METHOD_GET,
};

static API: AtomicPtr<OrApi> = AtomicPtr::new(ptr::null_mut());

static INFO: ModuleInfo = ModuleInfo {
    abi_version: ABI_VERSION,
    name: c"hello_world".as_ptr(),
};

fn api() -> Option<ModuleApi<'static>> {
    // SAFETY: the host keeps the table alive while any of our handlers can run.
    unsafe { ModuleApi::from_raw(API.load(Ordering::Acquire)) }
}

extern "C" fn index(ctx: *mut OrCtx, _req: *const OrHttpReq, _extra: *mut c_void) {
    let Some(api) = api() else { return };
    // SAFETY: `ctx` is the pointer this handler was called with.
    if let Some(mut response) = unsafe { api.response(ctx) } {
        let _ = response.set_header(c"Content-Type", c"text/plain; charset=utf-8");
        response.write(b"Hello from OmniRouter!\n");
    }
}

extern "C" fn hello(ctx: *mut OrCtx, _req: *const OrHttpReq, _extra: *mut c_void) {
    let Some(api) = api() else { return };
    // SAFETY: `ctx` is the pointer this handler was called with.
    if let Some(mut response) = unsafe { api.response(ctx) } {
        let _ = response.set_header(c"Content-Type", c"text/plain; charset=utf-8");
        response.write(b"Hello, wildcard!\n");
    }
}

/// # Safety
///
/// Called by the host with a valid `OrApi` table.
#[no_mangle]
pub unsafe extern "C" fn or_module_init(api: *const OrApi) -> *const ModuleInfo {
    let Some(module) = (unsafe { ModuleApi::from_raw(api) }) else {
        return ptr::null();
    };
    API.store(api.cast_mut(), Ordering::Release);

    if module
        .register_http(c"/", METHOD_GET, index, ptr::null_mut())
        .is_err()
    {
        return ptr::null();
    }
    if module
        .register_http(c"/hello*", METHOD_ANY, hello, ptr::null_mut())
        .is_err()
    {
        // Still usable without the wildcard route.
        let _ = module.log(
            LogLevel::Warn,
            c"wildcard route /hello* not registered",
            c"hello-world/src/lib.rs",
        );
    }
    let _ = module.log(LogLevel::Info, c"hello world module ready", c"hello-world/src/lib.rs");

    &INFO
}

/// # Safety
///
/// Called by the host once, right before the library is closed.
#[no_mangle]
pub unsafe extern "C" fn or_module_deinit(_api: *const OrApi) {
    API.store(ptr::null_mut(), Ordering::Release);
}
