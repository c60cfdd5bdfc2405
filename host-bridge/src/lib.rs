//! Host Bridge
//!
//! The C ABI spoken between the OmniRouter host and the native modules it
//! loads. Everything here is `#[repr(C)]` or a plain integer constant so a
//! module written in C, Zig or Rust can link against the same contract.
//!
//! # Module entry points
//!
//! A module is a shared library exporting:
//!
//! - `or_module_init(api: *const OrApi) -> *const ModuleInfo` (required)
//! - `or_module_deinit(api: *const OrApi)` (optional, called before close)
//!
//! The `OrApi` table handed to `or_module_init` stays valid until the module
//! is closed, so modules may keep the pointer around and use it from their
//! HTTP handlers.
//!
//! # Layout
//!
//! ```text
//! ┌──────────┐  or_module_init(&OrApi)   ┌──────────────┐
//! │   host   │ ────────────────────────▶ │    module    │
//! │          │ ◀──────────────────────── │              │
//! └──────────┘  register_http / log / …  └──────────────┘
//! ```

use std::ffi::{c_char, c_void};

pub mod error;
pub mod log;
pub mod module;

pub use error::{BridgeError, BridgeResult};
pub use log::LogLevel;
pub use module::{ModuleApi, Response};

/// ABI revision implemented by the host.
pub const ABI_VERSION: u32 = 2;

/// Symbol every module must export.
pub const MODULE_INIT_SYMBOL: &[u8] = b"or_module_init\0";

/// Optional teardown symbol, called once before the library is closed.
pub const MODULE_DEINIT_SYMBOL: &[u8] = b"or_module_deinit\0";

/// Module unique identifier assigned by the host at load time.
pub type Muid = u64;

/// Reserved "invalid / unassigned" identity.
pub const MUID_INVALID: Muid = 0;

// ---------------------------------------------------------------------------
// Method bits
// ---------------------------------------------------------------------------

/// Number of method slots per route.
pub const METHOD_COUNT: usize = 7;

pub const METHOD_UNKNOWN: u8 = 0;
pub const METHOD_GET: u8 = 1 << 1;
pub const METHOD_HEAD: u8 = 1 << 2;
pub const METHOD_POST: u8 = 1 << 3;
pub const METHOD_PUT: u8 = 1 << 4;
pub const METHOD_DELETE: u8 = 1 << 5;
pub const METHOD_PATCH: u8 = 1 << 6;
pub const METHOD_OPTIONS: u8 = 1 << 7;
/// Shorthand for "every method".
pub const METHOD_ANY: u8 = !0;

// ---------------------------------------------------------------------------
// Status codes returned across the boundary
// ---------------------------------------------------------------------------

pub const OR_SUCCESS: u64 = 0;
/// Unknown caller identity. Never reuse this value for anything else.
pub const OR_ERR_INVALID_CALLER: u64 = 1;
pub const OR_ERR_REGISTER_CAP: u64 = 2;
pub const OR_ERR_REGISTER_WILDCARD_CAP: u64 = 3;
pub const OR_ERR_UNREGISTER_CAP: u64 = 4;
pub const OR_ERR_LOGGING_CAP: u64 = 5;
pub const OR_ERR_INVALID_ARGUMENT: u64 = 6;

// ---------------------------------------------------------------------------
// Opaque types
// ---------------------------------------------------------------------------

/// Per-request response context owned by the host.
#[repr(C)]
pub struct OrCtx {
    _private: [u8; 0],
}

/// Request handle. The host currently always passes null.
#[repr(C)]
pub struct OrHttpReq {
    _private: [u8; 0],
}

/// Host-side state behind [`OrApi::host`]. Modules only pass it back.
#[repr(C)]
pub struct OrHost {
    _private: [u8; 0],
}

/// HTTP handler a module registers for a path.
pub type HttpHandlerFn = extern "C" fn(ctx: *mut OrCtx, req: *const OrHttpReq, extra: *mut c_void);

pub type RegisterHttpFn = extern "C" fn(
    host: *const OrHost,
    muid: Muid,
    path: *const c_char,
    method_mask: u8,
    handler: HttpHandlerFn,
    extra: *mut c_void,
) -> u64;

pub type UnregisterHttpFn =
    extern "C" fn(host: *const OrHost, muid: Muid, path: *const c_char, method_mask: u8) -> u64;

pub type LogFn = extern "C" fn(
    host: *const OrHost,
    muid: Muid,
    level: u32,
    msg: *const c_char,
    location: *const c_char,
) -> u64;

pub type ResponseSetStatusFn = extern "C" fn(ctx: *mut OrCtx, status: u16);

pub type ResponseSetHeaderFn =
    extern "C" fn(ctx: *mut OrCtx, name: *const c_char, value: *const c_char) -> u64;

pub type ResponseWriteFn = extern "C" fn(ctx: *mut OrCtx, data: *const u8, len: usize);

/// Function table handed to `or_module_init`.
#[repr(C)]
pub struct OrApi {
    pub abi_version: u32,
    pub muid: Muid,
    pub host: *const OrHost,
    pub register_http: RegisterHttpFn,
    pub unregister_http: UnregisterHttpFn,
    pub log: LogFn,
    pub response_set_status: ResponseSetStatusFn,
    pub response_set_header: ResponseSetHeaderFn,
    pub response_write: ResponseWriteFn,
}

/// Returned by `or_module_init`. A null pointer means initialization failed.
#[repr(C)]
pub struct ModuleInfo {
    pub abi_version: u32,
    /// Optional NUL-terminated display name, may be null.
    pub name: *const c_char,
}

// Modules hand out `&'static ModuleInfo`; the name pointer is read-only.
unsafe impl Sync for ModuleInfo {}

pub type ModuleInitFn = unsafe extern "C" fn(api: *const OrApi) -> *const ModuleInfo;
pub type ModuleDeinitFn = unsafe extern "C" fn(api: *const OrApi);

/// Slot index (0..METHOD_COUNT) for a single method bit.
pub fn method_slot(bit: u8) -> Option<usize> {
    if bit.count_ones() != 1 || bit == 1 {
        return None;
    }
    Some(bit.trailing_zeros() as usize - 1)
}

/// Call `f` once per set method bit, with the slot index.
///
/// `METHOD_ANY` visits every slot, zero visits nothing. Bit 0 is ignored.
pub fn for_each_method_bit(mask: u8, mut f: impl FnMut(usize)) {
    for slot in 0..METHOD_COUNT {
        if mask & (1 << (slot + 1)) != 0 {
            f(slot);
        }
    }
}

/// Canonical method name for a slot index.
pub fn method_name(slot: usize) -> &'static str {
    match slot {
        0 => "GET",
        1 => "HEAD",
        2 => "POST",
        3 => "PUT",
        4 => "DELETE",
        5 => "PATCH",
        6 => "OPTIONS",
        _ => "UNKNOWN",
    }
}

/// Method bit for an HTTP method name. Unknown names map to `METHOD_UNKNOWN`.
pub fn method_bit(name: &str) -> u8 {
    match name {
        "GET" => METHOD_GET,
        "HEAD" => METHOD_HEAD,
        "POST" => METHOD_POST,
        "PUT" => METHOD_PUT,
        "DELETE" => METHOD_DELETE,
        "PATCH" => METHOD_PATCH,
        "OPTIONS" => METHOD_OPTIONS,
        _ => METHOD_UNKNOWN,
    }
}
