//! Native Module Adapter
//!
//! Loads modules as shared libraries through `libloading` and exposes the
//! host API to them as a `#[repr(C)]` function table. This is the only
//! place in the crate that dereferences raw pointers.
//!
//! # Lifetimes
//!
//! ```text
//! NativeBoundary ──Arc──▶ BoundaryHost ──libraries──▶ Arc<NativeModule>
//!                             ▲                          │   ▲
//!                             └─────────Arc──────────────┘   │
//!                                          router slot ──▶ NativeHandler
//! ```
//!
//! A module's `OrApi` table and its mapped code live inside `NativeModule`.
//! The host keeps one reference until unload; every handler the module
//! registered keeps another, so code stays mapped until the last route to it
//! is revoked.

mod bridge;
mod handler;

use crate::modules::boundary::{LoadError, ModuleBoundary, ModuleHandle};
use crate::modules::muid::{MuidDisplay, SharedRegistry};
use crate::router::SharedRouter;
use dashmap::DashMap;
use host_bridge::{
    ABI_VERSION, MODULE_DEINIT_SYMBOL, MODULE_INIT_SYMBOL, ModuleDeinitFn, ModuleInitFn, Muid,
    OrApi, OrHost,
};
use libloading::Library;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State reachable from module callbacks through `OrApi::host`.
pub(crate) struct BoundaryHost {
    registry: SharedRegistry,
    router: SharedRouter,
    libraries: DashMap<Muid, Arc<NativeModule>>,
}

/// One mapped library plus the API table handed to it.
pub(crate) struct NativeModule {
    api: OrApi,
    library: Library,
    _host: Arc<BoundaryHost>,
}

// SAFETY: `api.host` points into the `BoundaryHost` kept alive by `_host`,
// which is itself Send + Sync. Everything else is plain data or fn pointers.
unsafe impl Send for NativeModule {}
unsafe impl Sync for NativeModule {}

impl NativeModule {
    fn new(library: Library, muid: Muid, host: Arc<BoundaryHost>) -> Self {
        Self {
            api: OrApi {
                abi_version: ABI_VERSION,
                muid,
                host: Arc::as_ptr(&host).cast::<OrHost>(),
                register_http: bridge::register_http,
                unregister_http: bridge::unregister_http,
                log: bridge::log,
                response_set_status: bridge::response_set_status,
                response_set_header: bridge::response_set_header,
                response_write: bridge::response_write,
            },
            library,
            _host: host,
        }
    }

    fn deinit(&self) {
        // SAFETY: the symbol, if present, has the documented signature.
        let deinit = unsafe { self.library.get::<ModuleDeinitFn>(MODULE_DEINIT_SYMBOL) };
        if let Ok(deinit) = deinit {
            // SAFETY: `api` is the same table the module was initialized with.
            unsafe { deinit(&self.api) };
        }
    }
}

/// [`ModuleBoundary`] backed by the platform dynamic loader.
pub struct NativeBoundary {
    host: Arc<BoundaryHost>,
}

impl NativeBoundary {
    pub fn new(registry: SharedRegistry, router: SharedRouter) -> Self {
        Self {
            host: Arc::new(BoundaryHost {
                registry,
                router,
                libraries: DashMap::new(),
            }),
        }
    }

    /// Number of libraries currently mapped by the host.
    pub fn mapped(&self) -> usize {
        self.host.libraries.len()
    }
}

impl ModuleBoundary for NativeBoundary {
    fn health(&self) -> bool {
        cfg!(any(unix, windows))
    }

    fn load(&self, path: &Path, muid: Muid) -> Result<ModuleHandle, LoadError> {
        if !self.health() {
            return Err(LoadError::UnsupportedPlatform);
        }

        // SAFETY: loading runs the library's initializers; modules are trusted
        // code placed in the module root by the operator.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::NoSuchModule {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        // SAFETY: the symbol is declared with the ABI's init signature.
        let init = unsafe { library.get::<ModuleInitFn>(MODULE_INIT_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(|_| LoadError::NoValidInit {
                path: path.to_path_buf(),
            })?;

        let module = Arc::new(NativeModule::new(library, muid, self.host.clone()));
        // Visible before init so registrations made from init resolve.
        self.host.libraries.insert(muid, module.clone());

        debug!(muid = %MuidDisplay(muid), path = %path.display(), "Calling module init");
        // SAFETY: `init` comes from the library owned by `module`, and the
        // table it receives lives as long as `module`.
        let info = unsafe { init(&module.api) };
        // SAFETY: a non-null return points at the module's static info.
        let Some(info) = (unsafe { info.as_ref() }) else {
            self.host.libraries.remove(&muid);
            return Err(LoadError::InitReturnedNull {
                path: path.to_path_buf(),
            });
        };

        if info.abi_version < ABI_VERSION {
            warn!(
                path = %path.display(),
                module_abi = info.abi_version,
                host_abi = ABI_VERSION,
                "Module built against an older ABI, loading without guarantees"
            );
        }

        let name = if info.name.is_null() {
            None
        } else {
            // SAFETY: a non-null name is a NUL-terminated static string.
            Some(unsafe { CStr::from_ptr(info.name) }.to_string_lossy().into_owned())
        }
        .filter(|n| !n.is_empty())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

        info!(module = %name, muid = %MuidDisplay(muid), abi = info.abi_version, "Native module initialized");
        Ok(ModuleHandle::new(muid, name, Box::new(module)))
    }

    fn unload(&self, handle: ModuleHandle) {
        let muid = handle.muid();
        let Ok(module) = handle.into_inner().downcast::<Arc<NativeModule>>() else {
            warn!(muid = %MuidDisplay(muid), "Unload called with a foreign handle");
            return;
        };

        module.deinit();
        self.host.libraries.remove(&muid);
        debug!(
            muid = %MuidDisplay(muid),
            references = Arc::strong_count(&module),
            "Module released by host"
        );
    }
}
