//! OmniRouter
//!
//! Pluggable HTTP front end driven by native modules.
//!
//! # Overview
//!
//! OmniRouter watches a directory for shared libraries, stages a private
//! copy of each, loads it and lets it register HTTP handlers. It provides:
//!
//! - **HTTP Server**: Axum-based server that dispatches every request to the
//!   route table
//! - **Route Registry**: Per-method handler slots with exact and wildcard
//!   matches (via `matchit`), gated by module capabilities
//! - **Module Lifecycle**: Change detection, debouncing, atomic staging and
//!   identity assignment for each loaded module
//! - **Native Boundary**: The C ABI modules call back into (see `host-bridge`)
//!
//! # Architecture
//!
//! ```text
//!  module root ──notify──▶ ModuleWatcher ──debounce──▶ ModuleManager
//!                                                         │ stage + load
//!                                                         ▼
//!                                                   NativeBoundary
//!                                                         │ register_http
//!                                                         ▼
//! HTTP Request ──▶ Axum Server ──lookup──────────────▶ Router ──▶ handler
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use omnirouter::{Runtime, Settings, Config};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Config::load(Path::new("omnirouter.toml"))?.resolve()?;
//!     Runtime::new(&settings).run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod capabilities;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod modules;
pub mod native;
pub mod router;
pub mod server;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// Re-exports for convenience
pub use capabilities::{Capabilities, has_capabilities};
pub use config::{Config, ConfigError, Settings};
pub use context::RequestContext;
pub use error::{HttpError, RuntimeError, RuntimeResult};
pub use modules::{
    CapabilityPolicy, ModuleBoundary, ModuleManager, ModuleRegistry, SharedManager,
    SharedRegistry,
};
pub use native::NativeBoundary;
pub use router::{HttpHandler, Router, RouteError, SharedRouter, create_shared_router, normalize};
pub use server::{ServerConfig, serve, start_server};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "OmniRouter";

/// Everything one running instance owns.
pub struct Runtime {
    pub router: SharedRouter,
    pub registry: SharedRegistry,
    pub manager: SharedManager,
    boundary: Arc<dyn ModuleBoundary>,
    server: ServerConfig,
}

impl Runtime {
    /// Wire the components up with the native boundary.
    pub fn new(settings: &Settings) -> Self {
        let router = create_shared_router();
        let registry: SharedRegistry = Arc::new(ModuleRegistry::new());
        let boundary: Arc<dyn ModuleBoundary> = Arc::new(NativeBoundary::new(registry.clone(), router.clone()));
        Self::with_boundary(settings, router, registry, boundary)
    }

    /// Wire the components up around a caller-supplied boundary.
    pub fn with_boundary(
        settings: &Settings,
        router: SharedRouter,
        registry: SharedRegistry,
        boundary: Arc<dyn ModuleBoundary>,
    ) -> Self {
        let manager = Arc::new(ModuleManager::new(
            &settings.root,
            &settings.mirror_dir,
            registry.clone(),
            router.clone(),
            boundary.clone(),
            settings.policy.clone(),
        ));
        Self {
            router,
            registry,
            manager,
            boundary,
            server: ServerConfig::default().with_listen(settings.listen),
        }
    }

    /// Watch modules and serve HTTP until `cancel` fires, then unload
    /// everything.
    pub async fn run(self, cancel: CancellationToken) -> RuntimeResult<()> {
        if !self.boundary.health() {
            warn!("Native module boundary health check failed; modules may not load");
        }

        let watcher = modules::spawn_watcher(self.manager.clone(), cancel.clone()).await?;
        let served = start_server(self.router.clone(), self.server.clone(), cancel.clone()).await;

        // A server failure must still stop the watcher.
        cancel.cancel();
        if let Err(e) = watcher.await {
            warn!(error = %e, "Watcher task ended abnormally");
        }

        let manager = self.manager.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || manager.shutdown()).await {
            warn!(error = %e, "Module shutdown task failed");
        }
        info!("{} stopped", NAME);
        served
    }
}
