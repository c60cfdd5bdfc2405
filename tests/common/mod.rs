//! Shared helpers for integration tests.

#![allow(dead_code)]

use omnirouter::context::RequestContext;
use omnirouter::modules::{LoadError, ModuleBoundary, ModuleHandle, ModuleManager, ModuleRegistry};
use omnirouter::{CapabilityPolicy, Capabilities, HttpHandler, SharedRegistry, SharedRouter, create_shared_router};
use host_bridge::{METHOD_GET, Muid};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Handler that answers with a fixed body.
pub struct StaticHandler {
    pub owner: Muid,
    pub body: Vec<u8>,
}

impl HttpHandler for StaticHandler {
    fn invoke(&self, ctx: &mut RequestContext) {
        ctx.set_header("Content-Type", "text/plain");
        ctx.write(&self.body);
    }

    fn owner(&self) -> Option<Muid> {
        Some(self.owner)
    }
}

/// Boundary that "loads" a module by registering `GET /<file stem>`
/// answering with the staged file's contents.
pub struct MockBoundary {
    router: SharedRouter,
    registry: SharedRegistry,
    failing: Mutex<HashSet<String>>,
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl MockBoundary {
    pub fn new(router: SharedRouter, registry: SharedRegistry) -> Self {
        Self {
            router,
            registry,
            failing: Mutex::new(HashSet::new()),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        }
    }

    /// Make loads of `file_name` fail until cleared.
    pub fn fail(&self, file_name: &str, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(file_name.to_string());
        } else {
            set.remove(file_name);
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

impl ModuleBoundary for MockBoundary {
    fn health(&self) -> bool {
        true
    }

    fn load(&self, path: &Path, muid: Muid) -> Result<ModuleHandle, LoadError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let body = std::fs::read(path).map_err(|e| LoadError::NoSuchModule {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // Routes registered before a failing init must still be revoked.
        let caps = self.registry.capabilities(muid).unwrap_or(Capabilities::NONE);
        let _ = self.router.register(
            caps,
            METHOD_GET,
            &format!("/{}", stem),
            Arc::new(StaticHandler { owner: muid, body }),
        );

        if self.failing.lock().contains(&file_name) {
            return Err(LoadError::NoValidInit {
                path: path.to_path_buf(),
            });
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ModuleHandle::new(muid, stem, Box::new(())))
    }

    fn unload(&self, _handle: ModuleHandle) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// A module root, a mirror directory and a manager wired to a mock boundary.
pub struct Harness {
    pub dir: TempDir,
    pub router: SharedRouter,
    pub registry: SharedRegistry,
    pub boundary: Arc<MockBoundary>,
    pub manager: Arc<ModuleManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(CapabilityPolicy::new(Capabilities::ALL))
    }

    /// Mirror lives outside the root.
    pub fn with_policy(policy: CapabilityPolicy) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("modules")).unwrap();
        let mirror = dir.path().join("mirror");
        Self::build(dir, mirror, policy)
    }

    /// Mirror lives inside the root.
    pub fn with_nested_mirror() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("modules")).unwrap();
        let mirror = dir.path().join("modules/.mirror");
        Self::build(dir, mirror, CapabilityPolicy::new(Capabilities::ALL))
    }

    fn build(dir: TempDir, mirror: std::path::PathBuf, policy: CapabilityPolicy) -> Self {
        let router = create_shared_router();
        let registry: SharedRegistry = Arc::new(ModuleRegistry::new());
        let boundary = Arc::new(MockBoundary::new(router.clone(), registry.clone()));
        let manager = Arc::new(ModuleManager::new(
            dir.path().join("modules"),
            mirror,
            registry.clone(),
            router.clone(),
            boundary.clone(),
            policy,
        ));
        Self {
            dir,
            router,
            registry,
            boundary,
            manager,
        }
    }

    pub fn root(&self) -> std::path::PathBuf {
        self.dir.path().join("modules")
    }

    /// Write a module file under the root and return its path.
    pub fn write_module(&self, relative: &str, contents: &str) -> std::path::PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Body served for `GET path`, if any.
    pub fn get(&self, path: &str) -> Option<String> {
        omnirouter::server::dispatch(&self.router, "GET", path)
            .map(|ctx| String::from_utf8_lossy(&ctx.body).into_owned())
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
