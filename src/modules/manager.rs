//! Module Lifecycle Manager
//!
//! Tracks every module file under the root, keeps a staged copy of each in
//! the mirror directory and drives the boundary to load and unload them.
//!
//! All operations take the same lock for their whole duration, so a reload
//! can never interleave with a removal of the same path. Operations are
//! synchronous and may block on disk I/O and module init; async callers run
//! them on the blocking pool.

use super::boundary::ModuleBoundary;
use super::module::{ModuleRecord, clean_path, is_module_file};
use super::muid::{MuidDisplay, SharedRegistry};
use super::staging::{stage_file, unstage_file};
use crate::capabilities::Capabilities;
use crate::error::{RuntimeError, RuntimeResult};
use crate::router::SharedRouter;
use host_bridge::{MUID_INVALID, Muid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Capability sets granted to modules at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityPolicy {
    pub default: Capabilities,
    /// Keyed by module file name, e.g. `hello_world.so`.
    pub overrides: HashMap<String, Capabilities>,
}

impl CapabilityPolicy {
    pub fn new(default: Capabilities) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, file_name: impl Into<String>, caps: Capabilities) -> Self {
        self.overrides.insert(file_name.into(), caps);
        self
    }

    pub fn for_file(&self, file_name: &str) -> Capabilities {
        self.overrides.get(file_name).copied().unwrap_or(self.default)
    }
}

pub struct ModuleManager {
    root: PathBuf,
    mirror_dir: PathBuf,
    registry: SharedRegistry,
    router: SharedRouter,
    boundary: Arc<dyn ModuleBoundary>,
    policy: CapabilityPolicy,
    modules: Mutex<HashMap<PathBuf, ModuleRecord>>,
}

impl ModuleManager {
    pub fn new(
        root: impl AsRef<Path>,
        mirror_dir: impl AsRef<Path>,
        registry: SharedRegistry,
        router: SharedRouter,
        boundary: Arc<dyn ModuleBoundary>,
        policy: CapabilityPolicy,
    ) -> Self {
        Self {
            root: clean_path(root.as_ref()),
            mirror_dir: clean_path(mirror_dir.as_ref()),
            registry,
            router,
            boundary,
            policy,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    /// True if `path` lies inside the mirror directory.
    pub fn is_mirrored(&self, path: &Path) -> bool {
        clean_path(path).starts_with(&self.mirror_dir)
    }

    /// Where the working copy of `source` lives.
    pub fn staged_path(&self, source: &Path) -> PathBuf {
        match source.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => self.mirror_dir.join(relative),
            _ => self
                .mirror_dir
                .join(source.file_name().unwrap_or(source.as_os_str())),
        }
    }

    /// Start tracking a newly observed module file and load it.
    pub fn create(&self, path: &Path) -> RuntimeResult<()> {
        if !is_module_file(path) {
            return Ok(());
        }
        let source = clean_path(path);
        let mut modules = self.modules.lock();
        if let Some(record) = modules.get_mut(&source) {
            debug!(path = %source.display(), "Module already tracked, reloading");
            self.unstage(record)?;
            return self.stage(record);
        }
        self.create_locked(&mut modules, source)
    }

    /// Replace the running instance with the current file contents.
    ///
    /// Creates the record when none exists yet.
    pub fn reload(&self, path: &Path) -> RuntimeResult<()> {
        if !is_module_file(path) {
            return Ok(());
        }
        let source = clean_path(path);
        let mut modules = self.modules.lock();
        if !source.is_file() {
            // Deleted while the reload was pending.
            let Some(mut record) = modules.remove(&source) else {
                debug!(path = %source.display(), "Reload skipped, source is gone");
                return Ok(());
            };
            info!(path = %source.display(), "Module source vanished, removing");
            return self.unstage(&mut record);
        }
        let Some(record) = modules.get_mut(&source) else {
            return self.create_locked(&mut modules, source);
        };

        info!(path = %source.display(), "Reloading module");
        self.unstage(record)?;
        self.stage(record)
    }

    /// Unload, unstage and forget a module.
    pub fn remove(&self, path: &Path) -> RuntimeResult<()> {
        if !is_module_file(path) {
            return Ok(());
        }
        let source = clean_path(path);
        let mut modules = self.modules.lock();
        let Some(mut record) = modules.remove(&source) else {
            warn!(path = %source.display(), "Remove requested for untracked module");
            return Ok(());
        };

        info!(path = %source.display(), "Removing module");
        self.unstage(&mut record)
    }

    /// Unload and unstage every tracked module.
    pub fn shutdown(&self) {
        let mut modules = self.modules.lock();
        let count = modules.len();
        for (path, mut record) in modules.drain() {
            if let Err(e) = self.unstage(&mut record) {
                error!(path = %path.display(), error = %e, "Failed to tear down module");
            }
        }
        info!(count, "All modules unloaded");
    }

    /// Number of tracked module files, loaded or not.
    pub fn tracked(&self) -> usize {
        self.modules.lock().len()
    }

    /// Number of modules currently loaded.
    pub fn loaded(&self) -> usize {
        self.modules.lock().values().filter(|r| r.is_loaded()).count()
    }

    /// Tracked sources equal to or below `path`.
    pub fn tracked_under(&self, path: &Path) -> Vec<PathBuf> {
        let path = clean_path(path);
        self.modules
            .lock()
            .keys()
            .filter(|source| source.starts_with(&path))
            .cloned()
            .collect()
    }

    /// Identity of the instance currently loaded from `path`.
    pub fn muid_of(&self, path: &Path) -> Option<Muid> {
        self.modules
            .lock()
            .get(&clean_path(path))
            .and_then(|r| r.handle.as_ref())
            .map(|h| h.muid())
    }

    fn create_locked(&self, modules: &mut HashMap<PathBuf, ModuleRecord>, source: PathBuf) -> RuntimeResult<()> {
        let staged = self.staged_path(&source);
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let capabilities = self.policy.for_file(&file_name);

        info!(
            path = %source.display(),
            staged = %staged.display(),
            capabilities = %capabilities,
            "Creating module"
        );
        let record = modules
            .entry(source.clone())
            .or_insert_with(|| ModuleRecord::new(source, staged, capabilities));
        self.stage(record)
    }

    /// Copy source to mirror, then load.
    fn stage(&self, record: &mut ModuleRecord) -> RuntimeResult<()> {
        stage_file(&record.source, &record.staged).map_err(|e| RuntimeError::stage(&record.staged, e))?;
        self.load(record)
    }

    /// Unload, then remove the mirror copy.
    fn unstage(&self, record: &mut ModuleRecord) -> RuntimeResult<()> {
        self.unload(record);
        unstage_file(&record.staged).map_err(|e| RuntimeError::stage(&record.staged, e))
    }

    fn load(&self, record: &mut ModuleRecord) -> RuntimeResult<()> {
        if record.is_loaded() {
            self.unload(record);
        }

        let name = record.file_name();
        let muid = self.registry.generate(&name, record.capabilities);
        if muid == MUID_INVALID {
            return Err(RuntimeError::module(format!(
                "no identity available for {}",
                name
            )));
        }

        match self.boundary.load(&record.staged, muid) {
            Ok(handle) => {
                self.registry.rename(muid, handle.name());
                info!(
                    module = handle.name(),
                    muid = %MuidDisplay(muid),
                    path = %record.staged.display(),
                    "Module loaded"
                );
                record.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                // Init may have registered routes before failing.
                self.router.revoke(muid);
                self.registry.release(muid);
                Err(RuntimeError::module_with_source(
                    format!("failed to load {}", record.staged.display()),
                    anyhow::Error::new(e),
                ))
            }
        }
    }

    fn unload(&self, record: &mut ModuleRecord) {
        let Some(handle) = record.handle.take() else {
            return;
        };
        let muid = handle.muid();
        let name = handle.name().to_string();

        // Routes first, so no request reaches the module while it tears down.
        self.router.revoke(muid);
        self.boundary.unload(handle);
        self.registry.release(muid);
        info!(module = %name, muid = %MuidDisplay(muid), "Module unloaded");
    }
}

pub type SharedManager = Arc<ModuleManager>;
