//! Seam between the lifecycle manager and whatever actually brings module
//! code into the process.
//!
//! The manager only ever holds a [`ModuleHandle`]. Every raw pointer lives
//! behind the boundary implementation.

use host_bridge::Muid;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a module could not be loaded.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("native modules are not supported on this platform")]
    UnsupportedPlatform,

    #[error("no such module {path:?}: {reason}")]
    NoSuchModule { path: PathBuf, reason: String },

    #[error("module {path:?} does not export a valid init function")]
    NoValidInit { path: PathBuf },

    #[error("init function of {path:?} returned null")]
    InitReturnedNull { path: PathBuf },

    #[error("module was assigned the reserved identity")]
    InvalidIdentity,
}

/// Ownership token for one loaded module instance.
///
/// Not clonable: exactly one `unload` per successful `load`.
pub struct ModuleHandle {
    muid: Muid,
    name: String,
    inner: Box<dyn Any + Send + Sync>,
}

impl ModuleHandle {
    pub fn new(muid: Muid, name: impl Into<String>, inner: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            muid,
            name: name.into(),
            inner,
        }
    }

    pub fn muid(&self) -> Muid {
        self.muid
    }

    /// Display name reported by the module, or its file stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recover the boundary-specific payload.
    pub fn into_inner(self) -> Box<dyn Any + Send + Sync> {
        self.inner
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("muid", &format_args!("{:#018x}", self.muid))
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Loads and unloads module code.
pub trait ModuleBoundary: Send + Sync {
    /// Health check run once before first use.
    fn health(&self) -> bool;

    /// Bring the module at `path` into the process under the identity `muid`.
    fn load(&self, path: &Path, muid: Muid) -> Result<ModuleHandle, LoadError>;

    /// Tear the module down. Consumes the handle.
    fn unload(&self, handle: ModuleHandle);
}
