//! Module lifecycle: identity, staging, change detection and loading.

pub mod boundary;
pub mod debounce;
pub mod manager;
pub mod module;
pub mod muid;
pub mod staging;
pub mod watcher;

pub use boundary::{LoadError, ModuleBoundary, ModuleHandle};
pub use debounce::{DEBOUNCE_DELAY, Debouncer};
pub use manager::{CapabilityPolicy, ModuleManager, SharedManager};
pub use module::{ModuleRecord, clean_path, is_module_file};
pub use muid::{ModuleRegistry, RegisteredModule, SharedRegistry};
pub use staging::{stage_file, unstage_file};
pub use watcher::{ModuleWatcher, WatchAction, classify, spawn_watcher};
