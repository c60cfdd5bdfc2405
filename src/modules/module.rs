//! Module records and path helpers.

use super::boundary::ModuleHandle;
use crate::capabilities::Capabilities;
use std::path::{Component, Path, PathBuf};

/// Shared library extensions recognized as modules.
pub const MODULE_EXTENSIONS: &[&str] = &["so", "dll", "dylib"];

/// True if `path` names a shared library, by extension (case-insensitive).
pub fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODULE_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
///
/// Does not touch the filesystem, so it works for paths that were just
/// removed.
pub fn clean_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// One module source file the manager is tracking.
#[derive(Debug)]
pub struct ModuleRecord {
    /// Original file under the module root.
    pub source: PathBuf,
    /// Working copy in the mirror directory that is actually loaded.
    pub staged: PathBuf,
    pub capabilities: Capabilities,
    /// Present while the module is loaded.
    pub handle: Option<ModuleHandle>,
}

impl ModuleRecord {
    pub fn new(source: PathBuf, staged: PathBuf, capabilities: Capabilities) -> Self {
        Self {
            source,
            staged,
            capabilities,
            handle: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// File name used for logging and capability lookup.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_module_file() {
        assert!(is_module_file(Path::new("/m/a.so")));
        assert!(is_module_file(Path::new("/m/A.DLL")));
        assert!(is_module_file(Path::new("b.dylib")));
        assert!(!is_module_file(Path::new("/m/a.so.bak")));
        assert!(!is_module_file(Path::new("/m/README")));
        assert!(!is_module_file(Path::new("/m/so")));
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/a/b/")), PathBuf::from("/a/b"));
        assert!(clean_path(Path::new("rel/x.so")).is_absolute());
    }

    #[test]
    fn test_record_file_name() {
        let record = ModuleRecord::new(
            PathBuf::from("/m/sub/hello.so"),
            PathBuf::from("/mirror/sub/hello.so"),
            Capabilities::ALL,
        );
        assert_eq!(record.file_name(), "hello.so");
        assert!(!record.is_loaded());
    }
}
