//! Module identity registry.
//!
//! Hands out random 64-bit identities and maps each live one to the
//! module's name and capability set. Native callbacks resolve their caller
//! through this map on every call.

use crate::capabilities::Capabilities;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use host_bridge::{MUID_INVALID, Muid};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Collision retries before giving up on a fresh identity.
pub const MAX_GENERATE_ATTEMPTS: usize = 10;

/// What the registry knows about a live module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModule {
    pub name: String,
    pub capabilities: Capabilities,
}

type IdSource = Box<dyn Fn() -> Option<u64> + Send + Sync>;

fn os_random() -> Option<u64> {
    let mut buf = [0u8; 8];
    OsRng.try_fill_bytes(&mut buf).ok()?;
    Some(u64::from_ne_bytes(buf))
}

pub struct ModuleRegistry {
    modules: DashMap<Muid, RegisteredModule>,
    source: IdSource,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_id_source(os_random)
    }

    /// Registry drawing identities from `source` instead of the OS RNG.
    pub fn with_id_source(source: impl Fn() -> Option<u64> + Send + Sync + 'static) -> Self {
        Self {
            modules: DashMap::new(),
            source: Box::new(source),
        }
    }

    /// Reserve a fresh identity for a module.
    ///
    /// Returns [`MUID_INVALID`] if no unused value turned up within
    /// [`MAX_GENERATE_ATTEMPTS`] draws.
    pub fn generate(&self, name: &str, capabilities: Capabilities) -> Muid {
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let Some(candidate) = (self.source)() else {
                continue;
            };
            if candidate == MUID_INVALID {
                continue;
            }
            if let Entry::Vacant(slot) = self.modules.entry(candidate) {
                slot.insert(RegisteredModule {
                    name: name.to_string(),
                    capabilities,
                });
                debug!(muid = %MuidDisplay(candidate), module = name, "Generated module identity");
                return candidate;
            }
        }

        error!(
            module = name,
            attempts = MAX_GENERATE_ATTEMPTS,
            "Unable to generate a unique module identity"
        );
        MUID_INVALID
    }

    pub fn lookup(&self, muid: Muid) -> Option<RegisteredModule> {
        self.modules.get(&muid).map(|m| m.clone())
    }

    pub fn capabilities(&self, muid: Muid) -> Option<Capabilities> {
        self.modules.get(&muid).map(|m| m.capabilities)
    }

    /// Update the display name once the module has reported its own.
    pub fn rename(&self, muid: Muid, name: &str) {
        if let Some(mut module) = self.modules.get_mut(&muid) {
            module.name = name.to_string();
        }
    }

    /// Drop an identity. Returns false if it was not live.
    pub fn release(&self, muid: Muid) -> bool {
        let released = self.modules.remove(&muid).is_some();
        if released {
            debug!(muid = %MuidDisplay(muid), "Released module identity");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedRegistry = Arc<ModuleRegistry>;

/// Hex formatting for identities in log fields.
pub struct MuidDisplay(pub Muid);

impl fmt::Display for MuidDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_generate_and_lookup() {
        let registry = ModuleRegistry::new();
        let id = registry.generate("demo", Capabilities::LOGGING);
        assert_ne!(id, MUID_INVALID);

        let module = registry.lookup(id).unwrap();
        assert_eq!(module.name, "demo");
        assert_eq!(registry.capabilities(id), Some(Capabilities::LOGGING));
    }

    #[test]
    fn test_release() {
        let registry = ModuleRegistry::new();
        let id = registry.generate("demo", Capabilities::NONE);
        assert!(registry.release(id));
        assert!(!registry.release(id));
        assert!(registry.lookup(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_exhaustion_returns_invalid() {
        let registry = ModuleRegistry::with_id_source(|| Some(5));
        assert_eq!(registry.generate("first", Capabilities::NONE), 5);
        assert_eq!(registry.generate("second", Capabilities::NONE), MUID_INVALID);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_is_never_handed_out() {
        let registry = ModuleRegistry::with_id_source(|| Some(MUID_INVALID));
        assert_eq!(registry.generate("zero", Capabilities::NONE), MUID_INVALID);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_collision_retries() {
        // Yields 1, 1, 2: the second module collides once then succeeds.
        let next = AtomicU64::new(0);
        let registry = ModuleRegistry::with_id_source(move || {
            let n = next.fetch_add(1, Ordering::SeqCst);
            Some(if n < 2 { 1 } else { 2 })
        });
        assert_eq!(registry.generate("a", Capabilities::NONE), 1);
        assert_eq!(registry.generate("b", Capabilities::NONE), 2);
    }

    #[test]
    fn test_rename() {
        let registry = ModuleRegistry::new();
        let id = registry.generate("file.so", Capabilities::NONE);
        registry.rename(id, "hello");
        assert_eq!(registry.lookup(id).unwrap().name, "hello");
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        let registry = Arc::new(ModuleRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..64)
                        .map(|_| registry.generate("m", Capabilities::NONE))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert_ne!(id, MUID_INVALID);
                assert!(seen.insert(id), "duplicate identity {:#x}", id);
            }
        }
        assert_eq!(registry.len(), 8 * 64);
    }
}
