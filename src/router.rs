//! HTTP Route Registry
//!
//! Capability-gated route table. Modules register handlers per path and per
//! method bit; the dispatcher looks them up on every request.
//!
//! # Design Decisions
//! - One reader/writer lock over the entries and the wildcard matcher;
//!   lookups take the shared side
//! - Route entries are created lazily and never deleted, only their slots
//!   are cleared, so lookups never race with removal
//! - Last writer wins on a slot; ownership is decided by capabilities alone
//! - A trailing `*` marks a wildcard (prefix) route

use crate::capabilities::Capabilities;
use crate::context::RequestContext;
use crate::modules::muid::MuidDisplay;
use host_bridge::{
    METHOD_COUNT, Muid, OR_ERR_REGISTER_CAP, OR_ERR_REGISTER_WILDCARD_CAP, OR_ERR_UNREGISTER_CAP,
    for_each_method_bit, method_name,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Marker that turns a registration into a prefix route.
pub const WILDCARD_MARKER: char = '*';

/// Something that can serve a request routed to it.
pub trait HttpHandler: Send + Sync {
    fn invoke(&self, ctx: &mut RequestContext);

    /// Module that registered this handler, if any.
    fn owner(&self) -> Option<Muid> {
        None
    }
}

impl<F> HttpHandler for F
where
    F: Fn(&mut RequestContext) + Send + Sync,
{
    fn invoke(&self, ctx: &mut RequestContext) {
        self(ctx)
    }
}

pub type SharedHandler = Arc<dyn HttpHandler>;

/// One handler slot per recognized method.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: [Option<SharedHandler>; METHOD_COUNT],
}

impl HandlerTable {
    /// Handler in a slot (0 = GET .. 6 = OPTIONS).
    pub fn get(&self, slot: usize) -> Option<&SharedHandler> {
        self.handlers.get(slot).and_then(Option::as_ref)
    }

    /// Every occupied slot selected by `method_mask`.
    pub fn handlers_for(&self, method_mask: u8) -> Vec<SharedHandler> {
        let mut out = Vec::new();
        for_each_method_bit(method_mask, |slot| {
            if let Some(h) = &self.handlers[slot] {
                out.push(h.clone());
            }
        });
        out
    }

    /// Mask of occupied slots.
    pub fn method_mask(&self) -> u8 {
        self.handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .fold(0, |mask, (slot, _)| mask | (1 << (slot + 1)))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(Option::is_none)
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("method_mask", &format_args!("{:#010b}", self.method_mask()))
            .finish()
    }
}

#[derive(Default)]
struct RouteEntry {
    table: HandlerTable,
    wildcard: bool,
}

/// Snapshot of one route entry, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub path: String,
    pub wildcard: bool,
    pub method_mask: u8,
}

impl RouteInfo {
    /// Names of the occupied methods.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for_each_method_bit(self.method_mask, |slot| names.push(method_name(slot)));
        names
    }
}

/// Capability failures. Each maps to a distinct boundary status code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    #[error("insufficient capabilities to register an HTTP route")]
    MissingRegisterCapability,

    #[error("insufficient capabilities to register a wildcard HTTP route")]
    MissingWildcardCapability,

    #[error("insufficient capabilities to unregister an HTTP route")]
    MissingUnregisterCapability,
}

impl RouteError {
    pub fn status_code(&self) -> u64 {
        match self {
            RouteError::MissingRegisterCapability => OR_ERR_REGISTER_CAP,
            RouteError::MissingWildcardCapability => OR_ERR_REGISTER_WILDCARD_CAP,
            RouteError::MissingUnregisterCapability => OR_ERR_UNREGISTER_CAP,
        }
    }
}

/// Canonical route key: leading slash, no trailing slashes except for root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn strip_wildcard(path: &str) -> (&str, bool) {
    match path.strip_suffix(WILDCARD_MARKER) {
        Some(stripped) => (stripped, true),
        None => (path, false),
    }
}

/// matchit pattern covering everything strictly below `key`.
fn catch_all_pattern(key: &str) -> String {
    let escaped = key.replace('{', "{{").replace('}', "}}");
    if key == "/" {
        "/{*rest}".to_string()
    } else {
        format!("{}/{{*rest}}", escaped)
    }
}

/// Route entries plus the wildcard matcher, guarded together.
#[derive(Default)]
struct RouteTable {
    /// Entries indexed by normalized path
    entries: HashMap<String, RouteEntry>,
    /// Catch-all patterns of wildcard entries, resolving to the entry key
    wildcards: matchit::Router<String>,
}

/// Thread-safe route registry
pub struct Router {
    table: RwLock<RouteTable>,
}

impl Router {
    /// Create a new router
    pub fn new() -> Self {
        Self {
            table: RwLock::new(RouteTable::default()),
        }
    }

    /// Store `handler` in every slot selected by `method_mask` under `path`.
    pub fn register(
        &self,
        caps: Capabilities,
        method_mask: u8,
        path: &str,
        handler: SharedHandler,
    ) -> Result<(), RouteError> {
        if !caps.has(Capabilities::HTTP_REGISTER) {
            warn!(
                capabilities = %caps,
                needed = %Capabilities::HTTP_REGISTER,
                "Insufficient capabilities to register an HTTP route"
            );
            return Err(RouteError::MissingRegisterCapability);
        }

        let (raw, wildcard) = strip_wildcard(path);
        if wildcard && !caps.has(Capabilities::HTTP_REGISTER_WILDCARD) {
            warn!(
                capabilities = %caps,
                needed = %Capabilities::HTTP_REGISTER_WILDCARD,
                "Insufficient capabilities to register a wildcard HTTP route"
            );
            return Err(RouteError::MissingWildcardCapability);
        }

        let key = normalize(raw);
        {
            let mut guard = self.table.write();
            let table = &mut *guard;
            let entry = table.entries.entry(key.clone()).or_default();
            if wildcard && !entry.wildcard {
                entry.wildcard = true;
                // One catch-all pattern per key.
                if let Err(e) = table.wildcards.insert(catch_all_pattern(&key), key.clone()) {
                    warn!(path = %key, error = %e, "Wildcard pattern rejected by matcher");
                }
            }
            for_each_method_bit(method_mask, |slot| {
                entry.table.handlers[slot] = Some(handler.clone());
            });
        }

        info!(path = %key, method_mask, wildcard, "Added/updated HTTP handler");
        Ok(())
    }

    /// Clear the slots selected by `method_mask` under `path`.
    ///
    /// A missing entry is a successful no-op. The entry and its wildcard flag
    /// are kept.
    pub fn unregister(&self, caps: Capabilities, method_mask: u8, path: &str) -> Result<(), RouteError> {
        if !caps.has(Capabilities::HTTP_UNREGISTER) {
            warn!(
                capabilities = %caps,
                needed = %Capabilities::HTTP_UNREGISTER,
                "Insufficient capabilities to unregister an HTTP route"
            );
            return Err(RouteError::MissingUnregisterCapability);
        }

        let key = normalize(strip_wildcard(path).0);
        let mut table = self.table.write();
        let Some(entry) = table.entries.get_mut(&key) else {
            info!(path = %key, "Unregister called on missing path");
            return Ok(());
        };
        for_each_method_bit(method_mask, |slot| {
            entry.table.handlers[slot] = None;
        });

        info!(path = %key, method_mask, "Unregistered HTTP handler");
        Ok(())
    }

    /// Find the handler table serving `path`.
    ///
    /// An exact entry wins. Otherwise the longest wildcard ancestor whose key
    /// is `/` or is followed by `/` in the request path is used, so a
    /// wildcard at `/foo` serves `/foo/bar` but never `/foobar`.
    pub fn lookup(&self, path: &str) -> Option<HandlerTable> {
        let key = normalize(path);
        let table = self.table.read();

        if let Some(entry) = table.entries.get(&key) {
            return Some(entry.table.clone());
        }

        // Static segments outrank catch-alls and matchit backtracks on a
        // dead end, which yields the longest wildcard ancestor.
        let matched = table.wildcards.at(&key).ok()?;
        let prefix = matched.value;
        debug!(path = %key, prefix = %prefix, "Wildcard route matched");
        table.entries.get(prefix).map(|entry| entry.table.clone())
    }

    /// Clear every slot whose handler belongs to `owner`.
    pub fn revoke(&self, owner: Muid) -> usize {
        let mut cleared = 0;
        for entry in self.table.write().entries.values_mut() {
            for slot in entry.table.handlers.iter_mut() {
                if slot.as_ref().is_some_and(|h| h.owner() == Some(owner)) {
                    *slot = None;
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            info!(muid = %MuidDisplay(owner), cleared, "Revoked module routes");
        }
        cleared
    }

    /// All route entries with their occupied methods, sorted by path.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut routes: Vec<RouteInfo> = self
            .table
            .read()
            .entries
            .iter()
            .map(|(path, entry)| RouteInfo {
                path: path.clone(),
                wildcard: entry.wildcard,
                method_mask: entry.table.method_mask(),
            })
            .collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    /// Get route entry count
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Check if router is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared router instance wrapped in Arc for thread-safety
pub type SharedRouter = Arc<Router>;

/// Create a new shared router
pub fn create_shared_router() -> SharedRouter {
    Arc::new(Router::new())
}
