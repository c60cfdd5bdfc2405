//! Configuration
//!
//! Loaded from a TOML file and overridden by command-line flags. Relative
//! paths are resolved against the working directory.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//!
//! [modules]
//! path = "modules"
//! mirrorlib = ".omnirouter/mirror"
//! default_capabilities = ["logging", "http_register"]
//!
//! [modules.capabilities]
//! "hello_world.so" = ["all"]
//!
//! [logging]
//! level = "info"
//! file = "logs/omnirouter.log"
//! json = false
//! ```

use crate::capabilities::Capabilities;
use crate::modules::CapabilityPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "omnirouter.toml";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_MIRROR_DIR: &str = ".omnirouter/mirror";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting: modules.path")]
    MissingModulePath,

    #[error("invalid listen address {0:?}")]
    InvalidListen(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub modules: ModulesSection,
    pub logging: LoggingSection,
    /// Keys and capability names found in the file that are not understood.
    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModulesSection {
    /// Module source root. Mandatory.
    pub path: Option<PathBuf>,
    /// Staging directory loaded copies are made in.
    pub mirrorlib: PathBuf,
    pub default_capabilities: Vec<String>,
    /// Per-file-name capability overrides.
    pub capabilities: HashMap<String, Vec<String>>,
}

impl Default for ModulesSection {
    fn default() -> Self {
        Self {
            path: None,
            mirrorlib: PathBuf::from(DEFAULT_MIRROR_DIR),
            default_capabilities: vec!["logging".to_string(), "http_register".to_string()],
            capabilities: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Optional log file, rotated daily.
    pub file: Option<PathBuf>,
    /// JSON console output.
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// Fully validated settings the runtime is started with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub mirror_dir: PathBuf,
    pub listen: SocketAddr,
    pub policy: CapabilityPolicy,
    pub logging: LoggingSection,
    pub unknown_keys: Vec<String>,
}

impl Settings {
    /// Log every unrecognized key or capability name. Called once logging
    /// is up.
    pub fn warn_unknown_keys(&self) {
        for key in &self.unknown_keys {
            warn!(key = %key, "Ignoring unrecognized configuration entry");
        }
    }
}

impl Config {
    /// Parse a TOML document, recording keys that are not understood.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        if let Ok(table) = content.parse::<toml::Table>() {
            config.unknown_keys = unknown_keys(&table);
        }
        Ok(config)
    }

    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Validate and convert into runtime settings.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let root = self
            .modules
            .path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingModulePath)?;

        let listen = self
            .server
            .listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidListen(self.server.listen.clone()))?;

        let mut unknown_keys = self.unknown_keys;
        let mut policy = CapabilityPolicy::new(parse_capabilities(
            &self.modules.default_capabilities,
            "modules.default_capabilities",
            &mut unknown_keys,
        ));
        let mut overrides: Vec<_> = self.modules.capabilities.iter().collect();
        overrides.sort();
        for (file, names) in overrides {
            let context = format!("modules.capabilities.{}", file);
            let caps = parse_capabilities(names, &context, &mut unknown_keys);
            policy = policy.with_override(file.clone(), caps);
        }

        Ok(Settings {
            root,
            mirror_dir: self.modules.mirrorlib,
            listen,
            policy,
            logging: self.logging,
            unknown_keys,
        })
    }
}

/// Combine capability names into one set.
///
/// Unknown names are skipped and recorded in `unknown` as `context[name]`.
pub fn parse_capabilities(names: &[String], context: &str, unknown: &mut Vec<String>) -> Capabilities {
    names.iter().fold(Capabilities::NONE, |caps, name| match Capabilities::from_name(name) {
        Some(c) => caps | c,
        None => {
            unknown.push(format!("{}[{}]", context, name));
            caps
        }
    })
}

/// Dotted paths of keys the schema does not know about.
pub fn unknown_keys(table: &toml::Table) -> Vec<String> {
    const SECTIONS: &[(&str, &[&str])] = &[
        ("server", &["listen"]),
        ("modules", &["path", "mirrorlib", "default_capabilities", "capabilities"]),
        ("logging", &["level", "file", "json"]),
    ];

    let mut unknown = Vec::new();
    for (key, value) in table {
        let Some((_, known)) = SECTIONS.iter().find(|(name, _)| *name == key.as_str()) else {
            unknown.push(key.clone());
            continue;
        };
        if let Some(section) = value.as_table() {
            unknown.extend(
                section
                    .keys()
                    .filter(|k| !known.contains(&k.as_str()))
                    .map(|k| format!("{}.{}", key, k)),
            );
        }
    }
    unknown.sort();
    unknown
}
