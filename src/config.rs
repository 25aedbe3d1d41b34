//! Configuration for mockwire.
//!
//! Settings come from layered TOML files: later files override earlier ones,
//! merged table by table, so a project file can refine a site-wide one. All
//! sections have working defaults; a daemon started with no files at all
//! records against a default destination-less setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub forward: ForwardConfig,
    pub record: RecordConfig,
    pub edits: EditConfig,
}

/// Dispatch-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind; also echoed in the startup announce line.
    pub hostname: String,
    /// Handle each connection in its own worker, or inline in the loop.
    pub threaded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            threaded: true,
        }
    }
}

/// Where live client-socket traffic is forwarded to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Real destination as `host:port`. Without it, live client traffic
    /// gets no responses.
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Payload prefixes judged enquiry-only: answered but never persisted.
    pub enquiries: Vec<String>,
}

/// File-edit tracking settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// Directory names pruned, with their contents, from edit walks.
    pub ignore_dirs: Vec<String>,
    /// Programs whose file edits may complete after the command returns.
    pub asynchronous_programs: Vec<String>,
}

impl Config {
    /// Load a single configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_layered(std::slice::from_ref(&path.to_path_buf()))
    }

    /// Load a list of configuration files, later files overriding earlier
    /// ones. Merging happens at the TOML table level before deserializing,
    /// so a later file only needs the keys it changes.
    pub fn load_layered(paths: &[std::path::PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in paths {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let value: toml::Value =
                toml::from_str(&content).map_err(|e| ConfigError::Parse {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            merge_value(&mut merged, value);
        }
        let config: Config = merged.try_into().map_err(|e| ConfigError::Parse {
            path: paths.last().cloned().unwrap_or_default(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.hostname.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.hostname",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    pub fn is_threaded(&self) -> bool {
        self.server.threaded
    }

    pub fn ignore_dirs(&self) -> &[String] {
        &self.edits.ignore_dirs
    }

    pub fn enquiry_prefixes(&self) -> &[String] {
        &self.record.enquiries
    }

    pub fn destination(&self) -> Option<&str> {
        self.forward.destination.as_deref()
    }
}

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

/// Recursive table merge; non-table values from `src` replace `dst` wholesale.
fn merge_value(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(dst_table), toml::Value::Table(src_table)) => {
            for (key, src_value) in src_table {
                match dst_table.get_mut(&key) {
                    Some(dst_value) => merge_value(dst_value, src_value),
                    None => {
                        dst_table.insert(key, src_value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}
