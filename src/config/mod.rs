//! Worker configuration files.
//!
//! A configuration is a line-oriented `key=value` file. Before the file is
//! read, a set of reserved keys is pre-populated so that values can refer to
//! them through macros:
//!
//! - `Config{Path,Dir,FileName,Ext,Name}` for the configuration file itself
//! - `Dll{Path,Dir,FileName,Ext,Name}` for the hosting module
//! - `Environment:<NAME>` for every inherited environment variable
//! - `RandomGUID`, fresh on every load

pub mod environment;
pub mod error;
pub mod resolver;
pub mod store;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::endpoint::Endpoint;
pub use error::ConfigError;
pub use store::ConfigStore;

/// Prefix under which inherited environment variables are exposed.
pub const ENVIRONMENT_PREFIX: &str = "Environment:";

/// Facts about the hosting process that every loaded configuration sees.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// Path of the hosting module; relative config paths resolve against its directory.
    pub module_path: PathBuf,
    /// Inherited environment, names as reported by the OS.
    pub environment: Vec<(String, String)>,
}

impl HostContext {
    pub fn new(module_path: impl Into<PathBuf>, environment: Vec<(String, String)>) -> Self {
        Self {
            module_path: module_path.into(),
            environment,
        }
    }

    /// Capture the running executable and its environment.
    pub fn capture() -> std::io::Result<Self> {
        let module_path = std::env::current_exe()?;
        let environment = std::env::vars_os()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .collect();
        Ok(Self::new(module_path, environment))
    }

    /// Directory containing the hosting module.
    pub fn module_dir(&self) -> &Path {
        self.module_path.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// One parsed configuration file.
///
/// Values are fixed after construction. The only mutable part is the endpoint
/// slot, which holds the live connection to the worker once activation
/// succeeded. Dropping the config releases that endpoint.
pub struct Config {
    source_path: PathBuf,
    last_modified: SystemTime,
    values: HashMap<String, String>,
    endpoint: Mutex<Option<Arc<dyn Endpoint>>>,
}

impl Config {
    /// Read and parse the file at `path` (expected to be absolute already).
    pub fn load(path: &Path, host: &HostContext) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        // mtime first, so an edit racing the read is picked up on the next lookup
        let last_modified = fs::metadata(path).and_then(|m| m.modified()).map_err(io_err)?;
        let bytes = fs::read(path).map_err(io_err)?;
        // invalid UTF-8 becomes U+FFFD instead of failing the whole file
        let contents = String::from_utf8_lossy(&bytes);

        let config = Self::parse(path, last_modified, &contents, host)?;
        tracing::info!(
            "Loaded config '{}' ({} keys)",
            config.source_path.display(),
            config.values.len()
        );
        Ok(config)
    }

    /// Parse `contents` as if it had been read from `path`.
    pub fn parse(
        path: &Path,
        last_modified: SystemTime,
        contents: &str,
        host: &HostContext,
    ) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        split_path(&path.to_string_lossy(), "Config", &mut values);
        split_path(&host.module_path.to_string_lossy(), "Dll", &mut values);
        for (name, value) in &host.environment {
            values.insert(
                format!("{}{}", ENVIRONMENT_PREFIX, environment::normalize_name(name)),
                value.clone(),
            );
        }
        values.insert("RandomGUID".to_string(), random_guid());

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::MalformedLine {
                path: path.to_path_buf(),
                line_no: idx + 1,
                line: line.to_string(),
            })?;

            let value = resolver::resolve(value.trim(), |name| values.get(name).cloned())?;
            values.insert(key.trim().to_string(), value);
        }

        Ok(Self {
            source_path: path.to_path_buf(),
            last_modified,
            values,
            endpoint: Mutex::new(None),
        })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Look up a required key.
    pub fn get_value(&self, key: &str) -> Result<&str, ConfigError> {
        self.try_get_value(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Look up a key, falling back to `default`.
    pub fn get_value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.try_get_value(key).unwrap_or(default)
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn try_get_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The currently held endpoint, if activation succeeded before.
    pub fn endpoint(&self) -> Option<Arc<dyn Endpoint>> {
        self.slot().clone()
    }

    /// Swap the held endpoint, releasing the previous one.
    pub(crate) fn replace_endpoint(&self, endpoint: Option<Arc<dyn Endpoint>>) {
        let previous = std::mem::replace(&mut *self.slot(), endpoint);
        if let Some(previous) = previous {
            tracing::debug!("Releasing endpoint held by '{}'", self.source_path.display());
            previous.release();
        }
    }

    /// Release the held endpoint, if any.
    pub fn release_endpoint(&self) {
        self.replace_endpoint(None);
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn Endpoint>>> {
        // the slot carries no invariant a panicking holder could break
        self.endpoint.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.release_endpoint();
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("source_path", &self.source_path)
            .field("last_modified", &self.last_modified)
            .field("keys", &self.values.len())
            .field("has_endpoint", &self.slot().is_some())
            .finish()
    }
}

/// Store `<prefix>{Path,Dir,FileName,Ext,Name}` for `path`.
///
/// `Dir` is only set when the path contains a separator.
pub fn split_path(path: &str, prefix: &str, values: &mut HashMap<String, String>) {
    values.insert(format!("{}Path", prefix), path.to_string());

    let file_name = match path.rfind(std::path::is_separator) {
        Some(sep) => {
            values.insert(format!("{}Dir", prefix), path[..sep].to_string());
            // separators are single-byte on every platform
            &path[sep + 1..]
        }
        None => path,
    };
    values.insert(format!("{}FileName", prefix), file_name.to_string());

    let (name, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    values.insert(format!("{}Ext", prefix), ext.to_string());
    values.insert(format!("{}Name", prefix), name.to_string());
}

fn random_guid() -> String {
    format!("{{{}}}", uuid::Uuid::new_v4().hyphenated().to_string().to_uppercase())
}
