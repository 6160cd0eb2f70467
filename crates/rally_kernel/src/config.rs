//! Hierarchical configuration handed to subsystems.
//!
//! The process configuration is a single TOML document whose top-level keys
//! are subsystem names. The kernel hands each subsystem the subtree stored
//! under its own name, so a subsystem never sees (or depends on) the rest of
//! the document.
//!
//! Documents are assembled by [`ConfigLoader`] from up to three files in a
//! config directory, later files overriding earlier ones key by key:
//!
//! 1. `default.toml`
//! 2. `<environment>.toml` (only when an environment name is given)
//! 3. `custom.toml`
//!
//! Environment variables named `RALLY_<SECTION>__<KEY>` are applied last.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::{Table, Value};
use tracing::debug;

use crate::error::ConfigError;

/// Separator between path segments in environment variable overrides.
pub const ENV_SEPARATOR: &str = "__";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "RALLY_";

/// A view into the configuration tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemConfig {
    table: Table,
}

impl SystemConfig {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let table = toml::from_str::<Table>(source)?;
        Ok(Self { table })
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn as_table(&self) -> &Table {
        &self.table
    }

    /// Returns the subtree stored under `name`.
    ///
    /// A missing key, or a key holding a non-table value, yields an empty
    /// config rather than an error.
    pub fn subconfig(&self, name: &str) -> SystemConfig {
        match self.table.get(name) {
            Some(Value::Table(table)) => SystemConfig::new(table.clone()),
            _ => SystemConfig::empty(),
        }
    }

    /// Looks up a dotted key such as `"tls.cert_path"`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let mut current = self.table.get(segments.next()?)?;
        for segment in segments {
            current = current.as_table()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_integer)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or(default).to_string()
    }

    /// Sets a dotted key, creating intermediate tables as needed.
    ///
    /// Intermediate non-table values are replaced by tables.
    pub fn set(&mut self, key: &str, value: Value) {
        let segments: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = &mut self.table;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            let Value::Table(table) = entry else {
                return;
            };
            current = table;
        }
        current.insert(last.to_string(), value);
    }

    /// Deep-merges `other` into `self`. Tables merge key by key; any other
    /// value in `other` replaces the existing one.
    pub fn merge(&mut self, other: SystemConfig) {
        merge_tables(&mut self.table, other.table);
    }

    /// Deserializes this view into a typed settings struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        Value::Table(self.table.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))
    }
}

impl From<Table> for SystemConfig {
    fn from(table: Table) -> Self {
        Self::new(table)
    }
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        let incoming = match value {
            Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };
        if let Some(Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, Value::Table(incoming));
    }
}

/// Interprets an environment variable value as the most specific TOML
/// scalar it parses as: bool, then integer, then float, then string.
pub fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        return Value::Boolean(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    Value::String(raw.to_string())
}

/// Builds a [`SystemConfig`] from the config directory and the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    environment: Option<String>,
}

impl ConfigLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            environment: None,
        }
    }

    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment.filter(|e| !e.is_empty());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Candidate files in the order they are applied.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.dir.join("default.toml")];
        if let Some(environment) = &self.environment {
            files.push(self.dir.join(format!("{environment}.toml")));
        }
        files.push(self.dir.join("custom.toml"));
        files
    }

    /// Loads the files and applies overrides from the process environment.
    pub fn load(&self) -> Result<SystemConfig, ConfigError> {
        let mut config = self.load_files()?;
        self.apply_overrides(&mut config, std::env::vars());
        Ok(config)
    }

    /// Loads and merges the config files. Missing files are skipped.
    pub fn load_files(&self) -> Result<SystemConfig, ConfigError> {
        let mut config = SystemConfig::empty();
        for path in self.files() {
            if !path.exists() {
                debug!("Config file {} not found, skipping", path.display());
                continue;
            }

            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let table = toml::from_str::<Table>(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            debug!("📄 Loaded config file {}", path.display());
            config.merge(SystemConfig::new(table));
        }
        Ok(config)
    }

    /// Applies `PREFIX<SECTION>__<KEY>=value` variables to `config`.
    ///
    /// Only variables containing the separator are treated as overrides, so
    /// plain settings such as `RALLY_ENV` never leak into the document.
    pub fn apply_overrides<I>(&self, config: &mut SystemConfig, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if !rest.contains(ENV_SEPARATOR) {
                continue;
            }

            let key = rest
                .split(ENV_SEPARATOR)
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(".");
            debug!("Config override {} from {}", key, name);
            config.set(&key, parse_env_value(&raw));
        }
    }
}
