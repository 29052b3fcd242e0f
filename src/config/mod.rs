//! # Configuration
//!
//! Options are declared once as typed consts in [`options`] and read through
//! their getters. Values are layered, each source overriding the previous:
//!
//! 1. option defaults
//! 2. `<work>/config/config.json`
//! 3. `<work>/config/secrets.json`
//! 4. environment variables `AUTOGRADER__X__Y` (sets `x.y`)
//! 5. command-line overrides `-c key=value`
//!
//! Config files are flat JSON objects keyed by dotted option names.
//! `dirs.base` decides where the config files live, so setting it inside a
//! file is rejected with [`ConfigError::BaseDirInFile`].

pub mod options;

pub use options::{BoolOption, IntOption, StringOption};

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "AUTOGRADER__";
pub const ENV_DOT_REPLACEMENT: &str = "__";
pub const CONFIG_FILENAME: &str = "config.json";
pub const SECRETS_FILENAME: &str = "secrets.json";

/// Directories created under the work dir.
pub const WORK_SUBDIRS: [&str; 8] = [
    "config",
    "backup",
    "cache",
    "logs",
    "database",
    "course_import",
    "sources",
    "run",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot set '{key}' in config file '{path}', use the command line")]
    BaseDirInFile { key: String, path: PathBuf },
    #[error("could not read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file '{0}' must contain a JSON object")]
    NotAnObject(PathBuf),
    #[error("malformed config override '{0}', expected key=value")]
    BadOverride(String),
}

/// Layered configuration values keyed by dotted option names.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    /// An empty config; every option reads its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Full startup layering: env and CLI first (they may move the work
    /// dir), then the config files, then env and CLI again so they win.
    pub fn load(overrides: &[String]) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.load_env();
        config.apply_overrides(overrides)?;

        let config_dir = config.config_dir();
        config.load_dir(&config_dir)?;

        config.load_env();
        config.apply_overrides(overrides)?;
        Ok(config)
    }

    /// Settings for unit tests: testing mode on, tasks off, work dir under `base`.
    pub fn for_testing(base: &Path) -> Self {
        let mut config = Config::new();
        config.set(options::UNIT_TESTING_MODE.key, true);
        config.set(options::NO_TASKS.key, true);
        config.set(options::BASE_DIR.key, base.to_string_lossy().to_string());
        config.set(options::LOG_BACKEND_LEVEL.key, "debug");
        config
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn unset(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Load `config.json` then `secrets.json` from `dir`, skipping missing files.
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), ConfigError> {
        for name in [CONFIG_FILENAME, SECRETS_FILENAME] {
            let path = dir.join(name);
            if path.exists() {
                self.load_file(&path)?;
            }
        }
        Ok(())
    }

    /// Merge a flat JSON object into the config; later loads win on conflicts.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let Value::Object(map) = parsed else {
            return Err(ConfigError::NotAnObject(path.to_path_buf()));
        };

        if map.contains_key(options::BASE_DIR.key) {
            return Err(ConfigError::BaseDirInFile {
                key: options::BASE_DIR.key.to_string(),
                path: path.to_path_buf(),
            });
        }

        let count = map.len();
        self.merge_object(map);
        debug!(path = %path.display(), keys = count, "Config file loaded");
        Ok(())
    }

    fn merge_object(&mut self, map: Map<String, Value>) {
        for (key, value) in map {
            self.values.insert(key, normalize_number(value));
        }
    }

    pub fn load_env(&mut self) {
        self.load_env_vars(std::env::vars());
    }

    /// Apply `AUTOGRADER__X__Y=value` pairs as `x.y = "value"`.
    pub fn load_env_vars<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = rest.replace(ENV_DOT_REPLACEMENT, ".").to_lowercase();
            self.set(&key, value);
        }
    }

    /// Apply `key=value` overrides from the command line.
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<(), ConfigError> {
        for raw in overrides {
            let Some((key, value)) = raw.split_once('=') else {
                return Err(ConfigError::BadOverride(raw.clone()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::BadOverride(raw.clone()));
            }
            self.set(key, value.trim());
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }

    pub fn base_dir(&self) -> PathBuf {
        let base = options::BASE_DIR.get(self);
        if base.is_empty() {
            default_base_dir()
        } else {
            PathBuf::from(base)
        }
    }

    /// `<dirs.base>/<instance.name>`.
    pub fn work_dir(&self) -> PathBuf {
        self.base_dir().join(options::NAME.get(self))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.work_dir().join("config")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.work_dir().join("run")
    }

    pub fn backup_dir(&self) -> PathBuf {
        let dir = options::BACKUP_DIR.get(self);
        if dir.is_empty() {
            self.work_dir().join("backup")
        } else {
            PathBuf::from(dir)
        }
    }

    pub fn status_path(&self) -> PathBuf {
        self.work_dir().join("status.json")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.work_dir().join("grade.pid")
    }

    /// Create the work dir and its standard subdirectories.
    pub fn ensure_work_dirs(&self) -> std::io::Result<PathBuf> {
        let work = self.work_dir();
        for sub in WORK_SUBDIRS {
            fs::create_dir_all(work.join(sub))?;
        }
        Ok(work)
    }
}

pub fn default_base_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local").join("share"),
        None => std::env::temp_dir(),
    }
}

// Whole floats loaded from JSON are treated as integers.
fn normalize_number(value: Value) -> Value {
    if let Value::Number(n) = &value {
        if n.is_f64() {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    return Value::from(f as i64);
                }
            }
        }
    }
    value
}

pub(crate) fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}
