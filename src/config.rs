//! Agent configuration resolved from environment variables.
//!
//! All lookups go through the [`Environment`] trait so the agent can be configured from the
//! process environment in production and from a plain map in tests.
//!
//! # Examples
//!
//! ```rust
//! use dotweave::config::{keys, Config, MapEnvironment};
//!
//! let env = MapEnvironment::from([
//!     (keys::INTEGRATIONS, "a.json; ;b.json"),
//!     (keys::EXCLUDE_PROCESSES, "devenv.exe"),
//! ]);
//!
//! let config = Config::from_env(&env);
//! assert!(config.enabled);
//! assert_eq!(config.integration_paths.len(), 2);
//! assert!(config.should_attach("w3wp.exe"));
//! assert!(!config.should_attach("devenv.exe"));
//! ```

use std::{collections::HashMap, path::PathBuf};

/// Names of the variables read by [`Config::from_env`].
pub mod keys {
    /// `0`/`false` disables the agent
    pub const ENABLED: &str = "DOTWEAVE_ENABLED";
    /// `1`/`true` enables debug logging
    pub const DEBUG: &str = "DOTWEAVE_DEBUG";
    /// `;`-separated integration definition files
    pub const INTEGRATIONS: &str = "DOTWEAVE_INTEGRATIONS";
    /// `;`-separated process names the agent attaches to, empty for all
    pub const PROCESSES: &str = "DOTWEAVE_PROCESSES";
    /// `;`-separated process names the agent never attaches to
    pub const EXCLUDE_PROCESSES: &str = "DOTWEAVE_EXCLUDE_PROCESSES";
    /// `;`-separated integration names to ignore
    pub const DISABLED_INTEGRATIONS: &str = "DOTWEAVE_DISABLED_INTEGRATIONS";
    /// `1`/`true` asks the runtime to disable JIT optimizations
    pub const DISABLE_OPTIMIZATIONS: &str = "DOTWEAVE_DISABLE_OPTIMIZATIONS";
}

const LIST_SEPARATOR: char = ';';

/// Source of configuration values.
pub trait Environment {
    /// Value of variable `key`, `None` if unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the environment of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory variables.
#[derive(Debug, Default, Clone)]
pub struct MapEnvironment {
    values: HashMap<String, String>,
}

impl MapEnvironment {
    /// Create an empty environment.
    #[must_use]
    pub fn new() -> Self {
        MapEnvironment::default()
    }

    /// Set `key` to `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for MapEnvironment {
    fn from(values: [(K, V); N]) -> Self {
        MapEnvironment {
            values: values
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl Environment for MapEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The agent attaches at all
    pub enabled: bool,
    /// Log at debug level
    pub debug: bool,
    /// Integration definition files, in load order
    pub integration_paths: Vec<PathBuf>,
    /// Processes to attach to, empty for all
    pub process_names: Vec<String>,
    /// Processes never attached to
    pub excluded_process_names: Vec<String>,
    /// Integrations ignored by name
    pub disabled_integrations: Vec<String>,
    /// Request JIT optimizations to be disabled
    pub disable_optimizations: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            debug: false,
            integration_paths: Vec::new(),
            process_names: Vec::new(),
            excluded_process_names: Vec::new(),
            disabled_integrations: Vec::new(),
            disable_optimizations: false,
        }
    }
}

impl Config {
    /// Resolve the configuration from `env`. Unset or unparsable values take their default.
    pub fn from_env(env: &dyn Environment) -> Config {
        let list = |key: &str| -> Vec<String> {
            env.get(key)
                .map(|value| {
                    value
                        .split(LIST_SEPARATOR)
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        let flag = |key: &str, default: bool| -> bool {
            env.get(key)
                .and_then(|value| parse_flag(&value))
                .unwrap_or(default)
        };

        Config {
            enabled: flag(keys::ENABLED, true),
            debug: flag(keys::DEBUG, false),
            integration_paths: list(keys::INTEGRATIONS)
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            process_names: list(keys::PROCESSES),
            excluded_process_names: list(keys::EXCLUDE_PROCESSES),
            disabled_integrations: list(keys::DISABLED_INTEGRATIONS),
            disable_optimizations: flag(keys::DISABLE_OPTIMIZATIONS, false),
        }
    }

    /// Returns true if the agent should attach to a process named `process_name`.
    ///
    /// The exclude list wins over the include list; an empty include list admits every process.
    #[must_use]
    pub fn should_attach(&self, process_name: &str) -> bool {
        if self
            .excluded_process_names
            .iter()
            .any(|name| name == process_name)
        {
            return false;
        }

        self.process_names.is_empty() || self.process_names.iter().any(|name| name == process_name)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// File name of the running executable, empty if it cannot be determined.
#[must_use]
pub fn current_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_default()
}
