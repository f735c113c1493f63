//! Hook configuration
//!
//! Defaults, then an optional TOML file named by `LUA_HOOK_CONFIG`, then
//! individual environment overrides.

use std::{env, fs, path::Path};

use serde::Deserialize;

use crate::error::{HookError, HookResult};

/// Environment variable naming a TOML configuration file
pub const CONFIG_ENV: &str = "LUA_HOOK_CONFIG";

/// Environment override for [`HookConfig::update_symbol`]
pub const UPDATE_SYMBOL_ENV: &str = "LUA_HOOK_UPDATE_SYMBOL";

/// Environment override for the log filter
pub const LOG_ENV: &str = "LUA_HOOK_LOG";

/// Mangled name of `Application::update()` in the stock host binary
pub const DEFAULT_UPDATE_SYMBOL: &str = "_ZN11Application6updateEv";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    /// Linker-mangled name of the host's update routine
    pub update_symbol: String,
    /// Whether to detour the update routine at all
    pub intercept_update: bool,
    /// Whether to detour `lua_close` and drop closed instances from the registry
    pub track_teardown: bool,
    /// Default `tracing` filter directive
    pub log_filter: String,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            update_symbol: DEFAULT_UPDATE_SYMBOL.to_string(),
            intercept_update: true,
            track_teardown: true,
            log_filter: "info".to_string(),
        }
    }
}

impl HookConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> HookResult<Self> {
        toml::from_str(source).map_err(|e| HookError::Config {
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> HookResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| HookError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&source)
    }

    /// Build the configuration from the process environment
    pub fn from_env() -> HookResult<Self> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides looked up through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(symbol) = var(UPDATE_SYMBOL_ENV) {
            self.update_symbol = symbol;
        }
        if let Some(filter) = var(LOG_ENV) {
            self.log_filter = filter;
        }
    }

    pub fn validate(&self) -> HookResult<()> {
        if self.intercept_update && self.update_symbol.trim().is_empty() {
            return Err(HookError::Config {
                reason: "update_symbol is empty while intercept_update is enabled".into(),
            });
        }
        Ok(())
    }
}
