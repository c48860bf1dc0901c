//! Process-level options of the execution manager.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::properties::Properties;

/// Property overriding [`EmOptions::tick_period_ms`].
pub const TICK_PERIOD_KEY: &str = "em.tbsTickMs";
/// Property holding the fallback JIT library for every chain.
pub const JIT_PATH_KEY: &str = "em.jitPath";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmOptions {
    /// Period of the external sampling timer, in milliseconds.
    pub tick_period_ms: u64,

    /// Log every compile attempt unless a step overrides it with `<jit>.log`.
    pub log_compilations: bool,

    /// JIT library used when neither the step, the chain nor `em.jitPath`
    /// names one.
    pub default_jit_path: Option<PathBuf>,

    /// Configuration file the VM should read, if any.
    pub config_path: Option<PathBuf>,
}

impl Default for EmOptions {
    fn default() -> Self {
        Self {
            tick_period_ms: 10,
            log_compilations: false,
            default_jit_path: None,
            config_path: None,
        }
    }
}

impl EmOptions {
    /// Load options from environment variables
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(val) = std::env::var("EMGR_TICK_MS") {
            options.tick_period_ms = val.parse().unwrap_or(options.tick_period_ms);
        }

        if let Ok(val) = std::env::var("EMGR_LOG_COMPILE") {
            options.log_compilations = val.parse().unwrap_or(false);
        }

        if let Ok(val) = std::env::var("EMGR_JIT_PATH") {
            options.default_jit_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("EMGR_CONFIG") {
            options.config_path = Some(PathBuf::from(val));
        }

        options
    }

    /// Apply `em.*` overrides from the property set (properties win over
    /// the environment).
    pub fn merge_with_properties(mut self, props: &Properties) -> Result<Self, ConfigError> {
        if let Some(period) = props.get_number::<u64>(TICK_PERIOD_KEY)? {
            if period == 0 {
                return Err(ConfigError::Invalid {
                    key: TICK_PERIOD_KEY.to_string(),
                    reason: "tick period must be positive".to_string(),
                });
            }
            self.tick_period_ms = period;
        }

        if let Some(log) = props.get_bool("em.logCompile") {
            self.log_compilations = log;
        }

        Ok(self)
    }

    pub const fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}
