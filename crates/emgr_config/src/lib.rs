//! Configuration for the execution manager.
//!
//! The manager consumes a flat, line-oriented property set (`key=value`,
//! repeatable keys allowed). This crate owns that representation plus the
//! typed readers for profile collector parameters and process-level options.

pub mod error;
pub mod options;
pub mod profiler;
pub mod properties;

pub use crate::error::ConfigError;
pub use crate::options::{EmOptions, JIT_PATH_KEY, TICK_PERIOD_KEY};
pub use crate::profiler::{
    CollectorParams, CollectorSpec, CounterParams, EbMode, ProfilerType, TnvAlgo,
    UpdateStrategy, ValueParams,
};
pub use crate::properties::Properties;

/// Property listing the configured chain names.
pub const CHAINS_KEY: &str = "chains";
