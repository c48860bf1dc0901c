//! Adaptive execution manager.
//!
//! [`ExecutionManager`] owns the JIT chains built from configuration, routes
//! first compilations through them, escalates methods to later steps when a
//! profile collector reports them hot, and keeps the table mapping emitted
//! code back to methods.

pub mod access;
pub mod builder;
pub mod chain;
pub mod error;
pub mod filter;
pub mod manager;
pub mod method;
pub mod registry;
pub mod tbs;

#[cfg(test)]
mod testing;

pub use access::ProfileAccessBridge;
pub use builder::{BuiltChains, ChainBuilder};
pub use chain::{Chain, ChainLayout, Step, StepLayout};
pub use error::{BuildError, ChainError, EmError};
pub use filter::{FilterError, MethodFilter};
pub use manager::{EmStats, EngineLayout, ExecutionManager, Recompile};
pub use method::MethodDesc;
pub use registry::{CollectorLayout, CollectorRegistry};
pub use tbs::TbsScheduler;
