//! Profile collectors.
//!
//! Three strategies share the [`ProfileCollector`] contract:
//! entry/backedge counters, per-edge counters and top-N value tables. Every
//! collector owns at most one [`MethodProfile`] per method; counter cells live
//! inside the `Arc`'d profile so their addresses can be baked into emitted
//! code.

pub mod collector;
pub mod eb;
pub mod edge;
pub mod error;
pub mod profile;
pub mod value;

pub use collector::{CollectorInfo, ProfileCollector, TbsClient};
pub use eb::{EbMethodProfile, EbProfileCollector};
pub use edge::{EdgeMethodProfile, EdgeProfileCollector};
pub use error::ProfileError;
pub use profile::MethodProfile;
pub use value::{TnvTable, ValueMethodProfile, ValueProfileCollector};
