//! JIT plugin boundary.
//!
//! Every compilation back end is an opaque plugin negotiated through
//! [`JitPlugin`]. Plugins written in Rust implement the trait directly;
//! shared libraries exporting the C symbols in [`ffi`] are wrapped by
//! [`DynamicJit`]. Optional entry points map to the trait's default no-op
//! methods and are advertised through [`JitCapabilities`].

pub mod access;
pub mod dynamic;
pub mod ffi;
pub mod handle;
pub mod plugin;

pub use access::ProfileAccess;
pub use dynamic::{DynamicJit, DynamicJitLoader, DynamicLibrary, JitLoader};
pub use ffi::{AdaptorLookupFn, PROFILE_ACCESS_TABLE, ProfileAccessTable};
pub use handle::{ClassHandle, CollectorHandle, JValue, JitHandle, MethodHandle, ProfileHandle};
pub use plugin::{CompileResult, JitCapabilities, JitPlugin, ProfileKind, ProfileRole};
