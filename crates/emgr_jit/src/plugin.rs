use std::sync::Arc;

use serde::{Deserialize, Serialize};

use emgr_config::ProfilerType;

use crate::access::ProfileAccess;
use crate::handle::{CollectorHandle, JValue, JitHandle, MethodHandle, ProfileHandle};

/// Outcome of a compile request. Never an error type: a failed compile is an
/// ordinary answer that makes the manager try the next step.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompileResult {
    Success = 0,
    Failure = 1,
}

impl CompileResult {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Decode the C return value; anything but zero is a failure.
    pub const fn from_raw(raw: u32) -> Self {
        if raw == 0 { Self::Success } else { Self::Failure }
    }
}

/// Whether a JIT produces or consumes a collector's data.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileRole {
    Generate = 0,
    Use = 1,
}

impl ProfileRole {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Generate),
            1 => Some(Self::Use),
            _ => None,
        }
    }
}

/// Profile kind as seen through the access interface.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileKind {
    EntryBackedge = 0,
    Edge = 1,
    Value = 2,
}

impl ProfileKind {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::EntryBackedge),
            1 => Some(Self::Edge),
            2 => Some(Self::Value),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::EntryBackedge => "entry/backedge",
            Self::Edge => "edge",
            Self::Value => "value",
        }
    }
}

impl From<ProfilerType> for ProfileKind {
    fn from(value: ProfilerType) -> Self {
        match value {
            ProfilerType::EntryBackedge => Self::EntryBackedge,
            ProfilerType::Edge => Self::Edge,
            ProfilerType::Value => Self::Value,
        }
    }
}

/// Optional entry points a JIT exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitCapabilities {
    pub profile_access: bool,
    pub enable_profiling: bool,
    pub profile_notification: bool,
    pub direct_execution: bool,
}

impl JitCapabilities {
    pub const fn all() -> Self {
        Self {
            profile_access: true,
            enable_profiling: true,
            profile_notification: true,
            direct_execution: true,
        }
    }
}

/// A negotiated compilation back end.
///
/// `init` and `compile` are mandatory. The remaining methods are optional
/// capabilities whose defaults behave like a JIT that does not export them.
pub trait JitPlugin: Send + Sync {
    fn capabilities(&self) -> JitCapabilities {
        JitCapabilities::default()
    }

    fn init(&self, jit: JitHandle, name: &str);

    fn set_profile_access_interface(&self, _jit: JitHandle, _access: Arc<dyn ProfileAccess>) {}

    /// Ask the JIT to produce or consume a collector's data. `false` means
    /// the pairing is unsupported.
    fn enable_profiling(
        &self,
        _jit: JitHandle,
        _collector: CollectorHandle,
        _role: ProfileRole,
    ) -> bool {
        false
    }

    /// Called before the method is recompiled so the producing JIT can patch
    /// or reset its counters.
    fn profile_notification(
        &self,
        _jit: JitHandle,
        _profile: ProfileHandle,
        _method: MethodHandle,
    ) {
    }

    fn compile(&self, jit: JitHandle, method: MethodHandle) -> CompileResult;

    /// Run a method without compiling it. `None` when unsupported.
    fn execute_method(
        &self,
        _jit: JitHandle,
        _method: MethodHandle,
        _args: &[JValue],
    ) -> Option<JValue> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareJit;

    impl JitPlugin for BareJit {
        fn init(&self, _jit: JitHandle, _name: &str) {}

        fn compile(&self, _jit: JitHandle, _method: MethodHandle) -> CompileResult {
            CompileResult::Failure
        }
    }

    #[test]
    fn test_optional_hooks_default_to_noop() {
        let jit = BareJit;
        let handle = JitHandle::from_raw(1).unwrap();
        let method = MethodHandle::from_raw(0x10).unwrap();

        assert_eq!(jit.capabilities(), JitCapabilities::default());
        assert!(!jit.enable_profiling(
            handle,
            CollectorHandle::from_raw(1).unwrap(),
            ProfileRole::Generate
        ));
        assert_eq!(jit.execute_method(handle, method, &[]), None);
        assert_eq!(jit.compile(handle, method), CompileResult::Failure);
    }

    #[test]
    fn test_raw_decoding() {
        assert_eq!(CompileResult::from_raw(0), CompileResult::Success);
        assert_eq!(CompileResult::from_raw(7), CompileResult::Failure);
        assert_eq!(ProfileRole::from_raw(1), Some(ProfileRole::Use));
        assert_eq!(ProfileRole::from_raw(2), None);
        assert_eq!(ProfileKind::from_raw(2), Some(ProfileKind::Value));
        assert_eq!(ProfileKind::from(ProfilerType::Edge), ProfileKind::Edge);
    }
}
