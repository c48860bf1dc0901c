//! Shared-library JIT plugins.

use std::ffi::CString;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use libloading::Library;
use parking_lot::Mutex;
use tracing::debug;

use crate::access::ProfileAccess;
use crate::ffi::{
    self, AdaptorLookupFn, CompileFn, EnableProfilingFn, ExecuteMethodFn, InitFn,
    ProfileNotificationFn, SetProfileAccessFn,
};
use crate::handle::{CollectorHandle, JValue, JitHandle, MethodHandle, ProfileHandle};
use crate::plugin::{CompileResult, JitCapabilities, JitPlugin, ProfileRole};

/// Thin wrapper around a `libloading::Library` with reference counting so
/// resolved entry points can share ownership of the mapping.
#[derive(Clone)]
pub struct DynamicLibrary {
    inner: Arc<Library>,
}

impl DynamicLibrary {
    pub fn new(library: Library) -> Self {
        Self {
            inner: Arc::new(library),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load JIT library {}", path.display()))?;
        Ok(Self::new(library))
    }
}

impl Deref for DynamicLibrary {
    type Target = Library;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

/// Produces a plugin for one chain step.
///
/// `jit_name` is the step's configured name; a library serving several JIT
/// names tells them apart through the name passed to `init`.
pub trait JitLoader {
    fn load(&self, path: &Path, jit_name: &str) -> Result<Box<dyn JitPlugin>>;
}

/// Loads JIT plugins from shared libraries. Every call opens the library
/// again; steps sharing a path each get their own plugin instance.
#[derive(Default)]
pub struct DynamicJitLoader {
    adaptor_lookup: Option<AdaptorLookupFn>,
}

impl DynamicJitLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver handed to every plugin's `JIT_init`.
    pub fn with_adaptor_lookup(mut self, lookup: AdaptorLookupFn) -> Self {
        self.adaptor_lookup = Some(lookup);
        self
    }
}

impl JitLoader for DynamicJitLoader {
    fn load(&self, path: &Path, jit_name: &str) -> Result<Box<dyn JitPlugin>> {
        let library = DynamicLibrary::open(path)?;
        let jit = DynamicJit::from_library(library, path, jit_name, self.adaptor_lookup)
            .with_context(|| format!("JIT `{jit_name}` is not a valid plugin"))?;
        Ok(Box::new(jit))
    }
}

/// A JIT whose entry points were resolved from a shared library.
pub struct DynamicJit {
    path: PathBuf,
    name: CString,
    init: InitFn,
    compile: CompileFn,
    set_profile_access: Option<SetProfileAccessFn>,
    enable_profiling: Option<EnableProfilingFn>,
    profile_notification: Option<ProfileNotificationFn>,
    execute_method: Option<ExecuteMethodFn>,
    adaptor_lookup: Option<AdaptorLookupFn>,
    // Boxed so a context pointer given to the library never moves. Earlier
    // contexts are kept: the library may still hold their pointers.
    access: Mutex<Vec<Box<Arc<dyn ProfileAccess>>>>,
    // Declared last: the entry points above point into this mapping.
    _library: DynamicLibrary,
}

impl DynamicJit {
    pub fn from_library(
        library: DynamicLibrary,
        path: &Path,
        name: &str,
        adaptor_lookup: Option<AdaptorLookupFn>,
    ) -> Result<Self> {
        let name = CString::new(name).context("JIT name contains a NUL byte")?;
        let init = unsafe { library.get::<InitFn>(ffi::INIT_SYMBOL) }
            .context("missing mandatory JIT_init symbol")
            .map(|symbol| *symbol)?;
        let compile = unsafe { library.get::<CompileFn>(ffi::COMPILE_SYMBOL) }
            .context("missing mandatory JIT_compile_method symbol")
            .map(|symbol| *symbol)?;

        let set_profile_access =
            optional::<SetProfileAccessFn>(&library, ffi::SET_PROFILE_ACCESS_SYMBOL);
        let enable_profiling =
            optional::<EnableProfilingFn>(&library, ffi::ENABLE_PROFILING_SYMBOL);
        let profile_notification =
            optional::<ProfileNotificationFn>(&library, ffi::PROFILE_NOTIFICATION_SYMBOL);
        let execute_method = optional::<ExecuteMethodFn>(&library, ffi::EXECUTE_METHOD_SYMBOL);

        debug!(
            path = %path.display(),
            profile_access = set_profile_access.is_some(),
            enable_profiling = enable_profiling.is_some(),
            profile_notification = profile_notification.is_some(),
            execute_method = execute_method.is_some(),
            "resolved JIT entry points"
        );

        Ok(Self {
            path: path.to_path_buf(),
            name,
            init,
            compile,
            set_profile_access,
            enable_profiling,
            profile_notification,
            execute_method,
            adaptor_lookup,
            access: Mutex::new(Vec::new()),
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn optional<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
    unsafe { library.get::<T>(symbol) }.ok().map(|symbol| *symbol)
}

impl JitPlugin for DynamicJit {
    fn capabilities(&self) -> JitCapabilities {
        JitCapabilities {
            profile_access: self.set_profile_access.is_some(),
            enable_profiling: self.enable_profiling.is_some(),
            profile_notification: self.profile_notification.is_some(),
            direct_execution: self.execute_method.is_some(),
        }
    }

    fn init(&self, jit: JitHandle, name: &str) {
        if self.name.as_bytes() != name.as_bytes() {
            debug!(loaded = ?self.name, name, "JIT initialized under another name");
        }
        unsafe { (self.init)(jit.to_raw(), self.name.as_ptr(), self.adaptor_lookup) };
    }

    fn set_profile_access_interface(&self, jit: JitHandle, access: Arc<dyn ProfileAccess>) {
        let Some(set_profile_access) = self.set_profile_access else {
            return;
        };
        let mut contexts = self.access.lock();
        contexts.push(Box::new(access));
        let Some(boxed) = contexts.last() else {
            return;
        };
        let em = ffi::context_ptr(boxed);
        unsafe { set_profile_access(jit.to_raw(), em, &raw const ffi::PROFILE_ACCESS_TABLE) };
    }

    fn enable_profiling(
        &self,
        jit: JitHandle,
        collector: CollectorHandle,
        role: ProfileRole,
    ) -> bool {
        self.enable_profiling.is_some_and(|enable| unsafe {
            enable(jit.to_raw(), collector.to_raw(), role as u32)
        })
    }

    fn profile_notification(&self, jit: JitHandle, profile: ProfileHandle, method: MethodHandle) {
        if let Some(notify) = self.profile_notification {
            unsafe { notify(jit.to_raw(), profile.to_raw(), method.to_raw()) };
        }
    }

    fn compile(&self, jit: JitHandle, method: MethodHandle) -> CompileResult {
        CompileResult::from_raw(unsafe { (self.compile)(jit.to_raw(), method.to_raw()) })
    }

    fn execute_method(
        &self,
        jit: JitHandle,
        method: MethodHandle,
        args: &[JValue],
    ) -> Option<JValue> {
        let execute = self.execute_method?;
        let mut ret = 0_u64;
        // JValue is repr(transparent) over u64.
        let ok = unsafe {
            execute(
                jit.to_raw(),
                method.to_raw(),
                args.as_ptr().cast::<u64>(),
                args.len(),
                &raw mut ret,
            )
        };
        ok.then_some(JValue(ret))
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{c_char, c_void};

    use super::*;
    use crate::ffi::ProfileAccessTable;
    use crate::ffi::tests::{COLLECTOR, FakeAccess};
    use crate::plugin::ProfileKind;

    #[cfg(target_os = "linux")]
    const LIBC: &str = "libc.so.6";

    #[cfg(target_os = "linux")]
    fn libc() -> DynamicLibrary {
        DynamicLibrary::open(Path::new(LIBC)).unwrap()
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_library_without_init_is_rejected() {
        let err = DynamicJit::from_library(libc(), Path::new(LIBC), "JET", None)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("JIT_init"));

        let err = DynamicJitLoader::new()
            .load(Path::new(LIBC), "JET")
            .err()
            .unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("JIT `JET` is not a valid plugin"));
        assert!(message.contains("JIT_init"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_optional_symbols_resolve_to_none_when_absent() {
        let library = libc();
        assert!(
            optional::<ProfileNotificationFn>(&library, ffi::PROFILE_NOTIFICATION_SYMBOL).is_none()
        );
        assert!(optional::<ExecuteMethodFn>(&library, ffi::EXECUTE_METHOD_SYMBOL).is_none());
        assert!(optional::<unsafe extern "C" fn()>(&library, b"strlen").is_some());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_nul_in_jit_name_is_a_load_error() {
        let err = DynamicJitLoader::new()
            .load(Path::new(LIBC), "J\0T")
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("NUL byte"));
    }

    unsafe extern "C" fn init_stub(
        _jit: usize,
        _name: *const c_char,
        _lookup: Option<AdaptorLookupFn>,
    ) {
    }

    unsafe extern "C" fn compile_stub(_jit: usize, _method: usize) -> u32 {
        0
    }

    static CONTEXTS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    unsafe extern "C" fn record_context(
        _jit: usize,
        em: *const c_void,
        _table: *const ProfileAccessTable,
    ) {
        CONTEXTS.lock().push(em as usize);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_earlier_access_contexts_stay_valid() {
        let jit = DynamicJit {
            path: PathBuf::from(LIBC),
            name: CString::new("JET").unwrap(),
            init: init_stub,
            compile: compile_stub,
            set_profile_access: Some(record_context),
            enable_profiling: None,
            profile_notification: None,
            execute_method: None,
            adaptor_lookup: None,
            access: Mutex::new(Vec::new()),
            _library: libc(),
        };
        let handle = JitHandle::from_raw(1).unwrap();
        jit.set_profile_access_interface(handle, Arc::new(FakeAccess::default()));
        jit.set_profile_access_interface(handle, Arc::new(FakeAccess::default()));

        let contexts = CONTEXTS.lock().clone();
        assert_eq!(contexts.len(), 2);
        assert_ne!(contexts[0], contexts[1]);
        assert_eq!(jit.access.lock().len(), 2);

        // The first pointer handed out still reaches a live context.
        let kind = unsafe {
            let em = contexts[0] as *const c_void;
            (ffi::PROFILE_ACCESS_TABLE.get_collector_kind)(em, COLLECTOR)
        };
        assert_eq!(kind, ProfileKind::EntryBackedge as u32);
    }

    #[test]
    fn test_missing_library_reports_path() {
        let loader = DynamicJitLoader::new();
        let err = loader
            .load(Path::new("/nonexistent/libjit_missing.so"), "JET")
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("/nonexistent/libjit_missing.so"));
    }
}
