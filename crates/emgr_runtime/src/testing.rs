//! In-memory JITs for exercising chains without shared libraries.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::{Result, bail};
use parking_lot::Mutex;

use emgr_jit::{
    CollectorHandle, CompileResult, JValue, JitCapabilities, JitHandle, JitLoader, JitPlugin,
    MethodHandle, ProfileAccess, ProfileHandle, ProfileRole,
};

#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    pub compiles: bool,
    pub profiling: bool,
    pub direct_execution: bool,
    pub compile_delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            compiles: true,
            profiling: true,
            direct_execution: false,
            compile_delay: Duration::ZERO,
        }
    }
}

type CompileHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Shared record of everything the mock JITs were asked to do.
#[derive(Default)]
pub struct Probe {
    events: Mutex<Vec<String>>,
    compiles: Mutex<AHashMap<String, usize>>,
    access: Mutex<Option<Arc<dyn ProfileAccess>>>,
    on_compile: Mutex<Option<CompileHook>>,
    loads: AtomicUsize,
}

impl Probe {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn events_with(&self, prefix: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn compiles(&self, jit: &str) -> usize {
        self.compiles.lock().get(jit).copied().unwrap_or(0)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// The access interface most recently handed to a JIT.
    pub fn access(&self) -> Arc<dyn ProfileAccess> {
        self.access.lock().clone().expect("no JIT received profile access")
    }

    pub fn set_on_compile(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_compile.lock() = Some(Arc::new(hook));
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

struct MockJit {
    name: String,
    behavior: Behavior,
    probe: Arc<Probe>,
}

impl JitPlugin for MockJit {
    fn capabilities(&self) -> JitCapabilities {
        JitCapabilities {
            profile_access: self.behavior.profiling,
            enable_profiling: self.behavior.profiling,
            profile_notification: true,
            direct_execution: self.behavior.direct_execution,
        }
    }

    fn init(&self, jit: JitHandle, name: &str) {
        self.probe.record(format!("init {name} {}", jit.to_raw()));
    }

    fn set_profile_access_interface(&self, _jit: JitHandle, access: Arc<dyn ProfileAccess>) {
        *self.probe.access.lock() = Some(access);
    }

    fn enable_profiling(
        &self,
        _jit: JitHandle,
        collector: CollectorHandle,
        role: ProfileRole,
    ) -> bool {
        self.probe
            .record(format!("enable {} {role:?} {}", self.name, collector.to_raw()));
        self.behavior.profiling
    }

    fn profile_notification(&self, _jit: JitHandle, _profile: ProfileHandle, method: MethodHandle) {
        self.probe
            .record(format!("notify {} {:#x}", self.name, method.to_raw()));
    }

    fn compile(&self, _jit: JitHandle, method: MethodHandle) -> CompileResult {
        *self.probe.compiles.lock().entry(self.name.clone()).or_insert(0) += 1;
        self.probe
            .record(format!("compile {} {:#x}", self.name, method.to_raw()));
        let hook = self.probe.on_compile.lock().clone();
        if let Some(hook) = hook {
            hook(&self.name);
        }
        thread::sleep(self.behavior.compile_delay);
        if self.behavior.compiles {
            CompileResult::Success
        } else {
            CompileResult::Failure
        }
    }

    fn execute_method(
        &self,
        _jit: JitHandle,
        _method: MethodHandle,
        args: &[JValue],
    ) -> Option<JValue> {
        self.behavior
            .direct_execution
            .then(|| JValue(args.iter().map(|arg| arg.0).sum()))
    }
}

/// Loads [`MockJit`]s. Any path containing `missing` fails to load.
#[derive(Default)]
pub struct MockLoader {
    behaviors: AHashMap<String, Behavior>,
    pub probe: Arc<Probe>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, jit: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(jit.to_string(), behavior);
        self
    }
}

impl JitLoader for MockLoader {
    fn load(&self, path: &Path, jit_name: &str) -> Result<Box<dyn JitPlugin>> {
        self.probe
            .record(format!("load {jit_name} {}", path.display()));
        if path.to_string_lossy().contains("missing") {
            bail!("cannot open {}", path.display());
        }
        self.probe.loads.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockJit {
            name: jit_name.to_string(),
            behavior: self.behaviors.get(jit_name).copied().unwrap_or_default(),
            probe: Arc::clone(&self.probe),
        }))
    }
}
