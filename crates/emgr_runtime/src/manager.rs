//! The execution manager: first compilation, profile-driven recompilation,
//! timer fan-out and the code lookup table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashSet;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use emgr_codemap::{CodeChunk, CodeTable, CodeTableStats};
use emgr_config::{EmOptions, Properties};
use emgr_jit::{ClassHandle, CompileResult, JValue, JitHandle, JitLoader, MethodHandle};
use emgr_profile::MethodProfile;

use crate::access::ProfileAccessBridge;
use crate::builder::ChainBuilder;
use crate::chain::{Chain, ChainLayout, Step};
use crate::error::{BuildError, ChainError, EmError};
use crate::method::MethodDesc;
use crate::registry::{CollectorLayout, CollectorRegistry};
use crate::tbs::TbsScheduler;

/// What [`ExecutionManager::profile_ready`] did with a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompile {
    /// Another call is already recompiling this profile.
    InFlight,
    /// The producer is the last step of its chain.
    NoNextStep,
    /// The profile's collector or producer is not part of this manager.
    Unknown,
    Compiled(CompileResult),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmStats {
    pub compile_requests: u64,
    pub compile_failures: u64,
    /// Hot profiles that led to a compile by the next step.
    pub recompilations: u64,
    pub tbs_ticks: u64,
    pub profiles: usize,
    pub code: CodeTableStats,
}

/// Chain, collector and executor layout of a ready manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineLayout {
    pub chains: Vec<ChainLayout>,
    pub collectors: Vec<CollectorLayout>,
    pub executor: Option<usize>,
    pub dropped_chains: Vec<String>,
}

struct Engine {
    options: EmOptions,
    chains: Vec<Chain>,
    registry: Arc<CollectorRegistry>,
    tbs: TbsScheduler,
    executor: Option<JitHandle>,
    failures: Vec<ChainError>,
    code: CodeTable,
}

impl Engine {
    fn locate(&self, jit: JitHandle) -> Option<(&Chain, usize)> {
        self.chains
            .iter()
            .find_map(|chain| chain.position(jit).map(|position| (chain, position)))
    }

    fn step(&self, jit: JitHandle) -> Option<&Step> {
        let (chain, position) = self.locate(jit)?;
        chain.steps.get(position)
    }
}

enum EmState {
    Uninitialized,
    Ready(Arc<Engine>),
    Destroyed,
}

#[derive(Default)]
struct Counters {
    compile_requests: AtomicU64,
    compile_failures: AtomicU64,
    recompilations: AtomicU64,
}

/// Removes a profile from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<AHashSet<usize>>,
    key: usize,
}

impl<'a> InFlight<'a> {
    /// `None` if the profile is already being recompiled.
    fn enter(set: &'a Mutex<AHashSet<usize>>, profile: &Arc<MethodProfile>) -> Option<Self> {
        let key = Arc::as_ptr(profile) as usize;
        let inserted = set.lock().insert(key);
        inserted.then(|| Self { set, key })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Adaptive execution manager of one VM.
///
/// Lifecycle is `Uninitialized -> Ready -> Destroyed`. Every operation takes
/// a snapshot of the engine under a short read lock and runs JIT calls
/// without holding it. `destroy` must not race with other operations.
pub struct ExecutionManager {
    options: EmOptions,
    this: Weak<Self>,
    state: RwLock<EmState>,
    in_flight: Mutex<AHashSet<usize>>,
    counters: Counters,
}

impl ExecutionManager {
    pub fn new(options: EmOptions) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            options,
            this: this.clone(),
            state: RwLock::new(EmState::Uninitialized),
            in_flight: Mutex::new(AHashSet::new()),
            counters: Counters::default(),
        })
    }

    /// Build chains and collectors from `props`, loading JITs through
    /// `loader`. On error the manager stays uninitialized and every plugin
    /// loaded by the attempt is dropped.
    pub fn init(&self, props: &Properties, loader: &dyn JitLoader) -> Result<(), BuildError> {
        if !matches!(*self.state.read(), EmState::Uninitialized) {
            return Err(BuildError::AlreadyInitialized);
        }

        let options = self.options.clone().merge_with_properties(props)?;
        let registry = Arc::new(CollectorRegistry::new());
        let access = Arc::new(ProfileAccessBridge::new(
            Arc::clone(&registry),
            self.this.clone(),
        ));
        let built = ChainBuilder::new(props, &options, loader, &registry, access).build()?;

        let collectors = registry.all();
        let engine = Engine {
            tbs: TbsScheduler::new(&collectors),
            options,
            chains: built.chains,
            registry,
            executor: built.executor,
            failures: built.failures,
            code: CodeTable::new(),
        };
        info!(
            chains = engine.chains.len(),
            collectors = collectors.len(),
            tbs_clients = engine.tbs.len(),
            "execution manager ready"
        );

        let mut state = self.state.write();
        if !matches!(*state, EmState::Uninitialized) {
            return Err(BuildError::AlreadyInitialized);
        }
        *state = EmState::Ready(Arc::new(engine));
        Ok(())
    }

    /// Release chains, collectors and the code table.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), EmState::Destroyed);
        if let EmState::Ready(engine) = previous {
            let stats = self.stats_of(&engine);
            info!(
                compile_requests = stats.compile_requests,
                compile_failures = stats.compile_failures,
                recompilations = stats.recompilations,
                tbs_ticks = stats.tbs_ticks,
                profiles = stats.profiles,
                "execution manager destroyed"
            );
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), EmState::Ready(_))
    }

    fn engine(&self) -> Result<Arc<Engine>, EmError> {
        match &*self.state.read() {
            EmState::Ready(engine) => Ok(Arc::clone(engine)),
            EmState::Uninitialized | EmState::Destroyed => Err(EmError::NotReady),
        }
    }

    /// Run `method` without compiling it, through the bound executor.
    pub fn execute_method(&self, method: MethodHandle, args: &[JValue]) -> Result<JValue, EmError> {
        let engine = self.engine()?;
        let step = engine
            .executor
            .and_then(|jit| engine.step(jit))
            .ok_or(EmError::NoExecutor)?;
        step.plugin
            .execute_method(step.handle, method, args)
            .ok_or(EmError::ExecutionFailed(method))
    }

    /// Compile `method` with the first chain whose filters accept it,
    /// falling through the chain's steps until one succeeds.
    pub fn compile_method(&self, method: &MethodDesc) -> CompileResult {
        let Ok(engine) = self.engine() else {
            return CompileResult::Failure;
        };
        let request = self.counters.compile_requests.fetch_add(1, Ordering::Relaxed) + 1;

        let result = engine
            .chains
            .iter()
            .find(|chain| chain.accepts(method, request))
            .map_or(CompileResult::Failure, |chain| chain.compile(method));
        if !result.is_success() {
            self.counters.compile_failures.fetch_add(1, Ordering::Relaxed);
            debug!(method = %method.qualified_name(), request, "no JIT compiled the method");
        }
        result
    }

    /// A collector found `profile` hot: let its producer reset its counters,
    /// then recompile with the next step of the producer's chain.
    ///
    /// At most one call per profile proceeds at a time; overlapping and
    /// re-entrant calls return [`Recompile::InFlight`].
    pub fn profile_ready(&self, profile: &Arc<MethodProfile>) -> Result<Recompile, EmError> {
        let engine = self.engine()?;
        let Some(_guard) = InFlight::enter(&self.in_flight, profile) else {
            return Ok(Recompile::InFlight);
        };

        let method = profile.method();
        let located = engine
            .registry
            .get(profile.collector())
            .and_then(|collector| engine.locate(collector.generator()));
        let Some((chain, position)) = located else {
            warn!(?method, collector = ?profile.collector(), "profile has no known producer");
            return Ok(Recompile::Unknown);
        };

        let Some(producer) = chain.steps.get(position) else {
            return Ok(Recompile::Unknown);
        };
        producer
            .plugin
            .profile_notification(producer.handle, profile.handle(), method);

        let Some(next) = chain.steps.get(position + 1) else {
            debug!(chain = %chain.name, ?method, "hot method already at the last step");
            return Ok(Recompile::NoNextStep);
        };
        self.counters.recompilations.fetch_add(1, Ordering::Relaxed);
        let result = next.compile(&chain.name, method, || format!("{method:?}"));
        Ok(Recompile::Compiled(result))
    }

    /// One tick of the external sampling timer.
    pub fn tbs_timeout(&self) -> Result<(), EmError> {
        let engine = self.engine()?;
        for profile in engine.tbs.advance() {
            self.profile_ready(&profile)?;
        }
        Ok(())
    }

    /// Whether the VM has to run the sampling timer at all.
    pub fn needs_thread_support(&self) -> bool {
        self.engine().is_ok_and(|engine| !engine.tbs.is_empty())
    }

    /// Sampling timer period.
    pub fn timeout(&self) -> Duration {
        self.engine()
            .map_or_else(|_| self.options.tick_period(), |engine| engine.options.tick_period())
    }

    pub fn register_code_chunk(
        &self,
        method: MethodHandle,
        start: usize,
        size: usize,
        data: usize,
    ) -> Result<(), EmError> {
        self.engine()?.code.register(method, start, size, data)?;
        Ok(())
    }

    pub fn lookup_code_chunk(
        &self,
        ip: usize,
        is_ip_past: bool,
    ) -> Result<Option<CodeChunk>, EmError> {
        Ok(self.engine()?.code.lookup(ip, is_ip_past))
    }

    pub fn unregister_code_chunk(&self, start: usize) -> Result<bool, EmError> {
        Ok(self.engine()?.code.unregister(start))
    }

    /// Drop all code of `method`, e.g. after deoptimization.
    pub fn unregister_method_code(&self, method: MethodHandle) -> Result<usize, EmError> {
        Ok(self.engine()?.code.unregister_method(method))
    }

    pub fn class_unloading(&self, class: ClassHandle) -> Result<(), EmError> {
        self.engine()?.registry.class_unloading(class);
        Ok(())
    }

    pub fn collectors(&self) -> Result<Arc<CollectorRegistry>, EmError> {
        Ok(Arc::clone(&self.engine()?.registry))
    }

    pub fn layout(&self) -> Result<EngineLayout, EmError> {
        let engine = self.engine()?;
        Ok(EngineLayout {
            chains: engine.chains.iter().map(Chain::layout).collect(),
            collectors: engine.registry.layout(),
            executor: engine.executor.map(JitHandle::to_raw),
            dropped_chains: engine.failures.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn stats(&self) -> EmStats {
        self.engine()
            .map_or_else(|_| self.stats_of_counters(), |engine| self.stats_of(&engine))
    }

    fn stats_of(&self, engine: &Engine) -> EmStats {
        EmStats {
            tbs_ticks: engine.tbs.tick(),
            profiles: engine.registry.profile_count(),
            code: engine.code.stats(),
            ..self.stats_of_counters()
        }
    }

    fn stats_of_counters(&self) -> EmStats {
        EmStats {
            compile_requests: self.counters.compile_requests.load(Ordering::Relaxed),
            compile_failures: self.counters.compile_failures.load(Ordering::Relaxed),
            recompilations: self.counters.recompilations.load(Ordering::Relaxed),
            ..EmStats::default()
        }
    }
}
