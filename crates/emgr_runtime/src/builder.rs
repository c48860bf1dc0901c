//! Turns a property set into loaded chains and bound collectors.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashSet;
use tracing::{debug, info, warn};

use emgr_config::{
    CHAINS_KEY, CollectorParams, CollectorSpec, EmOptions, JIT_PATH_KEY, Properties,
};
use emgr_jit::{CollectorHandle, JitHandle, JitLoader, ProfileAccess, ProfileRole};
use emgr_profile::{
    EbProfileCollector, EdgeProfileCollector, ProfileCollector, ValueProfileCollector,
};

use crate::chain::{Chain, Step};
use crate::error::{BuildError, ChainError};
use crate::filter::MethodFilter;
use crate::registry::CollectorRegistry;

/// Result of a successful build.
pub struct BuiltChains {
    pub chains: Vec<Chain>,
    /// Step bound for direct execution, if any.
    pub executor: Option<JitHandle>,
    /// Chains that were dropped.
    pub failures: Vec<ChainError>,
}

pub struct ChainBuilder<'a> {
    props: &'a Properties,
    options: &'a EmOptions,
    loader: &'a dyn JitLoader,
    registry: &'a CollectorRegistry,
    access: Arc<dyn ProfileAccess>,
    next_jit: usize,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(
        props: &'a Properties,
        options: &'a EmOptions,
        loader: &'a dyn JitLoader,
        registry: &'a CollectorRegistry,
        access: Arc<dyn ProfileAccess>,
    ) -> Self {
        Self {
            props,
            options,
            loader,
            registry,
            access,
            next_jit: 0,
        }
    }

    pub fn build(mut self) -> Result<BuiltChains, BuildError> {
        let names = self.chain_names()?;

        let mut chains = Vec::with_capacity(names.len());
        let mut failures = Vec::new();
        for name in &names {
            match self.build_chain(name) {
                Ok(chain) => chains.push(chain),
                Err(err) => {
                    warn!(chain = %name, %err, "chain dropped");
                    failures.push(err);
                }
            }
        }
        if chains.is_empty() {
            return Err(BuildError::AllChainsFailed(failures));
        }

        for chain in &chains {
            self.bind_collectors(chain);
        }

        let executor = match chains.as_slice() {
            [chain] => match chain.steps.as_slice() {
                [step] if step.capabilities.direct_execution => Some(step.handle),
                _ => None,
            },
            _ => None,
        };

        info!(
            chains = chains.len(),
            dropped = failures.len(),
            collectors = self.registry.len(),
            executor = executor.is_some(),
            "execution chains built"
        );
        Ok(BuiltChains {
            chains,
            executor,
            failures,
        })
    }

    /// All `chains` entries, in order. Repeated keys add to the list.
    fn chain_names(&self) -> Result<Vec<String>, BuildError> {
        let mut names = Vec::new();
        let mut seen = AHashSet::new();
        let entries = self
            .props
            .get_all(CHAINS_KEY)
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty());
        for name in entries {
            if !seen.insert(name) {
                return Err(BuildError::DuplicateChain(name.to_string()));
            }
            names.push(name.to_string());
        }
        if names.is_empty() {
            return Err(BuildError::NoChains);
        }
        Ok(names)
    }

    fn build_chain(&mut self, name: &str) -> Result<Chain, ChainError> {
        let jits = self.props.get_list(&format!("{name}.jits"));
        if jits.is_empty() {
            return Err(ChainError::NoJits {
                chain: name.to_string(),
            });
        }

        let filters = self
            .props
            .get_all(&format!("{name}.filter"))
            .filter_map(|text| {
                MethodFilter::parse(text)
                    .inspect_err(|err| warn!(chain = name, %err, "filter skipped"))
                    .ok()
            })
            .collect();

        let steps = jits
            .iter()
            .map(|jit| self.load_step(name, jit))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Chain {
            name: name.to_string(),
            steps,
            filters,
        })
    }

    fn load_step(&mut self, chain: &str, jit: &str) -> Result<Step, ChainError> {
        let library = self.library_path(chain, jit).ok_or_else(|| ChainError::NoJitPath {
            chain: chain.to_string(),
            jit: jit.to_string(),
        })?;
        let plugin = self
            .loader
            .load(&library, jit)
            .map_err(|err| ChainError::Load {
                chain: chain.to_string(),
                jit: jit.to_string(),
                reason: format!("{err:#}"),
            })?;

        let handle = JitHandle::from_nonzero(NonZeroUsize::MIN.saturating_add(self.next_jit));
        self.next_jit += 1;
        plugin.init(handle, jit);
        let capabilities = plugin.capabilities();
        if capabilities.profile_access {
            plugin.set_profile_access_interface(handle, Arc::clone(&self.access));
        }

        let log = self
            .props
            .get_bool(&format!("{jit}.log"))
            .unwrap_or(self.options.log_compilations);
        debug!(
            chain,
            jit,
            ?handle,
            library = %library.display(),
            ?capabilities,
            "JIT step ready"
        );

        Ok(Step {
            handle,
            name: jit.to_string(),
            library,
            log,
            capabilities,
            plugin,
        })
    }

    /// `<jit>.file`, `em.<jit>.jitPath`, `<chain>.jitPath`, `em.jitPath`,
    /// then the process default.
    fn library_path(&self, chain: &str, jit: &str) -> Option<PathBuf> {
        [
            format!("{jit}.file"),
            format!("em.{jit}.jitPath"),
            format!("{chain}.jitPath"),
            JIT_PATH_KEY.to_string(),
        ]
        .iter()
        .find_map(|key| self.props.get(key))
        .map(PathBuf::from)
        .or_else(|| self.options.default_jit_path.clone())
    }

    fn bind_collectors(&self, chain: &Chain) {
        for (position, step) in chain.steps.iter().enumerate() {
            for name in self.props.get_list(&format!("{}.genProfile", step.name)) {
                self.bind_generator(chain, step, &name);
            }
            for name in self.props.get_list(&format!("{}.useProfile", step.name)) {
                self.bind_consumer(chain, position, step, &name);
            }
        }
    }

    fn bind_generator(&self, chain: &Chain, step: &Step, name: &str) {
        if let Some(existing) = self.registry.by_name(name) {
            warn!(
                chain = %chain.name,
                jit = %step.name,
                collector = name,
                producer = ?existing.generator(),
                "collector already has a producer; skipped"
            );
            return;
        }

        let spec = match CollectorSpec::from_properties(name, self.props) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(jit = %step.name, collector = name, %err, "collector skipped");
                return;
            }
        };

        let handle = self.registry.next_handle();
        if !step
            .plugin
            .enable_profiling(step.handle, handle, ProfileRole::Generate)
        {
            warn!(
                jit = %step.name,
                collector = name,
                "JIT cannot generate this profile; collector dropped"
            );
            return;
        }
        self.registry.register(new_collector(handle, spec, step.handle));
    }

    fn bind_consumer(&self, chain: &Chain, position: usize, step: &Step, name: &str) {
        let Some(collector) = self.registry.by_name(name) else {
            warn!(jit = %step.name, collector = name, "useProfile names an unknown collector");
            return;
        };
        let produced_earlier = chain
            .position(collector.generator())
            .is_some_and(|producer| producer < position);
        if !produced_earlier {
            warn!(
                chain = %chain.name,
                jit = %step.name,
                collector = name,
                "collector is not produced by an earlier step of this chain; usage skipped"
            );
            return;
        }

        if step
            .plugin
            .enable_profiling(step.handle, collector.handle(), ProfileRole::Use)
        {
            collector.info().add_consumer(step.handle);
        } else {
            warn!(jit = %step.name, collector = name, "JIT cannot use this profile");
        }
    }
}

fn new_collector(
    handle: CollectorHandle,
    spec: CollectorSpec,
    generator: JitHandle,
) -> Arc<dyn ProfileCollector> {
    match spec.params {
        CollectorParams::EntryBackedge(params) => {
            Arc::new(EbProfileCollector::new(handle, spec.name, generator, params))
        }
        CollectorParams::Edge(params) => {
            Arc::new(EdgeProfileCollector::new(handle, spec.name, generator, params))
        }
        CollectorParams::Value(params) => {
            Arc::new(ValueProfileCollector::new(handle, spec.name, generator, params))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use crate::access::ProfileAccessBridge;
    use crate::testing::{Behavior, MockLoader};

    use super::*;

    fn build_with(
        text: &str,
        options: &EmOptions,
        loader: &MockLoader,
    ) -> (Result<BuiltChains, BuildError>, Arc<CollectorRegistry>) {
        let props = Properties::parse(text).unwrap();
        let registry = Arc::new(CollectorRegistry::new());
        let access = Arc::new(ProfileAccessBridge::new(Arc::clone(&registry), Weak::new()));
        let built = ChainBuilder::new(&props, options, loader, &registry, access).build();
        (built, registry)
    }

    fn build(
        text: &str,
        loader: &MockLoader,
    ) -> (Result<BuiltChains, BuildError>, Arc<CollectorRegistry>) {
        build_with(text, &EmOptions::default(), loader)
    }

    #[test]
    fn test_library_resolution_order() {
        let loader = MockLoader::new();
        let (built, _) = build(
            "chains=c,d\nc.jits=A,B,C\nd.jits=D\nA.file=/jit/a.so\nem.A.jitPath=/jit/ignored.so\n\
             em.B.jitPath=/jit/b.so\nc.jitPath=/jit/chain.so\nem.jitPath=/jit/em.so\n",
            &loader,
        );
        assert_eq!(built.unwrap().chains.len(), 2);
        assert_eq!(
            loader.probe.events_with("load"),
            vec![
                "load A /jit/a.so",
                "load B /jit/b.so",
                "load C /jit/chain.so",
                "load D /jit/em.so",
            ]
        );

        let loader = MockLoader::new();
        let options = EmOptions {
            default_jit_path: Some("/jit/default.so".into()),
            ..EmOptions::default()
        };
        let (built, _) = build_with("chains=c\nc.jits=A\n", &options, &loader);
        assert!(built.is_ok());
        assert_eq!(loader.probe.events_with("load"), vec!["load A /jit/default.so"]);
    }

    #[test]
    fn test_failed_chains_are_dropped() {
        let loader = MockLoader::new();
        let (built, _) = build(
            "chains=good,bad,empty,nopath\ngood.jits=A\nbad.jits=B,X\nX.file=/missing/x.so\n\
             em.A.jitPath=/jit/all.so\nem.B.jitPath=/jit/all.so\nnopath.jits=N\n",
            &loader,
        );
        let built = built.unwrap();

        assert_eq!(built.chains.len(), 1);
        assert_eq!(built.chains[0].name(), "good");
        assert_eq!(built.failures.len(), 3);
        assert!(matches!(
            &built.failures[0],
            ChainError::Load { chain, jit, .. } if chain == "bad" && jit == "X"
        ));
        assert_eq!(
            built.failures[1],
            ChainError::NoJits {
                chain: "empty".to_string()
            }
        );
        assert!(matches!(&built.failures[2], ChainError::NoJitPath { jit, .. } if jit == "N"));
        assert_eq!(loader.probe.loads(), 2);
        assert_eq!(loader.probe.events_with("init"), vec!["init A 1", "init B 2"]);
    }

    #[test]
    fn test_whole_build_failures() {
        let loader = MockLoader::new();
        assert!(matches!(build("", &loader).0, Err(BuildError::NoChains)));
        assert!(matches!(
            build("chains=a,b,a\n", &loader).0,
            Err(BuildError::DuplicateChain(name)) if name == "a"
        ));
        assert!(matches!(
            build("chains=a\nchains=a\n", &loader).0,
            Err(BuildError::DuplicateChain(_))
        ));

        let err = build("chains=a\na.jits=A\nA.file=/missing/a.so\n", &loader)
            .0
            .err()
            .unwrap();
        assert!(matches!(&err, BuildError::AllChainsFailed(failures) if failures.len() == 1));
        assert!(err.to_string().contains("/missing/a.so"));
    }

    #[test]
    fn test_malformed_filter_is_skipped() {
        let loader = MockLoader::new();
        let (built, _) = build(
            "chains=c\nc.jits=A\nem.jitPath=/jit/a.so\nc.filter=+10-x\nc.filter=-Foo.\n",
            &loader,
        );
        let built = built.unwrap();
        let filters: Vec<String> = built.chains[0]
            .filters()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(filters, vec!["-Foo."]);
    }

    #[test]
    fn test_collectors_bind_to_producer_and_consumer() {
        let loader = MockLoader::new();
        let (built, registry) = build(
            "chains=c\nc.jits=A,B\nem.jitPath=/jit/x.so\nA.genProfile=EB,BROKEN\nB.useProfile=EB\n\
             EB.profilerType=EB_PROFILER\nBROKEN.profilerType=EB_PROFILER\nBROKEN.mode=LAZY\n",
            &loader,
        );
        built.unwrap();

        assert_eq!(registry.len(), 1);
        let eb = registry.by_name("EB").unwrap();
        assert_eq!(eb.generator().to_raw(), 1);
        assert_eq!(eb.consumers().iter().map(|j| j.to_raw()).collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            loader.probe.events_with("enable"),
            vec!["enable A Generate 1", "enable B Use 1"]
        );
    }

    #[test]
    fn test_use_before_produce_is_skipped() {
        let loader = MockLoader::new();
        let (_, registry) = build(
            "chains=c\nc.jits=A,B\nem.jitPath=/jit/x.so\nA.useProfile=P\nB.genProfile=P\n\
             P.profilerType=EDGE_PROFILER\n",
            &loader,
        );

        let edge = registry.by_name("P").unwrap();
        assert_eq!(edge.generator().to_raw(), 2);
        assert!(edge.consumers().is_empty());
        assert_eq!(loader.probe.events_with("enable"), vec!["enable B Generate 1"]);
    }

    #[test]
    fn test_one_producer_per_collector() {
        let loader = MockLoader::new();
        let (_, registry) = build(
            "chains=c,d\nc.jits=A\nd.jits=B\nem.jitPath=/jit/x.so\nA.genProfile=P\nB.genProfile=P\n\
             B.useProfile=P\nP.profilerType=VALUE_PROFILER\n",
            &loader,
        );

        assert_eq!(registry.len(), 1);
        let value = registry.by_name("P").unwrap();
        assert_eq!(value.generator().to_raw(), 1);
        assert!(value.consumers().is_empty());
    }

    #[test]
    fn test_refused_collector_is_dropped() {
        let loader = MockLoader::new().with(
            "A",
            Behavior {
                profiling: false,
                ..Behavior::default()
            },
        );
        let (built, registry) = build(
            "chains=c\nc.jits=A\nem.jitPath=/jit/x.so\nA.genProfile=P\n\
             P.profilerType=EB_PROFILER\n",
            &loader,
        );
        assert!(built.is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_executor_needs_single_step_chain() {
        let direct = Behavior {
            direct_execution: true,
            ..Behavior::default()
        };
        let loader = MockLoader::new().with("A", direct).with("B", direct);

        let (built, _) = build("chains=c\nc.jits=A\nem.jitPath=/jit/x.so\n", &loader);
        assert_eq!(built.unwrap().executor.map(JitHandle::to_raw), Some(1));

        let (built, _) = build("chains=c\nc.jits=A,B\nem.jitPath=/jit/x.so\n", &loader);
        assert_eq!(built.unwrap().executor, None);

        let (built, _) = build("chains=c,d\nc.jits=A\nd.jits=B\nem.jitPath=/jit/x.so\n", &loader);
        assert_eq!(built.unwrap().executor, None);
    }

    #[test]
    fn test_step_log_flag() {
        let loader = MockLoader::new();
        let options = EmOptions {
            log_compilations: true,
            ..EmOptions::default()
        };
        let (built, _) = build_with(
            "chains=c\nc.jits=A,B\nem.jitPath=/jit/x.so\nB.log=off\n",
            &options,
            &loader,
        );
        let built = built.unwrap();
        let logs: Vec<bool> = built.chains[0].steps().iter().map(|step| step.log).collect();
        assert_eq!(logs, vec![true, false]);
    }
}
