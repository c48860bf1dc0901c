use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use emgr_jit::{CompileResult, JitCapabilities, JitHandle, JitPlugin, MethodHandle};
use emgr_utils::Stopwatch;

use crate::filter::{self, MethodFilter};
use crate::method::MethodDesc;

/// One loaded JIT inside a chain.
pub struct Step {
    pub(crate) handle: JitHandle,
    pub(crate) name: String,
    pub(crate) library: PathBuf,
    pub(crate) log: bool,
    pub(crate) capabilities: JitCapabilities,
    pub(crate) plugin: Box<dyn JitPlugin>,
}

impl Step {
    pub const fn handle(&self) -> JitHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    pub const fn capabilities(&self) -> JitCapabilities {
        self.capabilities
    }

    pub fn plugin(&self) -> &dyn JitPlugin {
        self.plugin.as_ref()
    }

    /// Compile with this step's JIT, logging around the call when the step
    /// asks for it. `describe` is only evaluated for logging.
    pub(crate) fn compile(
        &self,
        chain: &str,
        method: MethodHandle,
        describe: impl FnOnce() -> String,
    ) -> CompileResult {
        if !self.log {
            return self.plugin.compile(self.handle, method);
        }

        let label = describe();
        info!(target: "emgr::compile", chain, jit = %self.name, method = %label, "compile start");
        let timer = Stopwatch::start_new();
        let result = self.plugin.compile(self.handle, method);
        info!(
            target: "emgr::compile",
            chain,
            jit = %self.name,
            method = %label,
            success = result.is_success(),
            elapsed_us = timer.elapsed_us(),
            "compile done"
        );
        result
    }
}

/// An ordered list of steps guarded by method filters. Immutable once built.
pub struct Chain {
    pub(crate) name: String,
    pub(crate) steps: Vec<Step>,
    pub(crate) filters: Vec<MethodFilter>,
}

impl Chain {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn filters(&self) -> &[MethodFilter] {
        &self.filters
    }

    pub fn accepts(&self, method: &MethodDesc, request: u64) -> bool {
        filter::accepts(&self.filters, method, request)
    }

    pub fn position(&self, jit: JitHandle) -> Option<usize> {
        self.steps.iter().position(|step| step.handle == jit)
    }

    /// Try each step in order until one succeeds.
    pub(crate) fn compile(&self, method: &MethodDesc) -> CompileResult {
        for step in &self.steps {
            if step
                .compile(&self.name, method.handle, || method.qualified_name())
                .is_success()
            {
                return CompileResult::Success;
            }
        }
        CompileResult::Failure
    }

    pub(crate) fn layout(&self) -> ChainLayout {
        ChainLayout {
            name: self.name.clone(),
            filters: self.filters.iter().map(ToString::to_string).collect(),
            steps: self
                .steps
                .iter()
                .map(|step| StepLayout {
                    name: step.name.clone(),
                    handle: step.handle.to_raw(),
                    library: step.library.clone(),
                    log: step.log,
                    capabilities: step.capabilities,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepLayout {
    pub name: String,
    pub handle: usize,
    pub library: PathBuf,
    pub log: bool,
    pub capabilities: JitCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLayout {
    pub name: String,
    pub filters: Vec<String>,
    pub steps: Vec<StepLayout>,
}
