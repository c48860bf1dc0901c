use thiserror::Error;

use emgr_codemap::CodeTableError;
use emgr_config::ConfigError;
use emgr_jit::MethodHandle;

/// Why a single chain could not be built. Only that chain is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain `{chain}` lists no JITs")]
    NoJits { chain: String },

    #[error("chain `{chain}`: no library configured for JIT `{jit}`")]
    NoJitPath { chain: String, jit: String },

    #[error("chain `{chain}`: cannot load JIT `{jit}`: {reason}")]
    Load {
        chain: String,
        jit: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no chains configured")]
    NoChains,

    #[error("chain `{0}` is declared twice")]
    DuplicateChain(String),

    #[error("every chain failed to build: {}", join(.0))]
    AllChainsFailed(Vec<ChainError>),

    #[error("execution manager was already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn join(failures: &[ChainError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmError {
    #[error("execution manager is not ready")]
    NotReady,

    #[error("no executor bound; direct execution needs a single one-step chain")]
    NoExecutor,

    #[error("executor declined to run {0:?}")]
    ExecutionFailed(MethodHandle),

    #[error(transparent)]
    CodeTable(#[from] CodeTableError),
}
