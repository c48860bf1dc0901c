use emgr_jit::MethodHandle;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("collector `{collector}` already holds a profile for {method:?}")]
    AlreadyExists {
        collector: String,
        method: MethodHandle,
    },

    #[error("instrumentation key {0} is listed twice")]
    DuplicateKey(u32),

    #[error("profile has no instrumentation key {0}")]
    UnknownKey(u32),

    #[error("profile was not created by collector `{0}`")]
    ForeignProfile(String),

    #[error("stale instrumentation: profile checksum {expected:#x}, caller has {found:#x}")]
    ChecksumMismatch { expected: u32, found: u32 },
}
