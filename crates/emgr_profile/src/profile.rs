use emgr_jit::{CollectorHandle, MethodHandle, ProfileHandle, ProfileKind};

use crate::eb::EbMethodProfile;
use crate::edge::EdgeMethodProfile;
use crate::value::ValueMethodProfile;

/// A per-method profile owned by exactly one collector.
///
/// Profiles are always shared through `Arc`; the address of the `Arc`'d value
/// doubles as the [`ProfileHandle`] given to JITs and stays stable until the
/// collector is dropped.
#[derive(Debug)]
pub enum MethodProfile {
    EntryBackedge(EbMethodProfile),
    Edge(EdgeMethodProfile),
    Value(ValueMethodProfile),
}

impl MethodProfile {
    pub const fn kind(&self) -> ProfileKind {
        match self {
            Self::EntryBackedge(_) => ProfileKind::EntryBackedge,
            Self::Edge(_) => ProfileKind::Edge,
            Self::Value(_) => ProfileKind::Value,
        }
    }

    pub const fn method(&self) -> MethodHandle {
        match self {
            Self::EntryBackedge(profile) => profile.method(),
            Self::Edge(profile) => profile.method(),
            Self::Value(profile) => profile.method(),
        }
    }

    pub const fn collector(&self) -> CollectorHandle {
        match self {
            Self::EntryBackedge(profile) => profile.collector(),
            Self::Edge(profile) => profile.collector(),
            Self::Value(profile) => profile.collector(),
        }
    }

    pub fn handle(&self) -> ProfileHandle {
        ProfileHandle::from_ref(self)
    }

    pub const fn as_entry_backedge(&self) -> Option<&EbMethodProfile> {
        match self {
            Self::EntryBackedge(profile) => Some(profile),
            _ => None,
        }
    }

    pub const fn as_edge(&self) -> Option<&EdgeMethodProfile> {
        match self {
            Self::Edge(profile) => Some(profile),
            _ => None,
        }
    }

    pub const fn as_value(&self) -> Option<&ValueMethodProfile> {
        match self {
            Self::Value(profile) => Some(profile),
            _ => None,
        }
    }
}
