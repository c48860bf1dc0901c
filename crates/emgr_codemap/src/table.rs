use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use emgr_jit::MethodHandle;

/// A registered range `[start, start + size)` of emitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CodeChunk {
    pub method: MethodHandle,
    pub start: usize,
    pub size: usize,
    /// Opaque value supplied by the registering JIT.
    pub data: usize,
}

impl CodeChunk {
    /// One past the last byte.
    pub const fn end(&self) -> usize {
        self.start + self.size
    }

    pub const fn contains(&self, ip: usize) -> bool {
        ip >= self.start && ip - self.start < self.size
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeTableError {
    #[error("code chunk at {start:#x} has zero size")]
    Empty { start: usize },

    #[error("code chunk {start:#x}+{size:#x} wraps the address space")]
    Overflow { start: usize, size: usize },

    #[error("code chunk {start:#x}+{size:#x} overlaps {existing:#x}+{existing_size:#x}")]
    Overlap {
        start: usize,
        size: usize,
        existing: usize,
        existing_size: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CodeTableStats {
    pub chunks: usize,
    pub lookups: u64,
    pub misses: u64,
}

/// Ordered, non-overlapping code ranges behind one lock.
///
/// The lock only covers the map operation itself; nothing calls out while
/// holding it.
#[derive(Debug, Default)]
pub struct CodeTable {
    chunks: Mutex<BTreeMap<usize, CodeChunk>>,
    lookups: AtomicU64,
    misses: AtomicU64,
}

impl CodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        method: MethodHandle,
        start: usize,
        size: usize,
        data: usize,
    ) -> Result<(), CodeTableError> {
        if size == 0 {
            return Err(CodeTableError::Empty { start });
        }
        let end = start
            .checked_add(size)
            .ok_or(CodeTableError::Overflow { start, size })?;

        let mut chunks = self.chunks.lock();
        let before = chunks.range(..=start).next_back().map(|(_, chunk)| *chunk);
        let after = chunks.range(start..).next().map(|(_, chunk)| *chunk);
        let clash = before
            .filter(|chunk| chunk.end() > start)
            .or_else(|| after.filter(|chunk| chunk.start < end));
        if let Some(existing) = clash {
            return Err(CodeTableError::Overlap {
                start,
                size,
                existing: existing.start,
                existing_size: existing.size,
            });
        }

        chunks.insert(
            start,
            CodeChunk {
                method,
                start,
                size,
                data,
            },
        );
        drop(chunks);
        trace!(?method, start, size, "registered code chunk");
        Ok(())
    }

    /// Find the chunk containing `ip`. With `is_ip_past`, `ip` is a return
    /// address and the byte before it is looked up instead, so an address
    /// exactly at the end of a chunk still resolves to it.
    pub fn lookup(&self, ip: usize, is_ip_past: bool) -> Option<CodeChunk> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let key = if is_ip_past { ip.checked_sub(1) } else { Some(ip) };
        let found = key.and_then(|key| {
            self.chunks
                .lock()
                .range(..=key)
                .next_back()
                .map(|(_, chunk)| *chunk)
                .filter(|chunk| chunk.contains(key))
        });
        if found.is_none() {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// `false` if no chunk starts at `start`.
    pub fn unregister(&self, start: usize) -> bool {
        let removed = self.chunks.lock().remove(&start);
        if let Some(chunk) = removed {
            trace!(method = ?chunk.method, start, "unregistered code chunk");
        }
        removed.is_some()
    }

    /// Drop every chunk of `method`; returns how many were removed.
    pub fn unregister_method(&self, method: MethodHandle) -> usize {
        let mut chunks = self.chunks.lock();
        let before = chunks.len();
        chunks.retain(|_, chunk| chunk.method != method);
        let removed = before - chunks.len();
        drop(chunks);
        if removed > 0 {
            debug!(?method, removed, "unregistered method code");
        }
        removed
    }

    pub fn chunks_of(&self, method: MethodHandle) -> Vec<CodeChunk> {
        self.chunks
            .lock()
            .values()
            .filter(|chunk| chunk.method == method)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    pub fn stats(&self) -> CodeTableStats {
        CodeTableStats {
            chunks: self.len(),
            lookups: self.lookups.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
