use crate::inference::InferenceResult;
use arc_swap::ArcSwap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::time::{Duration, Instant};

/// The most recently committed inference result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub result: InferenceResult,
    /// `None` until the first write.
    pub produced_at: Option<Instant>,
}

impl CacheEntry {
    pub fn age(&self) -> Option<Duration> {
        self.produced_at.map(|at| at.elapsed())
    }
}

/// Single-slot holder shared by the inference task (writer) and the render
/// loop (reader). Writes swap a whole entry in, so a reader sees either the old
/// or the new entry and never a mix.
#[derive(Debug, Default)]
pub struct ResultCache {
    entry: ArcSwap<CacheEntry>,
    version: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Arc<CacheEntry> {
        self.entry.load_full()
    }

    pub fn write(&self, result: InferenceResult) {
        let entry = CacheEntry {
            result,
            produced_at: Some(Instant::now()),
        };
        self.entry.store(Arc::new(entry));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Number of committed writes.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
