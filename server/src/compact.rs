//! Lazy background compaction of per-project vector indexes.
//!
//! The vector index deletes by orphaning: removed entries keep their graph
//! slots and degrade recall until the index is rebuilt from the canonical
//! embeddings in the metadata store. Compaction waits for a project to go
//! idle, rebuilds off to the side in batches, and hot-swaps the finished
//! index under the registry lock. Any incoming search cancels an in-flight
//! rebuild; the old index stays authoritative until the swap commits.

use crate::registry::ProjectRegistry;
use amanmcp_core::config::CompactionConfig;
use amanmcp_core::error::Result;
use amanmcp_core::store::{self, VectorIndex};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Vectors inserted between cancellation checks during a rebuild.
pub const REBUILD_BATCH: usize = 1000;

// ---------------------------------------------------------------------------
// Per-project state
// ---------------------------------------------------------------------------

struct CompactionState {
    last_search: Instant,
    last_compact: Option<Instant>,
    compacting: bool,
    cancel: Option<CancellationToken>,
    timer_armed: bool,
}

impl CompactionState {
    fn new() -> Self {
        Self {
            last_search: Instant::now(),
            last_compact: None,
            compacting: false,
            cancel: None,
            timer_armed: false,
        }
    }
}

/// Outcome of one rebuild attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Completed { vectors: usize },
    Cancelled,
    SkippedEmpty,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Cheap-to-clone handle; all state lives behind one shared inner so the
/// idle watchers spawned onto the runtime share it.
#[derive(Clone)]
pub struct CompactionManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ProjectRegistry>,
    config: CompactionConfig,
    states: DashMap<PathBuf, CompactionState>,
    shutdown: CancellationToken,
}

impl CompactionManager {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        config: CompactionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner { registry, config, states: DashMap::new(), shutdown }),
        }
    }

    /// Called when a search is dispatched for the project, before it runs
    /// and regardless of how it ends: an in-flight rebuild yields so the
    /// search gets the blocking pool to itself.
    pub fn interrupt(&self, root: &Path) {
        if !self.inner.config.enabled {
            return;
        }
        if let Some(state) = self.inner.states.get(root) {
            if state.compacting {
                if let Some(cancel) = &state.cancel {
                    debug!(project = %root.display(), "search interrupts compaction");
                    cancel.cancel();
                }
            }
        }
    }

    /// Called after each successful search: resets the idle timer and arms
    /// the idle watcher.
    pub fn notify_search(&self, root: &Path) {
        if !self.inner.config.enabled {
            return;
        }
        let mut arm = false;
        {
            let mut state =
                self.inner.states.entry(root.to_path_buf()).or_insert_with(CompactionState::new);
            state.last_search = Instant::now();
            if !state.timer_armed {
                state.timer_armed = true;
                arm = true;
            }
        }
        if arm {
            let inner = Arc::clone(&self.inner);
            let root = root.to_path_buf();
            tokio::spawn(async move { inner.idle_watch(root).await });
        }
    }

    /// Eligibility predicate. Every condition must hold.
    pub fn should_compact(&self, root: &Path) -> bool {
        self.inner.should_compact(root)
    }

    /// Record an externally observed compaction time (tests and status).
    pub fn set_last_compact(&self, root: &Path, at: Instant) {
        self.inner
            .states
            .entry(root.to_path_buf())
            .or_insert_with(CompactionState::new)
            .last_compact = Some(at);
    }

    pub fn is_compacting(&self, root: &Path) -> bool {
        self.inner.states.get(root).map(|s| s.compacting).unwrap_or(false)
    }
}

impl Inner {
    fn should_compact(&self, root: &Path) -> bool {
        if !self.config.enabled || self.shutdown.is_cancelled() {
            return false;
        }
        let (compacting, last_compact) = match self.states.get(root) {
            Some(s) => (s.compacting, s.last_compact),
            None => (false, None),
        };
        if compacting {
            return false;
        }
        if let Some(at) = last_compact {
            if at.elapsed() < Duration::from_secs(self.config.cooldown_secs) {
                return false;
            }
        }
        let Some(handle) = self.registry.peek(root) else {
            return false;
        };
        let stats = handle.stores().vector.stats();
        stats.orphans >= self.config.min_orphans
            && stats.orphan_ratio() >= self.config.orphan_ratio
    }

    /// Sleep until the project has been quiet for the idle window, then
    /// attempt one compaction. New searches re-arm the watcher.
    async fn idle_watch(self: Arc<Self>, root: PathBuf) {
        let idle = Duration::from_secs(self.config.idle_secs.max(1));
        loop {
            let since = match self.states.get(&root) {
                Some(s) => s.last_search.elapsed(),
                None => break,
            };
            if since >= idle {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(idle - since) => {}
                _ = self.shutdown.cancelled() => {
                    if let Some(mut s) = self.states.get_mut(&root) {
                        s.timer_armed = false;
                    }
                    return;
                }
            }
        }
        if let Some(mut s) = self.states.get_mut(&root) {
            s.timer_armed = false;
        }

        if self.should_compact(&root) {
            self.run_compaction(&root).await;
        }
    }

    /// One compaction attempt: rebuild on the blocking pool, then swap.
    /// Errors are logged and leave the previous index intact.
    async fn run_compaction(&self, root: &Path) {
        let cancel = self.shutdown.child_token();
        {
            let mut state =
                self.states.entry(root.to_path_buf()).or_insert_with(CompactionState::new);
            if state.compacting {
                return;
            }
            state.compacting = true;
            state.cancel = Some(cancel.clone());
        }

        let registry = Arc::clone(&self.registry);
        let target = root.to_path_buf();
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            rebuild_project(&registry, &target, &cancel)
        })
        .await;

        let mut state =
            self.states.entry(root.to_path_buf()).or_insert_with(CompactionState::new);
        state.compacting = false;
        state.cancel = None;
        match outcome {
            Ok(Ok(RebuildOutcome::Completed { vectors })) => {
                state.last_compact = Some(Instant::now());
                info!(
                    project = %root.display(),
                    vectors,
                    time_ms = started.elapsed().as_millis() as u64,
                    "compaction complete"
                );
            }
            Ok(Ok(RebuildOutcome::Cancelled)) => {
                debug!(project = %root.display(), "compaction cancelled");
            }
            Ok(Ok(RebuildOutcome::SkippedEmpty)) => {
                state.last_compact = Some(Instant::now());
                debug!(project = %root.display(), "compaction skipped, no embeddings");
            }
            Ok(Err(e)) => {
                warn!(project = %root.display(), error = %e, "compaction failed, previous index kept");
            }
            Err(e) => {
                warn!(project = %root.display(), error = %e, "compaction task panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rebuild
// ---------------------------------------------------------------------------

/// Rebuild a project's vector index from the canonical embeddings in its
/// metadata store, checking for cancellation between batches.
///
/// A partially built index is never visible: the live handle only changes
/// in the final hot-swap, which happens under the registry lock after the
/// new index has been persisted.
pub fn rebuild_project(
    registry: &ProjectRegistry,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<RebuildOutcome> {
    let Some(handle) = registry.peek(root) else {
        return Ok(RebuildOutcome::Cancelled);
    };
    let stores = handle.stores();

    let embeddings = stores.metadata.embeddings();
    if embeddings.is_empty() {
        return Ok(RebuildOutcome::SkippedEmpty);
    }
    let dim = embeddings.values().next().map(|v| v.len()).unwrap_or(0);

    let fresh = store::fresh_vector_index(root, dim);
    let entries: Vec<(&String, &Vec<f32>)> = embeddings.iter().collect();
    for batch in entries.chunks(REBUILD_BATCH) {
        if cancel.is_cancelled() {
            // Abandon the partial index without persisting it.
            return Ok(RebuildOutcome::Cancelled);
        }
        for (id, vector) in batch {
            fresh.add(id, vector)?;
        }
    }
    if cancel.is_cancelled() {
        return Ok(RebuildOutcome::Cancelled);
    }

    fresh.save()?;
    let vectors = fresh.stats().nodes;
    let old = registry.swap_vector(root, Arc::new(fresh))?;
    if let Err(e) = old.close() {
        warn!(project = %root.display(), error = %e, "old vector index close failed");
    }
    Ok(RebuildOutcome::Completed { vectors })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
