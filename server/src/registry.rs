//! Per-project live state and the LRU registry that owns it.
//!
//! The registry is the single owner of every `ProjectHandle`. Handles are
//! shared with in-flight searches as `Arc`s, so eviction can drop its map
//! reference at any time: the stores close when the last holder lets go,
//! never under an active call. Load, evict, close, and the compaction
//! vector swap are all serialized by the registry lock.

use amanmcp_core::error::{Error, Result};
use amanmcp_core::store::{self, KeywordIndex, MetadataStore, ProjectStores, VectorIndex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_PROJECTS: usize = 5;

// ---------------------------------------------------------------------------
// ProjectHandle
// ---------------------------------------------------------------------------

/// Live state of one loaded project: the store triple plus bookkeeping.
/// The vector handle sits behind its own lock because the compaction
/// hot-swap is the only mutation a handle ever sees.
pub struct ProjectHandle {
    root: PathBuf,
    metadata: Arc<dyn MetadataStore>,
    keyword: Arc<dyn KeywordIndex>,
    vector: RwLock<Arc<dyn VectorIndex>>,
    loaded_at: Instant,
    /// Monotonic use sequence, not wall time — LRU ordering must be exact
    /// even for back-to-back acquires.
    last_used: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectHandle")
            .field("root", &self.root)
            .field("loaded_at", &self.loaded_at)
            .field("last_used", &self.last_used)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ProjectHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Grab the store triple atomically. A search holds this snapshot for
    /// the duration of one call and is unaffected by a concurrent swap.
    pub fn stores(&self) -> ProjectStores {
        ProjectStores {
            metadata: Arc::clone(&self.metadata),
            keyword: Arc::clone(&self.keyword),
            vector: Arc::clone(&self.vector.read().unwrap()),
        }
    }

    /// Close all owned stores exactly once; failures are logged, never
    /// surfaced.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let stores = self.stores();
        for (name, result) in [
            ("metadata", stores.metadata.close()),
            ("keyword", stores.keyword.close()),
            ("vector", stores.vector.close()),
        ] {
            if let Err(e) = result {
                warn!(project = %self.root.display(), store = name, error = %e, "store close failed");
            }
        }
        debug!(project = %self.root.display(), "project handle closed");
    }
}

impl Drop for ProjectHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct ProjectRegistry {
    projects: RwLock<HashMap<PathBuf, Arc<ProjectHandle>>>,
    max_projects: usize,
    use_counter: AtomicU64,
}

impl ProjectRegistry {
    pub fn new(max_projects: usize) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            max_projects: max_projects.max(1),
            use_counter: AtomicU64::new(0),
        }
    }

    fn next_use(&self) -> u64 {
        self.use_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the handle for a project, loading it on miss. Fails with
    /// `ProjectNotIndexed` when the project has no data directory yet.
    pub fn acquire(&self, root: &Path) -> Result<Arc<ProjectHandle>> {
        if !store::project_data_dir(root).is_dir() {
            return Err(Error::ProjectNotIndexed(root.to_path_buf()));
        }
        self.acquire_or_init(root)
    }

    /// Like `acquire`, but creates the data directory for a project seen
    /// for the first time. The indexing path enters here.
    pub fn acquire_or_init(&self, root: &Path) -> Result<Arc<ProjectHandle>> {
        // Fast path: shared lock, bump last_used.
        {
            let projects = self.projects.read().unwrap();
            if let Some(handle) = projects.get(root) {
                handle.last_used.store(self.next_use(), Ordering::SeqCst);
                return Ok(Arc::clone(handle));
            }
        }

        // Miss: the write lock serializes load/evict transitions.
        let mut projects = self.projects.write().unwrap();
        if let Some(handle) = projects.get(root) {
            handle.last_used.store(self.next_use(), Ordering::SeqCst);
            return Ok(Arc::clone(handle));
        }

        let start = Instant::now();
        let stores = store::open_project_stores(root)?;
        let handle = Arc::new(ProjectHandle {
            root: root.to_path_buf(),
            metadata: stores.metadata,
            keyword: stores.keyword,
            vector: RwLock::new(stores.vector),
            loaded_at: Instant::now(),
            last_used: AtomicU64::new(self.next_use()),
            closed: AtomicBool::new(false),
        });
        projects.insert(root.to_path_buf(), Arc::clone(&handle));
        info!(
            project = %root.display(),
            load_ms = start.elapsed().as_millis() as u64,
            resident = projects.len(),
            "project loaded"
        );

        while projects.len() > self.max_projects {
            if evict_lru_locked(&mut projects).is_none() {
                break;
            }
        }

        Ok(handle)
    }

    /// Look up a resident handle without loading or touching it. The
    /// compaction manager uses this so maintenance never resurrects an
    /// evicted project.
    pub fn peek(&self, root: &Path) -> Option<Arc<ProjectHandle>> {
        self.projects.read().unwrap().get(root).map(Arc::clone)
    }

    /// Bump a project's recency without loading it.
    pub fn touch(&self, root: &Path) {
        let projects = self.projects.read().unwrap();
        if let Some(handle) = projects.get(root) {
            handle.last_used.store(self.next_use(), Ordering::SeqCst);
        }
    }

    /// Evict the least-recently-used project. Returns the evicted root.
    pub fn evict_lru(&self) -> Option<PathBuf> {
        let mut projects = self.projects.write().unwrap();
        evict_lru_locked(&mut projects)
    }

    /// Forcibly close one project.
    pub fn close_project(&self, root: &Path) {
        let handle = self.projects.write().unwrap().remove(root);
        if let Some(handle) = handle {
            handle.close();
        }
    }

    /// Close every handle and clear the map. Called on daemon shutdown.
    pub fn close_all(&self) {
        let drained: Vec<Arc<ProjectHandle>> =
            self.projects.write().unwrap().drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.close();
        }
    }

    /// Hot-swap a project's vector index under the registry lock; the old
    /// handle is returned so the caller can close it outside the lock.
    pub fn swap_vector(
        &self,
        root: &Path,
        new: Arc<dyn VectorIndex>,
    ) -> Result<Arc<dyn VectorIndex>> {
        let projects = self.projects.write().unwrap();
        let handle = projects
            .get(root)
            .ok_or_else(|| Error::ProjectNotIndexed(root.to_path_buf()))?;
        let mut vector = handle.vector.write().unwrap();
        let old = std::mem::replace(&mut *vector, new);
        Ok(old)
    }

    /// Currently resident roots.
    pub fn loaded(&self) -> Vec<PathBuf> {
        self.projects.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.projects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Find and remove the entry with the smallest last_used. The handle's
/// stores close when the last in-flight holder drops it.
fn evict_lru_locked(projects: &mut HashMap<PathBuf, Arc<ProjectHandle>>) -> Option<PathBuf> {
    let victim = projects
        .iter()
        .min_by_key(|(_, h)| h.last_used.load(Ordering::SeqCst))
        .map(|(root, _)| root.clone())?;
    projects.remove(&victim);
    info!(project = %victim.display(), "evicted least-recently-used project");
    Some(victim)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
