//! Asset Cache
//!
//! Process-wide cache of probed inputs keyed by path. An entry is only
//! reused while the file's length and modification time match what was
//! probed. Insertion-order eviction at capacity; a periodic memory check
//! clears everything when the machine runs short. One mutex guards the
//! entries, and loading happens with the lock released.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::engine::{probe_asset, AudioAsset};
use crate::error::Result;
use crate::policy::memory::{MemoryProbe, MIB};

/// Shared handle to a cached asset
pub type AssetHandle = Arc<AudioAsset>;

/// Loads an asset on a cache miss
pub trait AssetLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<AudioAsset>;
}

/// Default loader: validate and probe the file
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeLoader;

impl AssetLoader for ProbeLoader {
    fn load(&self, path: &Path) -> Result<AudioAsset> {
        probe_asset(path)
    }
}

/// What a file looked like when it was probed
///
/// Both parts are `None` when the file cannot be stat'ed; the loader then
/// reports the real error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: Option<u64>,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                len: Some(meta.len()),
                modified: meta.modified().ok(),
            },
            Err(_) => Self {
                len: None,
                modified: None,
            },
        }
    }
}

struct CacheEntry {
    path: PathBuf,
    stamp: FileStamp,
    asset: AssetHandle,
}

#[derive(Default)]
struct CacheState {
    entries: VecDeque<CacheEntry>,
    last_memory_check: Option<Instant>,
}

impl CacheState {
    /// Fresh entry for `path`; a stale one is dropped
    fn find(&mut self, path: &Path, stamp: FileStamp) -> Option<AssetHandle> {
        let index = self.entries.iter().position(|e| e.path == path)?;
        if self.entries[index].stamp == stamp {
            return Some(Arc::clone(&self.entries[index].asset));
        }
        debug!(path = %path.display(), "File changed since probe, dropping cached asset");
        self.entries.remove(index);
        None
    }
}

/// Bounded cache of probed audio assets
pub struct AssetCache {
    state: Mutex<CacheState>,
    loader: Arc<dyn AssetLoader>,
    memory: Arc<dyn MemoryProbe>,
    config: CacheConfig,
}

impl AssetCache {
    pub fn new(config: CacheConfig, memory: Arc<dyn MemoryProbe>) -> Self {
        Self::with_loader(config, memory, Arc::new(ProbeLoader))
    }

    pub fn with_loader(
        config: CacheConfig,
        memory: Arc<dyn MemoryProbe>,
        loader: Arc<dyn AssetLoader>,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            loader,
            memory,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the deque inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached asset for `path`, loading and inserting it on a miss
    pub fn get(&self, path: &Path) -> Result<AssetHandle> {
        let stamp = FileStamp::of(path);
        {
            let mut state = self.lock();
            self.check_memory_locked(&mut state, false);
            if let Some(asset) = state.find(path, stamp) {
                debug!(path = %path.display(), "Asset cache hit");
                return Ok(asset);
            }
        }

        let loaded = Arc::new(self.loader.load(path)?);

        let mut state = self.lock();
        // Another session may have loaded it meanwhile
        if let Some(asset) = state.find(path, stamp) {
            return Ok(asset);
        }
        let capacity = self.config.capacity.max(1);
        while state.entries.len() >= capacity {
            if let Some(evicted) = state.entries.pop_front() {
                debug!(path = %evicted.path.display(), "Evicted oldest cached asset");
            }
        }
        state.entries.push_back(CacheEntry {
            path: path.to_path_buf(),
            stamp,
            asset: Arc::clone(&loaded),
        });
        Ok(loaded)
    }

    /// Whether a fresh entry for `path` is cached
    pub fn contains(&self, path: &Path) -> bool {
        let stamp = FileStamp::of(path);
        self.lock().find(path, stamp).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Run the memory check now, regardless of the interval
    ///
    /// Returns true when the cache was cleared.
    pub fn check_memory_pressure(&self) -> bool {
        let mut state = self.lock();
        self.check_memory_locked(&mut state, true)
    }

    fn check_memory_locked(&self, state: &mut CacheState, force: bool) -> bool {
        let interval = Duration::from_secs(self.config.memory_check_interval_secs);
        let due = force
            || state
                .last_memory_check
                .map_or(true, |at| at.elapsed() >= interval);
        if !due {
            return false;
        }
        state.last_memory_check = Some(Instant::now());

        let snapshot = self.memory.snapshot_or_plentiful();
        if snapshot.available_bytes < self.config.pressure_threshold_bytes
            && !state.entries.is_empty()
        {
            info!(
                available_mib = snapshot.available_bytes / MIB,
                dropped = state.entries.len(),
                "Memory pressure, clearing asset cache"
            );
            state.entries.clear();
            return true;
        }
        false
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("len", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
