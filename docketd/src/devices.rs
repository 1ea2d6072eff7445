//! Device directory cache.
//!
//! Resolving a block device number to a `/dev` path means walking the whole
//! device tree, which is too slow to repeat for every `%BLOCK` expansion.
//! The walk result is kept as an immutable [`Generation`] for a short TTL.
//! Callers pin a generation with [`DeviceCache::acquire`] and let go of it by
//! dropping (or explicitly releasing) the returned guard. An expired
//! generation stays usable for as long as anyone still holds it; it only
//! leaves the cache once expired and unreferenced.

use std::cmp::Ordering as CmpOrdering;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One character or block device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub major: u32,
    pub minor: u32,
    pub is_block: bool,
    /// Modification time of the node, seconds since the epoch.
    pub mtime: i64,
    pub path: PathBuf,
}

/// Something that can enumerate device nodes.
pub trait DeviceSource: Send + Sync {
    /// Return every device node found. Called from a blocking thread.
    fn scan(&self) -> Vec<DeviceEntry>;
}

/// Walks a device directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DevfsSource {
    root: PathBuf,
}

impl DevfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DeviceSource for DevfsSource {
    fn scan(&self) -> Vec<DeviceEntry> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .same_file_system(true);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable device path: {}", e);
                    continue;
                }
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let file_type = meta.file_type();
            let is_block = file_type.is_block_device();
            if !is_block && !file_type.is_char_device() {
                continue;
            }
            let rdev = meta.rdev();
            entries.push(DeviceEntry {
                major: dev_major(rdev),
                minor: dev_minor(rdev),
                is_block,
                mtime: meta.mtime(),
                path: entry.into_path(),
            });
        }

        entries
    }
}

/// Major number of a Linux `dev_t`.
pub fn dev_major(rdev: u64) -> u32 {
    (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0x0000_0fff)) as u32
}

/// Minor number of a Linux `dev_t`.
pub fn dev_minor(rdev: u64) -> u32 {
    (((rdev >> 12) & 0xffff_ff00) | (rdev & 0x0000_00ff)) as u32
}

/// Order devices by major, then minor, then mtime, all descending.
///
/// Lookups take the first match, so when several nodes share a number the
/// most recently created one wins.
pub fn sort_devices(entries: &mut [DeviceEntry]) {
    entries.sort_by(|a, b| compare_devices(a, b).then_with(|| a.path.cmp(&b.path)));
}

/// Device order used by the cache: major, minor, mtime, all descending.
pub fn compare_devices(a: &DeviceEntry, b: &DeviceEntry) -> CmpOrdering {
    b.major
        .cmp(&a.major)
        .then(b.minor.cmp(&a.minor))
        .then(b.mtime.cmp(&a.mtime))
}

/// An immutable snapshot of the device directory.
#[derive(Debug)]
pub struct Generation {
    id: u64,
    entries: Vec<DeviceEntry>,
    expires_at: Instant,
    refs: AtomicUsize,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Number of outstanding guards.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Path of the first block device with this number.
    pub fn lookup_block(&self, major: u32, minor: u32) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.is_block && e.major == major && e.minor == minor)
            .map(|e| e.path.as_path())
    }
}

/// A counted hold on one [`Generation`].
#[must_use = "a generation guard releases its hold when dropped"]
pub struct GenerationGuard {
    cache: Arc<DeviceCache>,
    generation: Arc<Generation>,
}

impl GenerationGuard {
    pub fn generation(&self) -> &Generation {
        &self.generation
    }
}

impl std::ops::Deref for GenerationGuard {
    type Target = Generation;

    fn deref(&self) -> &Generation {
        &self.generation
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.cache.release_generation(&self.generation);
    }
}

/// Shared, TTL-bound cache of device generations.
pub struct DeviceCache {
    source: Arc<dyn DeviceSource>,
    ttl: Duration,
    /// Serializes regeneration so concurrent misses walk the tree once.
    regen: tokio::sync::Mutex<()>,
    live: Mutex<Option<Arc<Generation>>>,
    next_id: AtomicU64,
}

impl DeviceCache {
    pub fn new(source: Arc<dyn DeviceSource>, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            ttl,
            regen: tokio::sync::Mutex::new(()),
            live: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Id of the generation the cache currently hands out, if any.
    pub fn live_generation_id(&self) -> Option<u64> {
        self.lock_live().as_ref().map(|g| g.id)
    }

    /// Pin a current generation, walking the device tree if there is none.
    pub async fn acquire(self: &Arc<Self>) -> GenerationGuard {
        let _regen = self.regen.lock().await;

        if let Some(generation) = self.pin_live(Instant::now()) {
            return self.guard(generation);
        }

        let source = Arc::clone(&self.source);
        let mut entries = match tokio::task::spawn_blocking(move || source.scan()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Device scan failed: {}", e);
                Vec::new()
            }
        };
        sort_devices(&mut entries);

        let generation = Arc::new(Generation {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            entries,
            expires_at: Instant::now() + self.ttl,
            refs: AtomicUsize::new(1),
        });
        debug!(
            generation = generation.id,
            devices = generation.entries.len(),
            "Built device generation"
        );

        let previous = self.lock_live().replace(Arc::clone(&generation));
        if let Some(previous) = previous {
            debug!(
                generation = previous.id,
                refs = previous.ref_count(),
                "Retired device generation"
            );
        }

        self.guard(generation)
    }

    /// Give up a hold taken by [`acquire`](Self::acquire).
    pub fn release(&self, guard: GenerationGuard) {
        drop(guard);
    }

    fn guard(self: &Arc<Self>, generation: Arc<Generation>) -> GenerationGuard {
        GenerationGuard {
            cache: Arc::clone(self),
            generation,
        }
    }

    fn pin_live(&self, now: Instant) -> Option<Arc<Generation>> {
        let live = self.lock_live();
        let generation = live.as_ref()?;
        if generation.is_expired(now) {
            return None;
        }
        generation.refs.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(generation))
    }

    fn release_generation(&self, generation: &Arc<Generation>) {
        let mut live = self.lock_live();
        let remaining = generation.refs.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 || !generation.is_expired(Instant::now()) {
            return;
        }
        if live.as_ref().is_some_and(|l| Arc::ptr_eq(l, generation)) {
            *live = None;
        }
        debug!(generation = generation.id, "Freed device generation");
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, Option<Arc<Generation>>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DeviceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCache")
            .field("ttl", &self.ttl)
            .field("live", &self.live_generation_id())
            .finish()
    }
}
