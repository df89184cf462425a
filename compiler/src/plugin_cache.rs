// plugin_cache.rs — Fingerprint-keyed cache of processor-specific backend plugins
//
// The fingerprint is SHA-256 over the canonical JSON of every
// resource-relevant field of a processor description. Each entry lives in
// `<root>/<fingerprint>/` and holds the artifact plus `manifest.json`.
//
// At most one build runs per fingerprint: in-process through a shared
// in-flight slot (waiters block on a condition variable and receive the
// builder's result, failures included), across processes through an
// advisory lock file `<root>/<fingerprint>.lock` when the cache persists.
// Only running attempts are shared. A later request re-reads the entry's
// manifest, so failed builds are retried and stale entries rebuilt.
//
// Preconditions: the cache root is writable.
// Postconditions: a returned handle points at an existing artifact whose
//                 manifest records the requested fingerprint.
// Failure modes: `BuildFailure` from the artifact builder, `CacheIo` from the
//                file system.
// Side effects: creates, replaces and (ephemeral caches) removes directories
//               under the cache root.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::machine::{Endpoint, MachineDescription, MemoryAccess, ResourceModel};

const MANIFEST: &str = "manifest.json";

// ── Fingerprint ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// SHA-256 of `MachineDescription::canonical_json()`.
    pub fn of(desc: &MachineDescription) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(desc.canonical_json().as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Fingerprint(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex (64 characters).
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ── Handles and manifests ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub fingerprint: Fingerprint,
    /// The artifact file.
    pub path: PathBuf,
    /// Seconds since the Unix epoch.
    pub built_at: u64,
    /// False for artifacts in an ephemeral cache.
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    fingerprint: String,
    artifact: String,
    built_at: u64,
    machine: String,
    generator: String,
}

// ── Builders ────────────────────────────────────────────────────────────────

pub type BuildError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the processor-specific artifact for one description.
pub trait ArtifactBuilder: Send + Sync {
    /// Name of the artifact file inside an entry directory.
    fn file_name(&self) -> &str;

    /// Write the artifact into `dir` (an empty staging directory).
    fn build(
        &self,
        desc: &MachineDescription,
        fingerprint: &Fingerprint,
        dir: &Path,
    ) -> Result<(), BuildError>;
}

/// Renders the backend table consumed by the code emitter: candidate units
/// and latencies per opcode, bus reach, register file ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableArtifactBuilder;

#[derive(Debug, Serialize)]
struct BackendTable {
    fingerprint: String,
    machine: String,
    issue_width: u32,
    delay_slots: u32,
    operations: BTreeMap<String, BackendOperation>,
    buses: Vec<BackendBus>,
    register_files: Vec<BackendRegisterFile>,
}

#[derive(Debug, Serialize)]
struct BackendOperation {
    memory: MemoryAccess,
    control: bool,
    side_effects: bool,
    latency: u32,
    units: Vec<BackendUnit>,
}

#[derive(Debug, Serialize)]
struct BackendUnit {
    unit: String,
    latency: u32,
}

#[derive(Debug, Serialize)]
struct BackendBus {
    name: String,
    reaches: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BackendRegisterFile {
    name: String,
    prefix: String,
    size: u32,
    read_ports: u32,
    write_ports: u32,
}

impl ArtifactBuilder for TableArtifactBuilder {
    fn file_name(&self) -> &str {
        "backend.json"
    }

    fn build(
        &self,
        desc: &MachineDescription,
        fingerprint: &Fingerprint,
        dir: &Path,
    ) -> Result<(), BuildError> {
        let model = ResourceModel::new(desc)?;

        let mut operations = BTreeMap::new();
        for unit in model.units() {
            for opcode in unit.latencies.keys() {
                if operations.contains_key(opcode) {
                    continue;
                }
                let info = model.operation_info(opcode);
                let units = model
                    .units_for(opcode)
                    .iter()
                    .filter_map(|&u| {
                        model.unit_latency(u, opcode).map(|latency| BackendUnit {
                            unit: model.unit(u).name.clone(),
                            latency,
                        })
                    })
                    .collect();
                operations.insert(
                    opcode.clone(),
                    BackendOperation {
                        memory: info.memory,
                        control: info.control,
                        side_effects: info.side_effects,
                        latency: model.latency(opcode).unwrap_or(1),
                        units,
                    },
                );
            }
        }

        let buses = model
            .buses()
            .iter()
            .map(|b| BackendBus {
                name: b.name.clone(),
                reaches: model
                    .units()
                    .iter()
                    .filter(|u| b.connects(Endpoint::Unit(u.id)))
                    .map(|u| u.name.clone())
                    .chain(
                        model
                            .register_files()
                            .iter()
                            .filter(|rf| b.connects(Endpoint::RegFile(rf.id)))
                            .map(|rf| rf.name.clone()),
                    )
                    .collect(),
            })
            .collect();

        let register_files = model
            .register_files()
            .iter()
            .map(|rf| BackendRegisterFile {
                name: rf.name.clone(),
                prefix: rf.prefix.clone(),
                size: rf.size,
                read_ports: rf.read_ports,
                write_ports: rf.write_ports,
            })
            .collect();

        let table = BackendTable {
            fingerprint: fingerprint.to_hex(),
            machine: desc.name.clone(),
            issue_width: model.issue_width,
            delay_slots: model.delay_slots,
            operations,
            buses,
            register_files,
        };
        let json = serde_json::to_string_pretty(&table)?;
        fs::write(dir.join(self.file_name()), json)?;
        Ok(())
    }
}

// ── In-flight attempts ──────────────────────────────────────────────────────

enum AttemptState {
    Building,
    Done(Result<ArtifactHandle, CacheError>),
}

struct Attempt {
    state: Mutex<AttemptState>,
    ready: Condvar,
}

impl Attempt {
    fn new() -> Self {
        Attempt {
            state: Mutex::new(AttemptState::Building),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, result: Result<ArtifactHandle, CacheError>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = AttemptState::Done(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<ArtifactHandle, CacheError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                AttemptState::Done(result) => return result.clone(),
                AttemptState::Building => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Still building. Finished attempts are never shared: the next request
    /// re-reads the entry's manifest.
    fn in_progress(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*state, AttemptState::Building)
    }
}

/// Advisory cross-process lock held for the lifetime of the guard.
struct LockGuard(File);

impl LockGuard {
    fn acquire(path: &Path) -> Result<Self, CacheError> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| CacheError::io(path, e))?;
        file.lock().map_err(|e| CacheError::io(path, e))?;
        Ok(LockGuard(file))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

// ── Cache ───────────────────────────────────────────────────────────────────

static EPHEMERAL_SEQ: AtomicUsize = AtomicUsize::new(0);

pub struct PluginCache {
    root: PathBuf,
    persistent: bool,
    builder: Arc<dyn ArtifactBuilder>,
    in_flight: Mutex<HashMap<Fingerprint, Arc<Attempt>>>,
    builds: AtomicUsize,
}

impl PluginCache {
    /// Save-plugin mode: entries persist under `dir` across runs.
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = dir.into();
        fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;
        Ok(Self::with_root(root, true))
    }

    /// Entries live in a process-local temporary directory removed on drop.
    pub fn ephemeral() -> Result<Self, CacheError> {
        let seq = EPHEMERAL_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("ttasched-{}-{}", std::process::id(), seq));
        fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;
        Ok(Self::with_root(root, false))
    }

    fn with_root(root: PathBuf, persistent: bool) -> Self {
        PluginCache {
            root,
            persistent,
            builder: Arc::new(TableArtifactBuilder),
            in_flight: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Replace the artifact builder.
    pub fn with_builder(mut self, builder: impl ArtifactBuilder + 'static) -> Self {
        self.builder = Arc::new(builder);
        self
    }

    /// A process-local cache sharing this cache's builder, for runs whose
    /// persistent directory is unusable.
    pub fn ephemeral_fallback(&self) -> Result<PluginCache, CacheError> {
        let mut fallback = PluginCache::ephemeral()?;
        fallback.builder = Arc::clone(&self.builder);
        Ok(fallback)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Builds performed by this handle.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.to_hex())
    }

    /// Return the artifact for `desc`, building it if absent or stale.
    pub fn get_or_build(&self, desc: &MachineDescription) -> Result<ArtifactHandle, CacheError> {
        let fingerprint = Fingerprint::of(desc);

        let (attempt, owner) = {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(&fingerprint) {
                Some(a) if a.in_progress() => (Arc::clone(a), false),
                _ => {
                    let a = Arc::new(Attempt::new());
                    map.insert(fingerprint, Arc::clone(&a));
                    (a, true)
                }
            }
        };

        if !owner {
            log::trace!("plugin {}: waiting for in-flight attempt", fingerprint);
            return attempt.wait();
        }

        let result = self.fetch_or_build(desc, &fingerprint);
        attempt.finish(result.clone());
        if result.is_err() {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if map.get(&fingerprint).is_some_and(|a| Arc::ptr_eq(a, &attempt)) {
                map.remove(&fingerprint);
            }
        }
        result
    }

    fn fetch_or_build(
        &self,
        desc: &MachineDescription,
        fingerprint: &Fingerprint,
    ) -> Result<ArtifactHandle, CacheError> {
        let hex = fingerprint.to_hex();
        let entry = self.entry_dir(fingerprint);

        let _lock = if self.persistent {
            Some(LockGuard::acquire(&self.root.join(format!("{hex}.lock")))?)
        } else {
            None
        };

        if let Some(handle) = self.lookup(&entry, fingerprint) {
            log::debug!("plugin {}: cache hit at {}", hex, handle.path.display());
            return Ok(handle);
        }
        self.build_entry(desc, fingerprint, &entry)
    }

    /// A valid entry, or `None` when it is missing or stale.
    fn lookup(&self, entry: &Path, fingerprint: &Fingerprint) -> Option<ArtifactHandle> {
        let text = fs::read_to_string(entry.join(MANIFEST)).ok()?;
        let manifest: Manifest = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("plugin cache entry {}: unreadable manifest: {}", entry.display(), e);
                return None;
            }
        };
        if manifest.fingerprint != fingerprint.to_hex() {
            log::debug!(
                "plugin cache entry {}: stale fingerprint {}",
                entry.display(),
                manifest.fingerprint
            );
            return None;
        }
        let path = entry.join(&manifest.artifact);
        if !path.is_file() {
            log::debug!("plugin cache entry {}: artifact missing", entry.display());
            return None;
        }
        Some(ArtifactHandle {
            fingerprint: *fingerprint,
            path,
            built_at: manifest.built_at,
            persisted: self.persistent,
        })
    }

    /// Build into a staging directory, then swap it in for the entry.
    fn build_entry(
        &self,
        desc: &MachineDescription,
        fingerprint: &Fingerprint,
        entry: &Path,
    ) -> Result<ArtifactHandle, CacheError> {
        let hex = fingerprint.to_hex();
        let started = Instant::now();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let staging = self.root.join(format!(
            ".{}.{}.{}.tmp",
            hex,
            std::process::id(),
            now.as_nanos()
        ));
        fs::create_dir_all(&staging).map_err(|e| CacheError::io(&staging, e))?;

        if let Err(e) = self.builder.build(desc, fingerprint, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(CacheError::BuildFailure {
                fingerprint: hex,
                reason: e.to_string(),
            });
        }

        let manifest = Manifest {
            fingerprint: hex.clone(),
            artifact: self.builder.file_name().to_string(),
            built_at: now.as_secs(),
            machine: desc.name.clone(),
            generator: format!("ttasched {}", env!("CARGO_PKG_VERSION")),
        };
        let manifest_path = staging.join(MANIFEST);
        let json = serde_json::to_string_pretty(&manifest).unwrap_or_default();
        if let Err(e) = fs::write(&manifest_path, json) {
            let _ = fs::remove_dir_all(&staging);
            return Err(CacheError::io(manifest_path, e));
        }

        let swapped = if entry.exists() {
            fs::remove_dir_all(entry)
        } else {
            Ok(())
        }
        .and_then(|()| fs::rename(&staging, entry));
        if let Err(e) = swapped {
            let _ = fs::remove_dir_all(&staging);
            return Err(CacheError::io(entry, e));
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "plugin {}: built for machine '{}' in {:.1}ms",
            hex,
            desc.name,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(ArtifactHandle {
            fingerprint: *fingerprint,
            path: entry.join(self.builder.file_name()),
            built_at: manifest.built_at,
            persisted: self.persistent,
        })
    }
}

impl Drop for PluginCache {
    fn drop(&mut self) {
        if !self.persistent {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                log::trace!("ephemeral plugin cache {}: {}", self.root.display(), e);
            }
        }
    }
}

impl fmt::Debug for PluginCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCache")
            .field("root", &self.root)
            .field("persistent", &self.persistent)
            .field("builds", &self.builds())
            .finish()
    }
}

/// Default cache directory: explicit flag, `TTASCHED_CACHE_DIR`,
/// `$XDG_CACHE_HOME/ttasched`, `$HOME/.cache/ttasched`, then the system
/// temp directory.
pub fn resolve_cache_dir(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Some(dir) = non_empty("TTASCHED_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = non_empty("XDG_CACHE_HOME") {
        return Path::new(&xdg).join("ttasched");
    }
    if let Some(home) = non_empty("HOME") {
        return Path::new(&home).join(".cache").join("ttasched");
    }
    std::env::temp_dir().join("ttasched-cache")
}

/// `resolve_cache_dir` against the process environment.
pub fn default_cache_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_cache_dir(explicit, |key| std::env::var(key).ok())
}

// ── Tests ───────────────────────────────────────────────────────────────────
