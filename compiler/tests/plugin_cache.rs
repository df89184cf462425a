// Integration tests for the backend plugin cache.
//
// - at most one build per fingerprint under concurrent requests, within one
//   cache handle and across handles sharing a directory
// - cosmetic-only description changes reuse the same build
// - build failures reach every waiter and are not remembered
// - stale entries are rebuilt

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ttasched::error::CacheError;
use ttasched::machine::MachineDescription;
use ttasched::plugin_cache::{
    ArtifactBuilder, BuildError, Fingerprint, PluginCache, TableArtifactBuilder,
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> MachineDescription {
    MachineDescription::load(&project_root().join("demos").join(name)).unwrap()
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ttasched-it-{}-{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Slow builder counting its invocations; optionally fails.
#[derive(Clone)]
struct CountingBuilder {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingBuilder {
    fn new(fail: bool) -> Self {
        CountingBuilder {
            calls: Arc::new(AtomicUsize::new(0)),
            fail,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactBuilder for CountingBuilder {
    fn file_name(&self) -> &str {
        "backend.json"
    }

    fn build(
        &self,
        desc: &MachineDescription,
        fingerprint: &Fingerprint,
        dir: &Path,
    ) -> Result<(), BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        if self.fail {
            return Err("toolchain exited with status 1".into());
        }
        TableArtifactBuilder.build(desc, fingerprint, dir)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn concurrent_requests_share_one_build() {
    let builder = CountingBuilder::new(false);
    let cache = PluginCache::ephemeral().unwrap().with_builder(builder.clone());
    let desc = demo("minimal.adf.json");
    let barrier = Barrier::new(8);

    let handles: Vec<_> = thread::scope(|s| {
        let joins: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache.get_or_build(&desc).unwrap()
                })
            })
            .collect();
        joins.into_iter().map(|j| j.join().unwrap()).collect()
    });

    assert_eq!(builder.calls(), 1);
    assert_eq!(cache.builds(), 1);
    assert!(handles.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn handles_sharing_a_directory_build_once() {
    let dir = scratch("shared");
    let builder = CountingBuilder::new(false);
    let desc = demo("minimal.adf.json");
    let barrier = Barrier::new(4);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let cache = PluginCache::persistent(&dir)
                    .unwrap()
                    .with_builder(builder.clone());
                barrier.wait();
                cache.get_or_build(&desc).unwrap();
            });
        }
    });

    assert_eq!(builder.calls(), 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn persisted_plugin_survives_the_handle() {
    let dir = scratch("persist");
    let desc = demo("minimal.adf.json");
    let first = {
        let cache = PluginCache::persistent(&dir).unwrap();
        cache.get_or_build(&desc).unwrap()
    };
    assert!(first.path.is_file());

    let builder = CountingBuilder::new(false);
    let cache = PluginCache::persistent(&dir)
        .unwrap()
        .with_builder(builder.clone());
    let second = cache.get_or_build(&desc).unwrap();
    assert_eq!(builder.calls(), 0);
    assert_eq!(first, second);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cosmetic_rename_reuses_build() {
    let original = demo("minimal.adf.json");
    let renamed = demo("minimal_renamed.adf.json");
    assert_ne!(original.name, renamed.name);
    assert_eq!(Fingerprint::of(&original), Fingerprint::of(&renamed));

    let builder = CountingBuilder::new(false);
    let cache = PluginCache::ephemeral().unwrap().with_builder(builder.clone());
    let a = cache.get_or_build(&original).unwrap();
    let b = cache.get_or_build(&renamed).unwrap();
    assert_eq!(a.path, b.path);
    assert_eq!(builder.calls(), 1);

    let wide = cache.get_or_build(&demo("wide.adf.json")).unwrap();
    assert_ne!(wide.fingerprint, a.fingerprint);
    assert_eq!(builder.calls(), 2);
}

#[test]
fn build_failure_reaches_every_waiter_then_retries() {
    let failing = CountingBuilder::new(true);
    let cache = PluginCache::ephemeral().unwrap().with_builder(failing.clone());
    let desc = demo("minimal.adf.json");
    let barrier = Barrier::new(4);

    let results: Vec<_> = thread::scope(|s| {
        let joins: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache.get_or_build(&desc)
                })
            })
            .collect();
        joins.into_iter().map(|j| j.join().unwrap()).collect()
    });
    assert_eq!(failing.calls(), 1);
    for r in &results {
        match r {
            Err(CacheError::BuildFailure { reason, .. }) => {
                assert!(reason.contains("status 1"));
            }
            other => panic!("expected build failure, got {other:?}"),
        }
    }

    // explicit retry rebuilds
    assert!(cache.get_or_build(&desc).is_err());
    assert_eq!(failing.calls(), 2);
}

#[test]
fn edited_description_is_a_new_entry() {
    let dir = scratch("edited");
    let cache = PluginCache::persistent(&dir).unwrap();
    let mut desc = demo("minimal.adf.json");
    let before = cache.get_or_build(&desc).unwrap();

    desc.function_units[0].operations.insert("mul".into(), 4);
    let after = cache.get_or_build(&desc).unwrap();
    assert_ne!(before.fingerprint, after.fingerprint);
    assert_ne!(before.path, after.path);
    assert_eq!(cache.builds(), 2);

    let table: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&after.path).unwrap()).unwrap();
    assert_eq!(table["operations"]["mul"]["latency"], 4);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corrupted_manifest_is_rebuilt() {
    let dir = scratch("corrupt");
    let desc = demo("minimal.adf.json");
    let handle = PluginCache::persistent(&dir)
        .unwrap()
        .get_or_build(&desc)
        .unwrap();
    let entry = handle.path.parent().unwrap().to_path_buf();
    std::fs::write(entry.join("manifest.json"), "{ not json").unwrap();

    let builder = CountingBuilder::new(false);
    let cache = PluginCache::persistent(&dir)
        .unwrap()
        .with_builder(builder.clone());
    let rebuilt = cache.get_or_build(&desc).unwrap();
    assert_eq!(builder.calls(), 1);
    assert!(rebuilt.path.is_file());
    let _ = std::fs::remove_dir_all(&dir);
}
