// Command-line tests: run the built `ttasched` binary on the demo files and
// check exit codes, emitted output, dump directories and the plugin cache
// flags.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> PathBuf {
    project_root().join("demos").join(name)
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ttasched-cli-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn ttasched(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ttasched"))
        .args(args)
        .env_remove("TTASCHED_CACHE_DIR")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ttasched")
}

fn example(extra: &[&str]) -> Output {
    let tir = demo("example.tir");
    let adf = demo("minimal.adf.json");
    let mut args = vec![tir.to_str().unwrap(), "-m", adf.to_str().unwrap()];
    args.extend_from_slice(extra);
    ttasched(&args)
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// ── Emit stages ─────────────────────────────────────────────────────────────

#[test]
fn schedule_listing() {
    let out = example(&[]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("region bb0 (bottom-up, 5 cycles)"), "{text}");
    assert!(text.contains("region bb1"));
    assert!(text.contains("region bb2"));
    assert!(text.contains("delay slot 1 of"));
}

#[test]
fn strategy_flag() {
    let out = example(&["--strategy", "bubble-fish"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(stdout(&out).contains("region bb0 (bubble-fish, 5 cycles)"));

    let out = example(&["--conservative", "--pressure-threshold", "3"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(stdout(&out).contains("(top-down,"));
}

#[test]
fn json_schedules() {
    let out = example(&["--emit", "json"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let schedules = value.as_array().unwrap();
    assert_eq!(schedules.len(), 3);
    assert_eq!(schedules[0]["region"], "bb0");
    assert_eq!(schedules[0]["length"], 5);
}

#[test]
fn ddg_outputs() {
    let out = example(&["--emit", "ddg-dot"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let dot = stdout(&out);
    assert!(dot.starts_with("digraph ddg {"));
    assert!(dot.contains("subgraph cluster_r2_bb2"));

    let out = example(&["--emit", "ddg-json"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 3);
}

#[test]
fn timing_and_patterns() {
    let out = example(&["--emit", "timing"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let chart = stdout(&out);
    assert!(chart.starts_with("gantt"));
    assert!(chart.contains("title Schedule on minimal"));

    let out = example(&["--emit", "patterns"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(stdout(&out).starts_with("patterns: 3 region(s)"));

    let out = example(&["--analyze-patterns"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stderr(&out).contains("patterns: 3 region(s)"));
    assert!(stdout(&out).contains("region bb0"));
}

#[test]
fn output_file() {
    let dir = scratch("output");
    let path = dir.join("bb.sched");
    let out = example(&["-o", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(out.stdout.is_empty());
    assert!(std::fs::read_to_string(&path).unwrap().contains("region bb0"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ddg_dump_directories() {
    let dir = scratch("dumps");
    let dot = dir.join("dot");
    let json = dir.join("json");
    let out = example(&[
        "--dump-ddgs-dot",
        dot.to_str().unwrap(),
        "--dump-ddgs-json",
        json.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    for region in ["bb0", "bb1", "bb2"] {
        assert!(dot.join(format!("{region}.dot")).is_file());
        let text = std::fs::read_to_string(json.join(format!("{region}.ddg.json"))).unwrap();
        let graph = ttasched::ddg::DependenceGraph::from_json(&text).unwrap();
        assert_eq!(graph.region(), region);
    }
    let _ = std::fs::remove_dir_all(&dir);
}

// ── Plugin cache flags ──────────────────────────────────────────────────────

#[test]
fn plugin_only_with_saved_plugin() {
    let cache = scratch("cache");
    let adf = demo("minimal.adf.json");
    let args = [
        "--plugin-only",
        "--save-plugin",
        "--backend-cache-dir",
        cache.to_str().unwrap(),
        "-m",
        adf.to_str().unwrap(),
    ];
    let out = ttasched(&args);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let path = PathBuf::from(stdout(&out).trim());
    assert!(path.starts_with(&cache));
    assert!(path.is_file());

    // a second run reuses the entry
    let again = ttasched(&args);
    assert_eq!(again.status.code(), Some(0));
    assert_eq!(PathBuf::from(stdout(&again).trim()), path);

    // a renamed but otherwise identical machine maps to the same entry
    let renamed = demo("minimal_renamed.adf.json");
    let out = ttasched(&[
        "--plugin-only",
        "--save-plugin",
        "--backend-cache-dir",
        cache.to_str().unwrap(),
        "-m",
        renamed.to_str().unwrap(),
    ]);
    assert_eq!(PathBuf::from(stdout(&out).trim()), path);
    let _ = std::fs::remove_dir_all(&cache);
}

#[test]
fn emit_plugin_without_saving_is_ephemeral() {
    let out = example(&["--emit", "plugin"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    let path = PathBuf::from(stdout(&out).trim());
    assert!(path.ends_with("backend.json"));
    // the process-local cache is gone once the run ends
    assert!(!path.exists());
}

#[test]
fn unusable_cache_dir_falls_back() {
    let dir = scratch("blocked");
    let blocker = dir.join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let out = example(&["--save-plugin", "--backend-cache-dir", blocker.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(stderr(&out).contains("W0200"));
    assert!(stdout(&out).contains("region bb0"));
    let _ = std::fs::remove_dir_all(&dir);
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn region_error_exits_one_and_keeps_other_regions() {
    let dir = scratch("bad-region");
    let tir = dir.join("bad.tir");
    std::fs::write(
        &tir,
        "region good in(r0) {\n    r1 = add r0, 1\n}\n\nregion bad in(r0) {\n    r2 = add r9, 1\n}\n",
    )
    .unwrap();
    let adf = demo("minimal.adf.json");
    let out = ttasched(&[tir.to_str().unwrap(), "-m", adf.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[E0100]"), "{err}");
    assert!(err.contains("bad.tir:6:"), "{err}");
    assert!(stdout(&out).contains("region good"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn syntax_error_exits_one() {
    let dir = scratch("syntax");
    let tir = dir.join("broken.tir");
    std::fs::write(&tir, "region bb0 in(r0) {\n    r1 = = load r0\n").unwrap();
    let adf = demo("minimal.adf.json");
    let out = ttasched(&[tir.to_str().unwrap(), "-m", adf.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("E0001"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn input_errors_exit_two() {
    let tir = demo("example.tir");
    let out = ttasched(&[tir.to_str().unwrap(), "-m", "/nonexistent/machine.adf.json"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("E0300"));

    let out = example(&["--alias-facts", "/nonexistent/facts.json"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("E0301"));

    let adf = demo("minimal.adf.json");
    let out = ttasched(&["/nonexistent/input.tir", "-m", adf.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("E0302"));
}

#[test]
fn alias_facts_flag() {
    let facts = demo("alias_facts.json");
    let out = example(&["--alias-facts", facts.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
}
