use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ttasched::alias::WorkItemAliasFacts;
use ttasched::diag::{codes, DiagLevel, Diagnostic};
use ttasched::machine::{MachineDescription, ResourceModel};
use ttasched::pass::{producer, ArtifactId, PassId};
use ttasched::pipeline::{alias_oracles, run_pipeline, SchedulerOptions, SchedulingRun};
use ttasched::plugin_cache::{default_cache_dir, PluginCache};
use ttasched::schedule::{Listing, Schedule};
use ttasched::strategy::{ScheduleOptions, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Cycle-by-cycle schedule listing
    Schedule,
    /// Schedules as JSON
    Json,
    /// Dependence graphs as Graphviz DOT
    DdgDot,
    /// Dependence graph dumps as JSON
    DdgJson,
    /// Mermaid Gantt timing chart
    Timing,
    /// Build or fetch the backend plugin and print its path
    Plugin,
    /// Instruction pattern report
    Patterns,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        let artifact = match self {
            EmitStage::Schedule | EmitStage::Json | EmitStage::Timing => ArtifactId::Schedule,
            EmitStage::DdgDot | EmitStage::DdgJson => ArtifactId::Ddg,
            EmitStage::Plugin => ArtifactId::Plugin,
            EmitStage::Patterns => ArtifactId::Patterns,
        };
        producer(artifact)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "ttasched",
    version,
    about = "Instruction scheduler for transport-triggered (TTA) processors"
)]
struct Cli {
    /// Input region IR (.tir) file
    #[arg(required_unless_present = "plugin_only")]
    source: Option<PathBuf>,

    /// Processor description (.adf.json)
    #[arg(short, long)]
    machine: PathBuf,

    /// Output file path (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Schedule)]
    emit: EmitStage,

    /// Scheduling strategy (default: bottom-up, top-down when conservative)
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Register-pressure-conservative scheduling
    #[arg(long)]
    conservative: bool,

    /// Live-value limit in conservative mode (default: total registers)
    #[arg(long, requires = "conservative")]
    pressure_threshold: Option<usize>,

    /// Leave delay slots after control transfers empty
    #[arg(long)]
    disable_delay_slot_filler: bool,

    /// Work-item alias facts (JSON)
    #[arg(long)]
    alias_facts: Option<PathBuf>,

    /// Do not use address spaces to separate memory operations
    #[arg(long)]
    disable_address_space_aa: bool,

    /// Persist the backend plugin in the cache directory
    #[arg(long)]
    save_plugin: bool,

    /// Backend plugin cache directory
    #[arg(long, env = "TTASCHED_CACHE_DIR")]
    backend_cache_dir: Option<PathBuf>,

    /// Only build or fetch the backend plugin
    #[arg(long)]
    plugin_only: bool,

    /// Write one DOT file per region DDG into this directory
    #[arg(long)]
    dump_ddgs_dot: Option<PathBuf>,

    /// Write one JSON dump per region DDG into this directory
    #[arg(long)]
    dump_ddgs_json: Option<PathBuf>,

    /// Print the instruction pattern report to stderr
    #[arg(long)]
    analyze_patterns: bool,

    /// Worker threads (0: available parallelism)
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// Print passes and timing (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

/// Input or I/O failure: report and exit 2.
fn fail_input(code: ttasched::diag::DiagCode, message: String) -> ExitCode {
    eprintln!(
        "ttasched: {}",
        Diagnostic::new(DiagLevel::Error, message).with_code(code)
    );
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .format_timestamp(None)
    .init();

    log::debug!("source  = {:?}", cli.source);
    log::debug!("machine = {}", cli.machine.display());
    log::debug!("emit    = {:?}", cli.emit);

    // ── Load processor description ──
    let desc = match MachineDescription::load(&cli.machine) {
        Ok(d) => d,
        Err(e) => return fail_input(codes::E0300, e.to_string()),
    };
    let model = match ResourceModel::new(&desc) {
        Ok(m) => m,
        Err(e) => return fail_input(codes::E0300, e.to_string()),
    };
    log::debug!("{}", model.to_string().trim_end());

    // ── Alias facts ──
    let facts = match &cli.alias_facts {
        Some(path) => match WorkItemAliasFacts::load(path) {
            Ok(f) => {
                log::debug!("loaded {} alias facts from {}", f.len(), path.display());
                Some(f)
            }
            Err(e) => return fail_input(codes::E0301, e.to_string()),
        },
        None => None,
    };

    // ── Read source ──
    let (source, source_name) = match (&cli.source, cli.plugin_only) {
        (Some(path), false) => match std::fs::read_to_string(path) {
            Ok(s) => (s, path.display().to_string()),
            Err(e) => return fail_input(codes::E0302, format!("{}: {}", path.display(), e)),
        },
        _ => (String::new(), String::new()),
    };

    let options = SchedulerOptions {
        strategy: cli.strategy,
        schedule: ScheduleOptions {
            conservative: cli.conservative,
            pressure_threshold: cli.pressure_threshold,
        },
        fill_delay_slots: !cli.disable_delay_slot_filler,
        address_space_aa: !cli.disable_address_space_aa,
        analyze_patterns: cli.analyze_patterns,
        jobs: cli.jobs,
    };
    let oracle = alias_oracles(&options, facts);
    log::debug!("alias oracles: {:?}", oracle);

    // ── Backend plugin cache ──
    let mut early = Vec::new();
    let mut cache = match open_cache(&cli, &mut early) {
        Ok(c) => c,
        Err(e) => return fail_input(codes::E0201, e.to_string()),
    };

    let emit = if cli.plugin_only {
        EmitStage::Plugin
    } else {
        cli.emit
    };
    let mut run = run_pipeline(
        &source,
        &desc,
        &model,
        &mut cache,
        &oracle,
        &options,
        emit.terminal(),
    );
    early.append(&mut run.diagnostics);
    run.diagnostics = early;

    for d in run.all_diagnostics() {
        report(d, &source, &source_name);
    }

    if !cli.plugin_only {
        if let Err(code) = write_dumps(&cli, &run) {
            return code;
        }
    }
    if let Some(report) = run.patterns.as_ref().filter(|_| cli.analyze_patterns) {
        eprintln!("{report}");
    }

    let output = render(emit, &run, &model);
    let written = match &cli.output {
        Some(path) => std::fs::write(path, &output)
            .map_err(|e| format!("{}: {}", path.display(), e)),
        None => {
            print!("{output}");
            Ok(())
        }
    };
    if let Err(message) = written {
        return fail_input(codes::E0302, message);
    }

    exit_code(&run)
}

/// Persistent cache with `--save-plugin`, process-local otherwise.
fn open_cache(
    cli: &Cli,
    diags: &mut Vec<Diagnostic>,
) -> Result<PluginCache, ttasched::error::CacheError> {
    if !cli.save_plugin {
        return PluginCache::ephemeral();
    }
    let dir = default_cache_dir(cli.backend_cache_dir.as_deref());
    match PluginCache::persistent(&dir) {
        Ok(c) => {
            log::debug!("plugin cache at {}", dir.display());
            Ok(c)
        }
        Err(e) => {
            diags.push(
                Diagnostic::new(
                    DiagLevel::Warning,
                    format!(
                        "backend plugin cache at {} is unusable; the plugin is not persisted",
                        dir.display()
                    ),
                )
                .with_code(codes::W0200)
                .with_cause(e.to_string()),
            );
            PluginCache::ephemeral()
        }
    }
}

fn render(emit: EmitStage, run: &SchedulingRun, model: &ResourceModel) -> String {
    match emit {
        EmitStage::Schedule => run
            .schedules()
            .into_iter()
            .map(|(schedule, graph)| {
                Listing {
                    schedule,
                    graph,
                    model,
                }
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n"),
        EmitStage::Json => {
            let schedules: Vec<&Schedule> = run.schedules().into_iter().map(|(s, _)| s).collect();
            // Plain data; serialization cannot fail.
            serde_json::to_string_pretty(&schedules).unwrap_or_default() + "\n"
        }
        EmitStage::DdgDot => ttasched::dot::emit_dot(&run.graphs()),
        EmitStage::DdgJson => {
            let dumps: Vec<_> = run.graphs().iter().map(|g| g.to_dump()).collect();
            serde_json::to_string_pretty(&dumps).unwrap_or_default() + "\n"
        }
        EmitStage::Timing => ttasched::timing::emit_timing_chart(&run.schedules(), model),
        EmitStage::Plugin => run
            .plugin
            .as_ref()
            .map(|h| format!("{}\n", h.path.display()))
            .unwrap_or_default(),
        EmitStage::Patterns => run
            .patterns
            .as_ref()
            .map(|p| format!("{p}\n"))
            .unwrap_or_default(),
    }
}

fn write_dumps(cli: &Cli, run: &SchedulingRun) -> Result<(), ExitCode> {
    let dumps: [(&Option<PathBuf>, &str); 2] = [
        (&cli.dump_ddgs_dot, "dot"),
        (&cli.dump_ddgs_json, "ddg.json"),
    ];
    for (dir, ext) in dumps {
        let Some(dir) = dir else { continue };
        if let Err(e) = std::fs::create_dir_all(dir) {
            return Err(fail_input(codes::E0302, format!("{}: {}", dir.display(), e)));
        }
        for graph in run.graphs() {
            let text = if ext == "dot" {
                ttasched::dot::emit_dot(&[graph])
            } else {
                graph.to_json()
            };
            let path = dump_path(dir, graph.region(), ext);
            if let Err(e) = std::fs::write(&path, text) {
                return Err(fail_input(codes::E0302, format!("{}: {}", path.display(), e)));
            }
            log::debug!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn dump_path(dir: &Path, region: &str, ext: &str) -> PathBuf {
    let file: String = region
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    dir.join(format!("{file}.{ext}"))
}

/// Print a diagnostic with `file:line:col` when it carries a span.
fn report(d: &Diagnostic, source: &str, source_name: &str) {
    match d.span {
        Some(span) if span.start <= source.len() => {
            let before = &source[..span.start];
            let line = before.matches('\n').count() + 1;
            let col = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
            eprintln!("{source_name}:{line}:{col}: {d}");
        }
        _ => eprintln!("ttasched: {d}"),
    }
    for cause in &d.cause_chain {
        eprintln!("  caused by: {}", cause.message);
    }
}

/// 0 success, 1 region or parse errors, 2 input, I/O or cache errors.
fn exit_code(run: &SchedulingRun) -> ExitCode {
    let errors: Vec<&Diagnostic> = run.all_diagnostics().filter(|d| d.is_error()).collect();
    let input_error = errors
        .iter()
        .any(|d| d.code.is_some_and(|c| c.0.starts_with("E02") || c.0.starts_with("E03")));
    if input_error {
        ExitCode::from(2)
    } else if !errors.is_empty() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
