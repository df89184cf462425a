// pipeline.rs — Scheduling run state and pass orchestration
//
// Runs the minimal set of passes for a terminal PassId: parse the region IR,
// consult the backend plugin cache once, then build, schedule, verify and
// fill every region on a pool of scoped worker threads. Region results come
// back in program order; a failing region is reported and the rest proceed.
//
// Preconditions: `model` was validated from `desc`.
// Postconditions: one `RegionResult` per parsed region, in source order;
//                 `has_error` is set when any error diagnostic was produced.
// Failure modes: parse errors, duplicate region names, per-region
//                `SchedError`s, schedule verification failures and cache
//                errors all become diagnostics.
// Side effects: the plugin cache may build and write an artifact.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::alias::{AddressSpaceAnalysis, AliasOracle, OracleChain, WorkItemAliasFacts};
use crate::ast::{Program, Region, Span};
use crate::ddg::DependenceGraph;
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::error::{CacheError, OpLocation, SchedError};
use crate::machine::{MachineDescription, ResourceModel};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::patterns::PatternReport;
use crate::plugin_cache::{ArtifactHandle, PluginCache};
use crate::schedule::{verify_schedule, Schedule};
use crate::strategy::{ScheduleOptions, StrategyKind};

// ── Options ────────────────────────────────────────────────────────────────

/// Run-wide scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// `None` picks the default for the pressure mode.
    pub strategy: Option<StrategyKind>,
    pub schedule: ScheduleOptions,
    pub fill_delay_slots: bool,
    pub address_space_aa: bool,
    /// Also compute the pattern report.
    pub analyze_patterns: bool,
    /// Worker threads; 0 uses the available parallelism.
    pub jobs: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            strategy: None,
            schedule: ScheduleOptions::default(),
            fill_delay_slots: true,
            address_space_aa: true,
            analyze_patterns: false,
            jobs: 0,
        }
    }
}

impl SchedulerOptions {
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
            .unwrap_or_else(|| self.schedule.default_strategy())
    }

    fn workers(&self, regions: usize) -> usize {
        let jobs = if self.jobs == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.jobs
        };
        jobs.clamp(1, regions.max(1))
    }
}

/// The alias oracles consulted by the dependence graph builder: user facts
/// first, then address spaces. Pairs nobody answers stay conservative.
pub fn alias_oracles(options: &SchedulerOptions, facts: Option<WorkItemAliasFacts>) -> OracleChain {
    let mut chain = OracleChain::new();
    if let Some(facts) = facts {
        chain.push(Box::new(facts));
    }
    if options.address_space_aa {
        chain.push(Box::new(AddressSpaceAnalysis));
    }
    chain
}

// ── Results ────────────────────────────────────────────────────────────────

/// Everything produced for one region.
#[derive(Debug, Clone)]
pub struct RegionResult {
    pub name: String,
    pub graph: Option<DependenceGraph>,
    pub schedule: Option<Schedule>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RegionResult {
    fn new(name: &str) -> Self {
        RegionResult {
            name: name.to_string(),
            graph: None,
            schedule: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        has_error_diags(&self.diagnostics)
    }
}

/// State and artifacts of one scheduling run.
#[derive(Debug)]
pub struct SchedulingRun {
    pub passes: Vec<PassId>,
    pub program: Option<Program>,
    pub plugin: Option<ArtifactHandle>,
    pub regions: Vec<RegionResult>,
    pub patterns: Option<PatternReport>,
    /// Run-level diagnostics (parse, duplicate regions, cache).
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

impl SchedulingRun {
    /// Run-level diagnostics followed by each region's, in program order.
    pub fn all_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .chain(self.regions.iter().flat_map(|r| r.diagnostics.iter()))
    }

    /// Built graphs, in program order.
    pub fn graphs(&self) -> Vec<&DependenceGraph> {
        self.regions.iter().filter_map(|r| r.graph.as_ref()).collect()
    }

    /// Completed schedules paired with their graphs, in program order.
    pub fn schedules(&self) -> Vec<(&Schedule, &DependenceGraph)> {
        self.regions
            .iter()
            .filter_map(|r| Some((r.schedule.as_ref()?, r.graph.as_ref()?)))
            .collect()
    }
}

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

fn log_pass(pass: PassId, scope: &str, elapsed: Duration) {
    let desc = descriptor(pass);
    log::debug!(
        "{}{} complete, {:.1}ms",
        scope,
        desc.name,
        elapsed.as_secs_f64() * 1000.0
    );
    log::trace!(
        "{}{}: produced {:?} (keyed on {}; {})",
        scope,
        desc.name,
        desc.outputs,
        desc.invalidation_key,
        desc.invariants
    );
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Preconditions: `model` was built from `desc`.
/// Postconditions: artifacts of every required pass are populated for each
///   region that did not fail.
/// Failure modes: reported through diagnostics and `has_error`.
/// Side effects: may replace `cache` with a process-local fallback when the
///   persistent cache directory is unusable.
pub fn run_pipeline(
    source: &str,
    desc: &MachineDescription,
    model: &ResourceModel,
    cache: &mut PluginCache,
    oracle: &dyn AliasOracle,
    options: &SchedulerOptions,
    terminal: PassId,
) -> SchedulingRun {
    let mut passes = required_passes(terminal);
    if options.analyze_patterns && !passes.contains(&PassId::AnalyzePatterns) {
        for pass in required_passes(PassId::AnalyzePatterns) {
            if !passes.contains(&pass) {
                passes.push(pass);
            }
        }
    }
    if passes.contains(&PassId::Schedule) && !passes.contains(&PassId::BuildPlugin) {
        passes.insert(0, PassId::BuildPlugin);
    }
    if !options.fill_delay_slots {
        passes.retain(|p| *p != PassId::FillDelaySlots);
    }

    let mut run = SchedulingRun {
        passes: passes.clone(),
        program: None,
        plugin: None,
        regions: Vec::new(),
        patterns: None,
        diagnostics: Vec::new(),
        has_error: false,
    };

    if passes.contains(&PassId::BuildPlugin) {
        let t = Instant::now();
        let (plugin, diags) = fetch_plugin(cache, desc);
        log_pass(PassId::BuildPlugin, "", t.elapsed());
        run.plugin = plugin;
        run.diagnostics.extend(diags);
    }

    if passes.contains(&PassId::Parse) {
        let t = Instant::now();
        let (program, diags) = parse_program(source);
        log_pass(PassId::Parse, "", t.elapsed());
        let failed = has_error_diags(&diags);
        run.diagnostics.extend(diags);
        if !failed {
            run.program = program;
        }
    }

    if let Some(program) = &run.program {
        let regions = unique_regions(program, &mut run.diagnostics);
        run.regions = schedule_program(&regions, model, oracle, options, &passes);
    }

    if passes.contains(&PassId::AnalyzePatterns) {
        let t = Instant::now();
        run.patterns = Some(PatternReport::collect(run.graphs()));
        log_pass(PassId::AnalyzePatterns, "", t.elapsed());
    }

    let has_error = run.all_diagnostics().any(Diagnostic::is_error);
    run.has_error = has_error;
    run
}

/// Parse the region IR, converting syntax errors into diagnostics.
pub fn parse_program(source: &str) -> (Option<Program>, Vec<Diagnostic>) {
    let result = crate::parser::parse(source);
    let diags = result
        .errors
        .iter()
        .map(|e| {
            Diagnostic::new(DiagLevel::Error, e.to_string())
                .with_code(codes::E0001)
                .with_span(*e.span())
        })
        .collect();
    (result.program, diags)
}

/// Regions in program order, without later duplicates of a name.
fn unique_regions<'p>(program: &'p Program, diags: &mut Vec<Diagnostic>) -> Vec<&'p Region> {
    let mut seen = HashSet::new();
    let mut regions = Vec::with_capacity(program.regions.len());
    for region in &program.regions {
        if seen.insert(region.name.name.as_str()) {
            regions.push(region);
        } else {
            diags.push(
                Diagnostic::new(
                    DiagLevel::Error,
                    format!("duplicate region name '{}'", region.name.name),
                )
                .with_code(codes::E0002)
                .with_region(region.name.name.clone())
                .with_span(region.name.span)
                .with_hint("region names must be unique within a file"),
            );
        }
    }
    regions
}

/// Get or build the backend plugin, falling back to a process-local cache
/// when the persistent one cannot be used.
pub fn fetch_plugin(
    cache: &mut PluginCache,
    desc: &MachineDescription,
) -> (Option<ArtifactHandle>, Vec<Diagnostic>) {
    match cache.get_or_build(desc) {
        Ok(handle) => (Some(handle), Vec::new()),
        Err(err @ CacheError::CacheIo { .. }) if cache.is_persistent() => {
            log::warn!("plugin cache unusable ({}), building a process-local plugin", err);
            let warning = Diagnostic::new(
                DiagLevel::Warning,
                format!(
                    "backend plugin cache at {} is unusable; the plugin is not persisted",
                    cache.root().display()
                ),
            )
            .with_code(codes::W0200)
            .with_cause(err.to_string());

            let fallback = match cache.ephemeral_fallback() {
                Ok(fallback) => fallback,
                Err(e) => return (None, vec![warning, Diagnostic::from(&e)]),
            };
            *cache = fallback;
            match cache.get_or_build(desc) {
                Ok(handle) => (Some(handle), vec![warning]),
                Err(e) => (None, vec![warning, Diagnostic::from(&e)]),
            }
        }
        Err(err) => (None, vec![Diagnostic::from(&err)]),
    }
}

// ── Region scheduling ──────────────────────────────────────────────────────

/// Schedule every region on a pool of scoped worker threads.
///
/// Workers pull region indices from a shared counter; results are returned
/// in the order of `regions` regardless of completion order.
pub fn schedule_program(
    regions: &[&Region],
    model: &ResourceModel,
    oracle: &dyn AliasOracle,
    options: &SchedulerOptions,
    passes: &[PassId],
) -> Vec<RegionResult> {
    let workers = options.workers(regions.len());
    if workers <= 1 {
        return regions
            .iter()
            .map(|r| schedule_region(r, model, oracle, options, passes))
            .collect();
    }

    let next = AtomicUsize::new(0);
    let mut indexed: Vec<(usize, RegionResult)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(region) = regions.get(i) else { break };
                        done.push((i, schedule_region(region, model, oracle, options, passes)));
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, r)| r).collect()
}

/// Build, schedule, verify and fill one region as far as `passes` reach.
pub fn schedule_region(
    region: &Region,
    model: &ResourceModel,
    oracle: &dyn AliasOracle,
    options: &SchedulerOptions,
    passes: &[PassId],
) -> RegionResult {
    let name = region.name.name.as_str();
    let scope = format!("region '{name}': ");
    let mut result = RegionResult::new(name);

    let t = Instant::now();
    let graph = match crate::ddg_builder::build(region, model, oracle) {
        Ok(graph) => graph,
        Err(e) => {
            result.diagnostics.push(region_error(&e, region));
            return result;
        }
    };
    log_pass(PassId::BuildDdg, &scope, t.elapsed());

    if passes.contains(&PassId::Schedule) {
        let t = Instant::now();
        match crate::strategy::run(options.strategy(), &graph, model, &options.schedule) {
            Ok(schedule) => {
                log_pass(PassId::Schedule, &scope, t.elapsed());
                let schedule = if passes.contains(&PassId::FillDelaySlots) {
                    let t = Instant::now();
                    let filled =
                        crate::delay_slot::fill(&schedule, &graph, model, model.delay_slots);
                    log_pass(PassId::FillDelaySlots, &scope, t.elapsed());
                    filled
                } else {
                    schedule
                };

                let cert = verify_schedule(&schedule, &graph, model);
                if cert.all_pass() {
                    result.schedule = Some(schedule);
                } else {
                    let mut d = Diagnostic::new(
                        DiagLevel::Error,
                        format!("schedule of region '{name}' failed verification"),
                    )
                    .with_code(codes::E0103)
                    .with_region(name)
                    .with_span(region.span);
                    for violation in &cert.violations {
                        d = d.with_cause(violation.clone());
                    }
                    result.diagnostics.push(d);
                }
            }
            Err(e) => result.diagnostics.push(region_error(&e, region)),
        }
    }

    result.graph = Some(graph);
    result
}

/// Diagnostic for a region failure, pointing at the offending operation
/// when one is known.
fn region_error(err: &SchedError, region: &Region) -> Diagnostic {
    let span: Span = match err {
        SchedError::MalformedRegion {
            at: OpLocation::Op { index, .. },
            ..
        } => region
            .ops
            .get(*index as usize)
            .map_or(region.span, |op| op.span),
        _ => region.span,
    };
    log::debug!("{}", err);
    Diagnostic::from(err).with_span(span)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::{minimal_desc, minimal_model};

    const TWO_REGIONS: &str = concat!(
        "region bb0 in(r0) {\n r1 = load r0\n r2 = add r1, r1\n store r2, r0\n branch\n}\n",
        "region bad in(r0) {\n r1 = add r9, r0\n}\n",
        "region bb2 in(r0) out(r1) {\n r1 = add r0, 1\n}\n",
    );

    fn run(source: &str, options: &SchedulerOptions, terminal: PassId) -> SchedulingRun {
        let desc = minimal_desc();
        let model = minimal_model();
        let mut cache = PluginCache::ephemeral().unwrap();
        let oracle = alias_oracles(options, None);
        run_pipeline(source, &desc, &model, &mut cache, &oracle, options, terminal)
    }

    #[test]
    fn failing_region_is_isolated() {
        let r = run(TWO_REGIONS, &SchedulerOptions::default(), PassId::FillDelaySlots);
        assert!(r.has_error);
        assert_eq!(r.regions.len(), 3);
        assert!(r.regions[0].schedule.is_some());
        assert!(r.regions[1].schedule.is_none());
        assert_eq!(r.regions[1].diagnostics[0].code, Some(codes::E0100));
        assert!(r.regions[2].schedule.is_some());
        assert!(r.plugin.is_some());
    }

    #[test]
    fn malformed_region_points_at_operation() {
        let r = run(TWO_REGIONS, &SchedulerOptions::default(), PassId::BuildDdg);
        let d = &r.regions[1].diagnostics[0];
        let span = d.span.unwrap();
        assert_eq!(&TWO_REGIONS[span.start..span.end], "r1 = add r9, r0");
    }

    #[test]
    fn results_keep_program_order_with_many_workers() {
        let source: String = (0..16)
            .map(|i| format!("region r{i} in(r0) out(r1) {{\n r1 = add r0, {i}\n}}\n"))
            .collect();
        let options = SchedulerOptions {
            jobs: 4,
            ..Default::default()
        };
        let r = run(&source, &options, PassId::FillDelaySlots);
        let names: Vec<&str> = r.regions.iter().map(|x| x.name.as_str()).collect();
        let expected: Vec<String> = (0..16).map(|i| format!("r{i}")).collect();
        assert_eq!(names, expected);
        assert!(!r.has_error);
    }

    #[test]
    fn ddg_terminal_skips_scheduling_and_plugin() {
        let r = run(TWO_REGIONS, &SchedulerOptions::default(), PassId::BuildDdg);
        assert!(r.plugin.is_none());
        assert!(r.regions[0].graph.is_some());
        assert!(r.regions[0].schedule.is_none());
    }

    #[test]
    fn duplicate_region_reported() {
        let r = run(
            "region a {\n}\nregion a {\n}\n",
            &SchedulerOptions::default(),
            PassId::FillDelaySlots,
        );
        assert_eq!(r.regions.len(), 1);
        assert_eq!(r.diagnostics[0].code, Some(codes::E0002));
        assert!(r.has_error);
    }

    #[test]
    fn parse_error_stops_region_work() {
        let r = run("region {", &SchedulerOptions::default(), PassId::FillDelaySlots);
        assert!(r.has_error);
        assert!(r.regions.is_empty());
        assert!(r
            .diagnostics
            .iter()
            .any(|d| d.code == Some(codes::E0001)));
    }

    #[test]
    fn patterns_on_request() {
        let options = SchedulerOptions {
            analyze_patterns: true,
            ..Default::default()
        };
        let r = run(TWO_REGIONS, &options, PassId::FillDelaySlots);
        let report = r.patterns.unwrap();
        assert_eq!(report.regions, 2);
    }

    #[test]
    fn filler_can_be_disabled() {
        let options = SchedulerOptions {
            fill_delay_slots: false,
            ..Default::default()
        };
        let r = run(TWO_REGIONS, &options, PassId::FillDelaySlots);
        assert!(!r.passes.contains(&PassId::FillDelaySlots));
        assert!(r.passes.contains(&PassId::Schedule));
    }

    #[test]
    fn default_strategy_follows_pressure_mode() {
        let mut options = SchedulerOptions::default();
        assert_eq!(options.strategy(), StrategyKind::BottomUp);
        options.schedule.conservative = true;
        assert_eq!(options.strategy(), StrategyKind::TopDown);
        options.strategy = Some(StrategyKind::BubbleFish);
        assert_eq!(options.strategy(), StrategyKind::BubbleFish);
    }

    #[test]
    fn oracle_chain_order() {
        let facts = WorkItemAliasFacts::default();
        let chain = alias_oracles(&SchedulerOptions::default(), Some(facts));
        assert_eq!(chain.names(), vec!["work-item-facts", "address-space"]);
        let off = SchedulerOptions {
            address_space_aa: false,
            ..Default::default()
        };
        assert!(alias_oracles(&off, None).names().is_empty());
    }
}
