use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustc_hash::FxHashSet;

use gridcalc_common::{
    CellAddr, CellError, CellUpdate, CellValue, EvalRequest, FormulaEvaluator, OutputMode,
    QualifiedCell, ValueSink, WorkbookSource,
};

use super::builder::GraphBuilder;
use super::cache::{CacheSubsystem, CacheView, SheetSnapshot};
use super::dag::DagScheduler;
use super::governor::{EvalRunner, Governor, Mark, Outcome, Verdict};
use super::graph::DependencyGraph;
use super::levels::{LevelPlan, assign_levels, merge_levels};
use super::metrics::{PassCounters, PassStats, PassTimer};
use super::node::{CellId, NodeId};
use super::pattern::PatternOptimizer;
use super::sheet_registry::SheetRegistry;
use super::{EvalConfig, ExecutionMode};
use crate::error::RecalcError;

pub struct Engine {
    config: EvalConfig,
    source: Arc<dyn WorkbookSource>,
    evaluator: Arc<dyn FormulaEvaluator>,
    sink: Arc<dyn ValueSink>,
    cache: Arc<CacheSubsystem>,
    registry: Arc<SheetRegistry>,
    graph: Option<DependencyGraph>,
    plan: LevelPlan,
    /// A full pass has populated the computed tier for the current graph.
    primed: bool,
    /// Cells that timed out, or were skipped for it, when they last ran.
    timed_out: Mutex<FxHashSet<CellId>>,
    thread_pool: Option<Arc<ThreadPool>>,
}

/// What one recalculation pass did.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Formula cells whose value differs from the value they had before.
    pub changed: BTreeMap<QualifiedCell, CellValue>,
    pub stats: PassStats,
    /// Cells on or downstream of a circular reference.
    pub circular: Vec<QualifiedCell>,
    /// Cells that overran the evaluation timeout or were skipped because an
    /// input did.
    pub timed_out: Vec<QualifiedCell>,
    /// Each reference cycle, as the formula cells forming it.
    pub cycles: Vec<Vec<QualifiedCell>>,
}

/// Per-pass shared state handed to every scheduler worker.
struct PassState<'p> {
    graph: &'p DependencyGraph,
    governor: Governor,
    counters: PassCounters,
    view: CacheView,
    sheet_names: Vec<Arc<str>>,
    changed: Mutex<Vec<(CellId, CellValue)>>,
    circular: Mutex<Vec<CellId>>,
    timed_out: Mutex<Vec<CellId>>,
}

impl Engine {
    pub fn new(
        source: Arc<dyn WorkbookSource>,
        evaluator: Arc<dyn FormulaEvaluator>,
        sink: Arc<dyn ValueSink>,
        config: EvalConfig,
    ) -> Self {
        // Initialize thread pool based on config
        let thread_pool = if config.enable_parallel {
            let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("gridcalc-{i}"));
            if let Some(max_threads) = config.max_threads {
                builder = builder.num_threads(max_threads);
            }

            match builder.build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "thread pool unavailable, evaluating sequentially");
                    None
                }
            }
        } else {
            None
        };
        Self::assemble(source, evaluator, sink, config, thread_pool)
    }

    /// Create an engine sharing an existing thread pool.
    pub fn with_thread_pool(
        source: Arc<dyn WorkbookSource>,
        evaluator: Arc<dyn FormulaEvaluator>,
        sink: Arc<dyn ValueSink>,
        config: EvalConfig,
        thread_pool: Arc<ThreadPool>,
    ) -> Self {
        Self::assemble(source, evaluator, sink, config, Some(thread_pool))
    }

    fn assemble(
        source: Arc<dyn WorkbookSource>,
        evaluator: Arc<dyn FormulaEvaluator>,
        sink: Arc<dyn ValueSink>,
        config: EvalConfig,
        thread_pool: Option<Arc<ThreadPool>>,
    ) -> Self {
        Self {
            cache: Arc::new(CacheSubsystem::new(config.range_cache_capacity)),
            config,
            source,
            evaluator,
            sink,
            registry: Arc::new(SheetRegistry::new()),
            graph: None,
            plan: LevelPlan::default(),
            primed: false,
            timed_out: Mutex::new(FxHashSet::default()),
            thread_pool,
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// The current dependency graph, if one has been built.
    pub fn graph(&self) -> Option<&DependencyGraph> {
        self.graph.as_ref()
    }

    pub fn level_plan(&self) -> &LevelPlan {
        &self.plan
    }

    pub fn cache(&self) -> &CacheSubsystem {
        &self.cache
    }

    pub fn registry(&self) -> &SheetRegistry {
        &self.registry
    }

    pub fn thread_pool(&self) -> Option<&Arc<ThreadPool>> {
        self.thread_pool.as_ref()
    }

    /* ─────────────── structure ─────────────── */

    /// Rebuild the dependency graph and levels from the source.
    ///
    /// When a sheet has been removed or renamed since the last build, sheet
    /// ids are reassigned from scratch and every cache tier is dropped, so
    /// references to the old name resolve as unknown sheets.
    pub fn rebuild_graph(&mut self) -> Result<(), RecalcError> {
        let names = self.source.sheet_names();
        if !self.registry.is_subset_of(&names) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                registered = self.registry.len(),
                sheets = names.len(),
                "sheet removed or renamed, reassigning sheet ids"
            );
            self.registry = Arc::new(SheetRegistry::new());
            self.cache.clear();
        }
        let registry = Arc::make_mut(&mut self.registry);
        let mut graph = GraphBuilder::new(&self.config).build(
            self.source.as_ref(),
            registry,
            self.thread_pool.as_deref(),
        )?;
        self.plan = assign_levels(&mut graph);
        self.cache.retain_computed(|cell| graph.is_formula_cell(cell));
        self.graph = Some(graph);
        self.primed = false;
        self.timed_out.get_mut().clear();
        Ok(())
    }

    /// Build the graph if there is none, or if the host's sheets no longer
    /// match the ones it was built from.
    fn ensure_graph(&mut self) -> Result<(), RecalcError> {
        let stale = self.graph.is_none() || !self.registry.matches(&self.source.sheet_names());
        if stale {
            self.rebuild_graph()?;
        }
        Ok(())
    }

    /// Forget everything cached for a sheet after a structural edit (rows or
    /// columns inserted, sheet replaced). The graph is rebuilt on the next
    /// operation.
    pub fn invalidate_sheet(&mut self, sheet: &str) -> Result<(), RecalcError> {
        let id = self
            .registry
            .get_id(sheet)
            .ok_or_else(|| RecalcError::UnknownSheet(sheet.to_string()))?;
        self.cache.invalidate_sheet(id);
        self.graph = None;
        self.primed = false;
        Ok(())
    }

    /* ─────────────── passes ─────────────── */

    /// Recompute every formula.
    pub fn recalculate_all(&mut self) -> Result<PassReport, RecalcError> {
        self.ensure_graph()?;
        self.reload_snapshots()?;
        Ok(self.full_pass())
    }

    fn reload_snapshots(&self) -> Result<(), RecalcError> {
        let Some(graph) = self.graph.as_ref() else {
            return Ok(());
        };
        for sheet in self.registry.ids() {
            let cells = self.source.cells(self.registry.name(sheet))?;
            self.cache
                .load_snapshot(sheet, SheetSnapshot::from_cells(cells));
            self.cache
                .extend_extent(sheet, graph.formula_cells_on(sheet));
        }
        Ok(())
    }

    fn full_pass(&mut self) -> PassReport {
        self.cache.clear_ranges();
        let report = match self.graph.as_ref() {
            Some(graph) => self.run_pass(graph, &self.plan),
            None => PassReport::default(),
        };
        self.primed = true;
        report
    }

    /// Write input values and recompute what depends on them.
    ///
    /// The whole batch is validated before anything is written. Overwriting
    /// a formula cell with a value changes the graph, so it rebuilds and
    /// runs a full pass.
    pub fn apply_updates(&mut self, updates: &[CellUpdate]) -> Result<PassReport, RecalcError> {
        if updates.is_empty() {
            return Err(RecalcError::EmptyUpdateBatch);
        }
        self.ensure_graph()?;
        let cells = self.validate_updates(updates)?;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("apply_updates", cells = cells.len()).entered();

        for (update, cell) in updates.iter().zip(&cells) {
            self.sink
                .store_input_value(&update.sheet, update.addr, &update.value);
            self.cache.set_input(*cell, update.value.clone());
        }

        let structural = self
            .graph
            .as_ref()
            .is_some_and(|g| cells.iter().any(|c| g.is_formula_cell(*c)));
        if structural {
            #[cfg(feature = "tracing")]
            tracing::debug!("update overwrites a formula cell, rebuilding");
            self.rebuild_graph()?;
            self.reload_snapshots()?;
            return Ok(self.full_pass());
        }
        if !self.primed {
            self.reload_snapshots()?;
            return Ok(self.full_pass());
        }

        let affected = match self.graph.as_ref() {
            Some(graph) => graph.affected_by_cells(&cells),
            None => FxHashSet::default(),
        };
        Ok(self.incremental_pass(&cells, affected))
    }

    fn validate_updates(&self, updates: &[CellUpdate]) -> Result<Vec<CellId>, RecalcError> {
        updates
            .iter()
            .map(|u| {
                let sheet = self
                    .registry
                    .get_id(&u.sheet)
                    .ok_or_else(|| RecalcError::UnknownSheet(u.sheet.clone()))?;
                CellAddr::try_new(u.addr.row, u.addr.col).map_err(|source| {
                    RecalcError::InvalidAddress {
                        sheet: u.sheet.clone(),
                        source,
                    }
                })?;
                Ok(CellId::new(sheet, u.addr))
            })
            .collect()
    }

    /// Recompute everything downstream of whole columns of `sheet`, after
    /// the host bulk-loaded new values into them.
    pub fn recalculate_columns(
        &mut self,
        sheet: &str,
        cols: &[u32],
    ) -> Result<PassReport, RecalcError> {
        if cols.is_empty() {
            return Err(RecalcError::EmptyColumnSet);
        }
        self.ensure_graph()?;
        let id = self
            .registry
            .get_id(sheet)
            .ok_or_else(|| RecalcError::UnknownSheet(sheet.to_string()))?;

        let cells = self.source.cells(sheet)?;
        self.cache.load_snapshot(id, SheetSnapshot::from_cells(cells));
        if let Some(graph) = self.graph.as_ref() {
            self.cache.extend_extent(id, graph.formula_cells_on(id));
        }
        self.cache.invalidate_columns(id, cols);
        if !self.primed {
            self.reload_snapshots()?;
            return Ok(self.full_pass());
        }

        let affected = match self.graph.as_ref() {
            Some(graph) => graph.affected_by_columns(id, cols),
            None => FxHashSet::default(),
        };
        Ok(self.incremental_pass(&[], affected))
    }

    fn incremental_pass(
        &mut self,
        inputs: &[CellId],
        mut affected: FxHashSet<NodeId>,
    ) -> PassReport {
        let Some(graph) = self.graph.as_ref() else {
            return PassReport::default();
        };
        {
            // Cells blanked by a timeout rerun, so their dependents are
            // skipped again.
            let timed_out = self.timed_out.lock();
            if !timed_out.is_empty() {
                graph.pull_upstream(&mut affected, |cell| timed_out.contains(&cell));
            }
        }
        let affected_formulas = affected
            .iter()
            .filter(|id| graph.node(**id).is_formula())
            .count();
        let total = graph.formula_count().max(1);
        if affected_formulas as f64 / total as f64 > self.config.incremental_full_threshold {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                affected = affected_formulas,
                total,
                "affected share over threshold, running full pass"
            );
            return self.full_pass();
        }

        let mut touched: Vec<CellId> = inputs.to_vec();
        touched.extend(affected.iter().filter_map(|id| graph.node(*id).cell()));
        self.cache.invalidate_ranges_touching(&touched);

        let mut sub = graph.filter(&affected);
        let plan = assign_levels(&mut sub);
        self.run_pass(&sub, &plan)
    }

    /// A computed value from the cache. `Display` renders lazily and caches
    /// the rendering.
    pub fn cached_value(&self, sheet: &str, addr: CellAddr, mode: OutputMode) -> Option<CellValue> {
        let cell = CellId::new(self.registry.get_id(sheet)?, addr);
        match mode {
            OutputMode::Raw => self.cache.computed(cell, OutputMode::Raw),
            OutputMode::Display => self.cache.display_value(cell),
        }
    }

    /* ─────────────── pass execution ─────────────── */

    fn run_pass(&self, graph: &DependencyGraph, plan: &LevelPlan) -> PassReport {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "recalc_pass",
            formulas = graph.formula_count(),
            levels = plan.level_count()
        )
        .entered();

        let timer = PassTimer::start();
        let state = PassState {
            graph,
            governor: Governor::new(graph.len(), &self.config),
            counters: PassCounters::new(),
            view: CacheView::new(
                self.cache.clone(),
                self.source.clone(),
                self.registry.clone(),
            ),
            sheet_names: self
                .registry
                .ids()
                .map(|id| Arc::from(self.registry.name(id)))
                .collect(),
            changed: Mutex::new(Vec::new()),
            circular: Mutex::new(Vec::new()),
            timed_out: Mutex::new(Vec::new()),
        };

        for &id in &plan.circular {
            state.governor.mark(graph, id, Mark::Circular);
            if let Some(cell) = graph.node(id).cell() {
                self.store(&state, cell, CellValue::Empty);
                state.counters.inc_circular();
                state.circular.lock().push(cell);
            }
        }

        let pool = self.thread_pool.as_deref();
        let batches = match self.config.execution_mode {
            ExecutionMode::Leveled => {
                let batches = merge_levels(graph, plan, self.config.merge_levels);
                for batch in &batches {
                    let resolved = self.resolve_patterns(&state, &batch.nodes);
                    self.schedule(&state, &batch.nodes, &resolved, pool);
                }
                batches.len()
            }
            ExecutionMode::WholeGraph => {
                let nodes: Vec<NodeId> = plan.levels.iter().flatten().copied().collect();
                let resolved = match plan.levels.first() {
                    Some(level0) => self.resolve_patterns(&state, level0),
                    None => FxHashSet::default(),
                };
                self.schedule(&state, &nodes, &resolved, pool);
                usize::from(!nodes.is_empty())
            }
        };

        let mut stats = state.counters.snapshot();
        stats.total = graph.formula_count();
        stats.levels = plan.level_count();
        stats.batches = batches;
        stats.slow_formulas = state.governor.slow_formulas(&self.registry);
        stats.elapsed = timer.elapsed();

        {
            let mut carried = self.timed_out.lock();
            carried.retain(|cell| !graph.is_formula_cell(*cell));
            carried.extend(state.timed_out.lock().iter().copied());
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            total = stats.total,
            succeeded = stats.succeeded,
            errors = stats.errors,
            timed_out = stats.timed_out,
            circular = stats.circular,
            pattern_resolved = stats.pattern_resolved,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "recalculation pass finished"
        );

        self.report(state, plan, stats)
    }

    fn resolve_patterns(&self, state: &PassState<'_>, nodes: &[NodeId]) -> FxHashSet<NodeId> {
        let optimizer = PatternOptimizer::new(
            state.graph,
            &self.config.pattern,
            self.thread_pool.as_deref(),
        );
        let outcome = optimizer.resolve(nodes, &state.view, |id| {
            state.governor.check(state.graph, id) == Verdict::Evaluate
        });
        state.counters.add_pattern_groups(outcome.groups_run);
        state.counters.add_pattern_resolved(outcome.resolved.len());

        let mut done = FxHashSet::default();
        for (id, value) in outcome.resolved {
            let Some(cell) = state.graph.node(id).cell() else {
                continue;
            };
            if value.is_error() {
                state.counters.inc_errors();
            } else {
                state.counters.inc_succeeded();
            }
            self.store(state, cell, value);
            done.insert(id);
        }
        done
    }

    fn schedule(
        &self,
        state: &PassState<'_>,
        nodes: &[NodeId],
        resolved: &FxHashSet<NodeId>,
        pool: Option<&ThreadPool>,
    ) {
        let scheduler = DagScheduler::new(state.graph, nodes, resolved);
        let run = scheduler.run(pool, || {
            let mut runner = EvalRunner::new(self.evaluator.clone(), state.view.clone());
            move |id| self.execute(state, &mut runner, id)
        });
        if !run.is_complete() {
            #[cfg(feature = "tracing")]
            tracing::error!(
                completed = run.completed,
                total = run.total,
                "scheduler stopped before completing its batch"
            );
        }
    }

    fn execute(&self, state: &PassState<'_>, runner: &mut EvalRunner, id: NodeId) {
        let graph = state.graph;
        let Some(formula) = graph.node(id).as_formula() else {
            return;
        };
        let cell = formula.cell;

        match state.governor.check(graph, id) {
            Verdict::Skip(mark) => {
                state.governor.mark(graph, id, mark);
                self.store(state, cell, CellValue::Empty);
                match mark {
                    Mark::Circular => {
                        state.counters.inc_circular();
                        state.circular.lock().push(cell);
                    }
                    _ => {
                        state.counters.inc_timed_out();
                        state.timed_out.lock().push(cell);
                    }
                }
            }
            Verdict::Poisoned => {
                state.counters.inc_unresolved();
                self.store(
                    state,
                    cell,
                    CellError::new_ref()
                        .with_message("unresolved reference")
                        .into(),
                );
            }
            Verdict::Evaluate => {
                let request = EvalRequest {
                    sheet: state.sheet_names[cell.sheet as usize].clone(),
                    addr: cell.addr,
                    formula: formula.formula.clone(),
                    empty_text_policy: self.config.empty_text_policy,
                };
                match state.governor.evaluate(runner, cell, request) {
                    Outcome::Value(value) => {
                        if value.is_error() {
                            state.counters.inc_errors();
                        } else {
                            state.counters.inc_succeeded();
                        }
                        self.store(state, cell, value);
                    }
                    Outcome::Failed(failure) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            sheet = %state.sheet_names[cell.sheet as usize],
                            cell = %cell.addr,
                            error = %failure,
                            "formula evaluation failed"
                        );
                        state.counters.inc_errors();
                        self.store(state, cell, failure.to_value());
                    }
                    Outcome::TimedOut => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            sheet = %state.sheet_names[cell.sheet as usize],
                            cell = %cell.addr,
                            "formula evaluation timed out"
                        );
                        state.governor.mark(graph, id, Mark::TimedOut);
                        state.governor.mark_column(cell);
                        state.counters.inc_timed_out();
                        state.timed_out.lock().push(cell);
                        self.store(state, cell, CellValue::Empty);
                    }
                }
            }
        }
    }

    /// Persist a result in the computed tier and the sink, noting whether
    /// it changed.
    fn store(&self, state: &PassState<'_>, cell: CellId, value: CellValue) {
        let previous = self
            .cache
            .store_computed(cell, value.clone())
            .or_else(|| self.cache.snapshot_value(cell))
            .unwrap_or_default();
        self.sink.store_computed_value(
            &state.sheet_names[cell.sheet as usize],
            cell.addr,
            &value,
        );
        if previous != value {
            state.changed.lock().push((cell, value));
        }
    }

    fn qualify(&self, cell: CellId) -> QualifiedCell {
        QualifiedCell::new(self.registry.name(cell.sheet), cell.addr)
    }

    fn report(&self, state: PassState<'_>, plan: &LevelPlan, stats: PassStats) -> PassReport {
        let graph = state.graph;
        let changed = state
            .changed
            .into_inner()
            .into_iter()
            .map(|(cell, value)| (self.qualify(cell), value))
            .collect();
        let mut circular: Vec<QualifiedCell> = state
            .circular
            .into_inner()
            .into_iter()
            .map(|c| self.qualify(c))
            .collect();
        circular.sort();
        let mut timed_out: Vec<QualifiedCell> = state
            .timed_out
            .into_inner()
            .into_iter()
            .map(|c| self.qualify(c))
            .collect();
        timed_out.sort();
        let cycles = plan
            .cycles
            .iter()
            .map(|scc| {
                let mut cells: Vec<QualifiedCell> = scc
                    .iter()
                    .filter_map(|id| graph.node(*id).cell())
                    .map(|c| self.qualify(c))
                    .collect();
                cells.sort();
                cells
            })
            .filter(|cells| !cells.is_empty())
            .collect();

        PassReport {
            changed,
            stats,
            circular,
            timed_out,
            cycles,
        }
    }
}
