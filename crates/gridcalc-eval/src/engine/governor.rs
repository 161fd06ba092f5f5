//! Failure containment around single-formula evaluation.
//!
//! The governor decides whether a node may run at all (self references,
//! circular or timed-out inputs, poisoned references), runs it with a
//! bounded wait, and remembers which nodes and columns went bad so that
//! downstream nodes are skipped instead of evaluated.

use std::hash::BuildHasherDefault;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHasher;

use gridcalc_common::{
    CellValue, EvalFailure, EvalRequest, FormulaEvaluator, QualifiedCell, SheetId,
};

use super::cache::CacheView;
use super::graph::DependencyGraph;
use super::metrics::SlowFormula;
use super::node::{CellId, NodeId, NodeKind, POISONED};
use super::sheet_registry::SheetRegistry;
use super::{EvalConfig, TimeoutScope};

/// Failure state of a node. Ordered: circular wins over timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Mark {
    Clear = 0,
    TimedOut = 1,
    Circular = 2,
}

impl Mark {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => Mark::Circular,
            1 => Mark::TimedOut,
            _ => Mark::Clear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Evaluate,
    /// Do not evaluate; blank the cell and mark the node.
    Skip(Mark),
    /// Depends on an unresolvable reference; store `#REF!`.
    Poisoned,
}

#[derive(Debug)]
pub enum Outcome {
    Value(CellValue),
    Failed(EvalFailure),
    TimedOut,
}

type EvalResult = Result<CellValue, EvalFailure>;

/// A dedicated evaluation thread owned by one scheduler worker.
///
/// The worker hands requests over a channel and waits for the reply with a
/// deadline. A runner whose evaluation overran is abandoned: the thread
/// keeps running the stale evaluation, its reply goes nowhere, and the next
/// request spawns a fresh runner.
pub struct EvalRunner {
    evaluator: Arc<dyn FormulaEvaluator>,
    view: CacheView,
    live: Option<RunnerThread>,
}

struct RunnerThread {
    jobs: Sender<EvalRequest>,
    results: Receiver<EvalResult>,
}

impl EvalRunner {
    pub fn new(evaluator: Arc<dyn FormulaEvaluator>, view: CacheView) -> Self {
        Self {
            evaluator,
            view,
            live: None,
        }
    }

    fn evaluate_inline(&self, request: &EvalRequest) -> EvalResult {
        guarded_evaluate(self.evaluator.as_ref(), request, &self.view)
    }

    fn evaluate_bounded(&mut self, request: EvalRequest, limit: Duration) -> Outcome {
        if self.live.is_none() {
            self.live = self.spawn();
        }
        let Some(runner) = self.live.as_ref() else {
            // Could not spawn a thread: evaluate without a deadline.
            return match self.evaluate_inline(&request) {
                Ok(v) => Outcome::Value(v),
                Err(e) => Outcome::Failed(e),
            };
        };

        if let Err(returned) = runner.jobs.send(request) {
            self.live = None;
            return match self.evaluate_inline(&returned.0) {
                Ok(v) => Outcome::Value(v),
                Err(e) => Outcome::Failed(e),
            };
        }

        match runner.results.recv_timeout(limit) {
            Ok(Ok(v)) => Outcome::Value(v),
            Ok(Err(e)) => Outcome::Failed(e),
            Err(RecvTimeoutError::Timeout) => {
                self.live = None;
                Outcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.live = None;
                Outcome::Failed(EvalFailure::Panicked(
                    "evaluation thread exited".to_string(),
                ))
            }
        }
    }

    fn spawn(&self) -> Option<RunnerThread> {
        let (job_tx, job_rx) = channel::<EvalRequest>();
        let (res_tx, res_rx) = channel::<EvalResult>();
        let evaluator = self.evaluator.clone();
        let view = self.view.clone();
        let spawned = thread::Builder::new()
            .name("gridcalc-eval".to_string())
            .spawn(move || {
                while let Ok(request) = job_rx.recv() {
                    let result = guarded_evaluate(evaluator.as_ref(), &request, &view);
                    if res_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        match spawned {
            Ok(_) => Some(RunnerThread {
                jobs: job_tx,
                results: res_rx,
            }),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "could not spawn evaluation thread");
                None
            }
        }
    }
}

fn guarded_evaluate(
    evaluator: &dyn FormulaEvaluator,
    request: &EvalRequest,
    view: &CacheView,
) -> EvalResult {
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(request, view))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "evaluator panicked".to_string()
            };
            Err(EvalFailure::Panicked(msg))
        }
    }
}

pub struct Governor {
    marks: Vec<AtomicU8>,
    timed_out_columns: DashMap<(SheetId, u32), (), BuildHasherDefault<FxHasher>>,
    scope: TimeoutScope,
    timeout: Option<Duration>,
    slow_threshold: Duration,
    slow_keep: usize,
    slow: Mutex<Vec<(CellId, Duration)>>,
}

impl Governor {
    pub fn new(node_count: usize, config: &EvalConfig) -> Self {
        Self {
            marks: (0..node_count).map(|_| AtomicU8::new(0)).collect(),
            timed_out_columns: DashMap::default(),
            scope: config.timeout_scope,
            timeout: config.eval_timeout,
            slow_threshold: config.slow_formula_threshold,
            slow_keep: config.slow_formula_keep,
            slow: Mutex::new(Vec::new()),
        }
    }

    pub fn mark_of(&self, id: NodeId) -> Mark {
        self.marks
            .get(id.as_index())
            .map(|m| Mark::from_u8(m.load(Ordering::Acquire)))
            .unwrap_or(Mark::Clear)
    }

    /// Raise the mark of `id`, and of every range node standing for it.
    pub fn mark(&self, graph: &DependencyGraph, id: NodeId, mark: Mark) {
        self.raise(id, mark);
        for &dep in &graph.node(id).dependents {
            if graph.node(dep).is_range() {
                self.raise(dep, mark);
            }
        }
    }

    fn raise(&self, id: NodeId, mark: Mark) {
        if let Some(slot) = self.marks.get(id.as_index()) {
            slot.fetch_max(mark as u8, Ordering::AcqRel);
        }
    }

    /// Poison a whole column after a timeout, when the scope asks for it.
    pub fn mark_column(&self, cell: CellId) {
        if self.scope == TimeoutScope::Column {
            self.timed_out_columns.insert((cell.sheet, cell.addr.col), ());
        }
    }

    pub fn column_timed_out(&self, sheet: SheetId, col: u32) -> bool {
        self.timed_out_columns.contains_key(&(sheet, col))
    }

    /// Decide whether `id` may be evaluated.
    pub fn check(&self, graph: &DependencyGraph, id: NodeId) -> Verdict {
        let node = graph.node(id);
        let NodeKind::Formula(formula) = &node.kind else {
            return Verdict::Evaluate;
        };
        if formula.self_reference {
            return Verdict::Skip(Mark::Circular);
        }

        let mut worst = self.mark_of(id);
        let mut poisoned = false;
        for &dep in &node.dependencies {
            if dep == POISONED {
                poisoned = true;
                continue;
            }
            worst = worst.max(self.mark_of(dep));
            if self.scope == TimeoutScope::Column && self.dependency_column_timed_out(graph, dep)
            {
                worst = worst.max(Mark::TimedOut);
            }
        }
        if self.scope == TimeoutScope::Column
            && self.column_timed_out(formula.cell.sheet, formula.cell.addr.col)
        {
            worst = worst.max(Mark::TimedOut);
        }

        if worst != Mark::Clear {
            Verdict::Skip(worst)
        } else if poisoned {
            Verdict::Poisoned
        } else {
            Verdict::Evaluate
        }
    }

    fn dependency_column_timed_out(&self, graph: &DependencyGraph, dep: NodeId) -> bool {
        if self.timed_out_columns.is_empty() {
            return false;
        }
        match &graph.node(dep).kind {
            NodeKind::Formula(f) => self.column_timed_out(f.cell.sheet, f.cell.addr.col),
            NodeKind::Range { sheet, area } => {
                (area.start_col..=area.end_col).any(|c| self.column_timed_out(*sheet, c))
            }
            NodeKind::Poisoned => false,
        }
    }

    /// Evaluate one request on the worker's runner, enforcing the deadline.
    pub fn evaluate(&self, runner: &mut EvalRunner, cell: CellId, request: EvalRequest) -> Outcome {
        let started = Instant::now();
        let outcome = match self.timeout {
            Some(limit) => runner.evaluate_bounded(request, limit),
            None => match runner.evaluate_inline(&request) {
                Ok(v) => Outcome::Value(v),
                Err(e) => Outcome::Failed(e),
            },
        };
        let elapsed = started.elapsed();
        if elapsed >= self.slow_threshold && !matches!(outcome, Outcome::TimedOut) {
            self.record_slow(cell, elapsed);
        }
        outcome
    }

    fn record_slow(&self, cell: CellId, elapsed: Duration) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            sheet = cell.sheet,
            row = cell.addr.row,
            col = cell.addr.col,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow formula"
        );
        if self.slow_keep == 0 {
            return;
        }
        let mut slow = self.slow.lock();
        slow.push((cell, elapsed));
        if slow.len() > self.slow_keep * 2 {
            slow.sort_by(|a, b| b.1.cmp(&a.1));
            slow.truncate(self.slow_keep);
        }
    }

    /// The slowest recorded evaluations, slowest first.
    pub fn slow_formulas(&self, registry: &SheetRegistry) -> Vec<SlowFormula> {
        let mut slow = self.slow.lock().clone();
        slow.sort_by(|a, b| b.1.cmp(&a.1));
        slow.truncate(self.slow_keep);
        slow.into_iter()
            .map(|(cell, elapsed)| SlowFormula {
                cell: QualifiedCell::new(registry.name(cell.sheet), cell.addr),
                elapsed,
            })
            .collect()
    }
}
