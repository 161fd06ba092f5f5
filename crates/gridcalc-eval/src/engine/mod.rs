//! Incremental recalculation engine
//!
//! Builds a dependency graph over formula cells, levels it, and evaluates
//! dirty formulas in dependency order on a worker pool, with batched
//! aggregates, multi-tier caching and failure containment.

pub mod builder;
pub mod cache;
pub mod dag;
pub mod eval;
pub mod governor;
pub mod graph;
pub mod levels;
pub mod metrics;
pub mod node;
pub mod pattern;
pub mod sheet_registry;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

pub use builder::GraphBuilder;
pub use cache::{CacheStats, CacheSubsystem, CacheView, RangeLru, SheetSnapshot};
pub use dag::{DagRun, DagScheduler};
pub use eval::{Engine, PassReport};
pub use governor::{Mark, Verdict};
pub use graph::DependencyGraph;
pub use levels::{ExecutionBatch, LevelPlan, assign_levels, merge_levels};
pub use metrics::{PassStats, SlowFormula};
pub use node::{CellId, FormulaNode, Node, NodeId, NodeKind, POISONED};
pub use pattern::{PatternConfig, PatternOptimizer, PatternOutcome, PatternTemplate};
pub use sheet_registry::SheetRegistry;

use gridcalc_common::{EmptyTextPolicy, FormulaEvaluator, ValueSink, WorkbookSource};

/// What a timeout poisons besides the formula that overran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutScope {
    /// Only the node; its dependents are skipped.
    Node,
    /// The node's whole column: every formula in it, and every formula
    /// reading it, is skipped for the rest of the pass.
    #[default]
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Batch by batch, pattern optimizer before each batch.
    #[default]
    Leveled,
    /// One scheduler run over every acyclic node. Only groups whose members
    /// read nothing but data cells are batched.
    WholeGraph,
}

/// Configuration for the evaluation engine
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub enable_parallel: bool,
    pub max_threads: Option<usize>,

    /// Longest a single formula may run. `None` waits forever.
    pub eval_timeout: Option<Duration>,
    pub timeout_scope: TimeoutScope,
    pub execution_mode: ExecutionMode,
    /// Fold consecutive levels into one scheduler run where possible.
    pub merge_levels: bool,
    pub pattern: PatternConfig,

    /// Resident materialized ranges.
    pub range_cache_capacity: usize,
    /// Ranges overlapping more formula cells than this get a shared range
    /// node instead of per-cell edges.
    pub range_node_threshold: usize,
    /// Affected share of all formulas above which an update batch runs a
    /// full pass instead of a subgraph pass.
    pub incremental_full_threshold: f64,

    pub slow_formula_threshold: Duration,
    pub slow_formula_keep: usize,

    pub empty_text_policy: EmptyTextPolicy,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_threads: None,
            eval_timeout: Some(Duration::from_secs(5)),
            timeout_scope: TimeoutScope::Column,
            execution_mode: ExecutionMode::Leveled,
            merge_levels: true,
            pattern: PatternConfig::default(),
            range_cache_capacity: 1024,
            range_node_threshold: 16,
            incremental_full_threshold: 0.5,
            slow_formula_threshold: Duration::from_millis(100),
            slow_formula_keep: 20,
            empty_text_policy: EmptyTextPolicy::default(),
        }
    }
}

impl EvalConfig {
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.enable_parallel = enable;
        self
    }

    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.eval_timeout = timeout;
        self
    }

    pub fn with_timeout_scope(mut self, scope: TimeoutScope) -> Self {
        self.timeout_scope = scope;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_merge_levels(mut self, merge: bool) -> Self {
        self.merge_levels = merge;
        self
    }

    pub fn with_pattern(mut self, pattern: PatternConfig) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_range_cache_capacity(mut self, capacity: usize) -> Self {
        self.range_cache_capacity = capacity;
        self
    }

    pub fn with_range_node_threshold(mut self, threshold: usize) -> Self {
        self.range_node_threshold = threshold;
        self
    }

    pub fn with_incremental_full_threshold(mut self, share: f64) -> Self {
        self.incremental_full_threshold = share;
        self
    }

    pub fn with_slow_formula_threshold(mut self, threshold: Duration) -> Self {
        self.slow_formula_threshold = threshold;
        self
    }

    pub fn with_empty_text_policy(mut self, policy: EmptyTextPolicy) -> Self {
        self.empty_text_policy = policy;
        self
    }
}

/// Construct a new engine with the given collaborators and configuration
pub fn new_engine(
    source: Arc<dyn WorkbookSource>,
    evaluator: Arc<dyn FormulaEvaluator>,
    sink: Arc<dyn ValueSink>,
    config: EvalConfig,
) -> Engine {
    Engine::new(source, evaluator, sink, config)
}
