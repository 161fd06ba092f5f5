use std::sync::Arc;

use rayon::ThreadPool;
use rayon::prelude::*;
use smallvec::SmallVec;

use gridcalc_common::WorkbookSource;
use gridcalc_parse::{ExtractedRef, extract_references};

use super::graph::DependencyGraph;
use super::node::{CellId, FormulaNode, NodeId, POISONED};
use super::pattern::{PatternTemplate, detect_template};
use super::sheet_registry::SheetRegistry;
use super::EvalConfig;
use crate::error::RecalcError;

/// Per-formula results of the parallel analysis phase.
struct Analysis {
    id: NodeId,
    refs: Vec<ExtractedRef>,
    template: Option<PatternTemplate>,
}

/// Builds a [`DependencyGraph`] from every formula cell of a workbook.
pub struct GraphBuilder<'c> {
    config: &'c EvalConfig,
}

impl<'c> GraphBuilder<'c> {
    pub fn new(config: &'c EvalConfig) -> Self {
        Self { config }
    }

    /// Full build. Sheets are interned into `registry` first so that
    /// cross-sheet references resolve regardless of sheet order.
    pub fn build(
        &self,
        source: &dyn WorkbookSource,
        registry: &mut SheetRegistry,
        pool: Option<&ThreadPool>,
    ) -> Result<DependencyGraph, RecalcError> {
        let sheets = source.sheet_names();
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("graph_build", sheets = sheets.len()).entered();

        for name in &sheets {
            registry.id_for(name);
        }

        let mut graph = DependencyGraph::new();
        for name in &sheets {
            let sheet = registry.id_for(name);
            for cell in source.formula_cells(name)? {
                let id = CellId::new(sheet, cell.addr);
                if graph.is_formula_cell(id) {
                    continue;
                }
                graph.add_formula(FormulaNode {
                    cell: id,
                    formula: Arc::from(cell.formula),
                    self_reference: false,
                    unresolved: false,
                    template: None,
                });
            }
        }
        graph.seal_columns();

        let registry: &SheetRegistry = registry;
        let analyses = self.analyze(&graph, registry, pool);
        for analysis in analyses {
            self.resolve(&mut graph, registry, analysis);
        }
        graph.link_dependents();

        #[cfg(feature = "tracing")]
        tracing::info!(
            formulas = graph.formula_count(),
            range_nodes = graph.range_node_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    fn analyze(
        &self,
        graph: &DependencyGraph,
        registry: &SheetRegistry,
        pool: Option<&ThreadPool>,
    ) -> Vec<Analysis> {
        let ids: Vec<NodeId> = graph.formula_ids().collect();
        let detect = self.config.pattern.enabled;
        let analyze_one = |&id: &NodeId| {
            let formula = graph.node(id).as_formula();
            let (refs, template) = match formula {
                Some(f) => (
                    extract_references(&f.formula),
                    if detect {
                        detect_template(&f.formula, f.cell.sheet, registry)
                    } else {
                        None
                    },
                ),
                None => (Vec::new(), None),
            };
            Analysis { id, refs, template }
        };
        match pool {
            Some(pool) => pool.install(|| ids.par_iter().map(analyze_one).collect()),
            None => ids.iter().map(analyze_one).collect(),
        }
    }

    fn resolve(&self, graph: &mut DependencyGraph, registry: &SheetRegistry, analysis: Analysis) {
        let Analysis { id, refs, template } = analysis;
        let Some(own) = graph.node(id).cell() else {
            return;
        };

        let mut deps: SmallVec<[NodeId; 4]> = SmallVec::new();
        let mut self_reference = false;
        let mut unresolved = false;

        for r in refs {
            let parsed = match r {
                ExtractedRef::Reference(p) => p,
                ExtractedRef::Unresolved(_text) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(reference = %_text, "unresolved reference");
                    deps.push(POISONED);
                    unresolved = true;
                    continue;
                }
            };
            let sheet = match &parsed.sheet {
                None => Some(own.sheet),
                Some(name) => registry.get_id(name),
            };
            let Some(sheet) = sheet else {
                deps.push(POISONED);
                unresolved = true;
                continue;
            };

            let area = parsed.area();
            let covers_self = sheet == own.sheet && area.contains(own.addr);
            self_reference |= covers_self;

            if let Some(addr) = parsed.cell() {
                let cell = CellId::new(sheet, addr);
                graph.record_cell_read(cell, id);
                if let Some(dep) = graph.node_for_cell(cell)
                    && dep != id
                {
                    deps.push(dep);
                }
                continue;
            }

            graph.record_range_read(sheet, area, id);
            let members = graph.formulas_in(sheet, &area);
            if members.len() <= self.config.range_node_threshold {
                deps.extend(members.into_iter().filter(|m| *m != id));
            } else {
                let range = match graph.range_node(sheet, area) {
                    Some(existing) => existing,
                    None => graph.add_range_node(sheet, area, members),
                };
                deps.push(range);
            }
        }

        graph.set_dependencies(id, deps);
        if let Some(formula) = graph.node_mut(id).as_formula_mut() {
            formula.self_reference = self_reference;
            formula.unresolved = unresolved;
            formula.template = template.map(Arc::new);
        }
    }
}
