use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use gridcalc_common::{CellAddr, RangeArea, SheetId};

use super::pattern::PatternTemplate;

/// Engine-internal node identity; an index into the graph's node arena.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The sentinel every unresolvable reference depends on. Always node 0.
pub const POISONED: NodeId = NodeId(0);

/// A cell identity with an interned sheet.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellId {
    pub sheet: SheetId,
    pub addr: CellAddr,
}

impl CellId {
    pub fn new(sheet: SheetId, addr: CellAddr) -> Self {
        Self { sheet, addr }
    }
}

#[derive(Debug, Clone)]
pub struct FormulaNode {
    pub cell: CellId,
    pub formula: Arc<str>,
    /// Some reference of the formula covers its own cell.
    pub self_reference: bool,
    /// At least one reference could not be resolved.
    pub unresolved: bool,
    /// Aggregate shape the pattern optimizer can batch.
    pub template: Option<Arc<PatternTemplate>>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Poisoned,
    Formula(FormulaNode),
    /// Stands for every formula cell a large range overlaps. Its
    /// dependencies are those cells; never evaluated.
    Range { sheet: SheetId, area: RangeArea },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Deduplicated, sorted.
    pub dependencies: SmallVec<[NodeId; 4]>,
    pub dependents: Vec<NodeId>,
    /// `None` until assigned, and for nodes on or behind a cycle.
    pub level: Option<u32>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            dependencies: SmallVec::new(),
            dependents: Vec::new(),
            level: None,
        }
    }

    pub fn as_formula(&self) -> Option<&FormulaNode> {
        match &self.kind {
            NodeKind::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn as_formula_mut(&mut self) -> Option<&mut FormulaNode> {
        match &mut self.kind {
            NodeKind::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.kind, NodeKind::Formula(_))
    }

    pub fn is_range(&self) -> bool {
        matches!(self.kind, NodeKind::Range { .. })
    }

    /// Formula and range nodes take part in leveling and scheduling.
    pub fn is_schedulable(&self) -> bool {
        !matches!(self.kind, NodeKind::Poisoned)
    }

    pub fn cell(&self) -> Option<CellId> {
        self.as_formula().map(|f| f.cell)
    }
}
