//! The dependency graph: a node arena of formula cells, shared range nodes
//! and the poisoned sentinel, plus reverse indexes from input cells to the
//! formulas that read them.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use gridcalc_common::{CellAddr, RangeArea, SheetId};

use super::node::{CellId, FormulaNode, Node, NodeId, NodeKind, POISONED};

/// Range reads spanning more columns than this are kept in one unbucketed
/// list instead of per-column buckets.
const NARROW_READ_COLS: u32 = 64;

#[derive(Debug, Clone)]
struct RangeRead {
    sheet: SheetId,
    area: RangeArea,
    reader: NodeId,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    by_cell: FxHashMap<CellId, NodeId>,
    range_nodes: FxHashMap<(SheetId, RangeArea), NodeId>,
    /// Formula rows per sheet and column, sorted by row.
    formula_columns: FxHashMap<SheetId, BTreeMap<u32, Vec<(u32, NodeId)>>>,

    // Reverse read indexes, used to find what an input change affects.
    cell_readers: FxHashMap<CellId, SmallVec<[NodeId; 2]>>,
    range_reads: Vec<RangeRead>,
    narrow_reads: FxHashMap<(SheetId, u32), Vec<u32>>,
    wide_reads: Vec<u32>,

    levels: Vec<Vec<NodeId>>,
    leveled: bool,
    formula_count: usize,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Poisoned)],
            by_cell: FxHashMap::default(),
            range_nodes: FxHashMap::default(),
            formula_columns: FxHashMap::default(),
            cell_readers: FxHashMap::default(),
            range_reads: Vec::new(),
            narrow_reads: FxHashMap::default(),
            wide_reads: Vec::new(),
            levels: Vec::new(),
            leveled: false,
            formula_count: 0,
        }
    }

    /* ─────────────── queries ─────────────── */

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.as_index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_index())
    }

    /// Number of nodes, including the sentinel and range nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formula_count == 0
    }

    pub fn formula_count(&self) -> usize {
        self.formula_count
    }

    pub fn range_node_count(&self) -> usize {
        self.range_nodes.len()
    }

    pub fn node_for_cell(&self, cell: CellId) -> Option<NodeId> {
        self.by_cell.get(&cell).copied()
    }

    pub fn is_formula_cell(&self, cell: CellId) -> bool {
        self.by_cell.contains_key(&cell)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| NodeId::new(i as u32))
    }

    pub fn formula_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids().filter(|&id| self.node(id).is_formula())
    }

    /// Addresses of every formula cell on `sheet`.
    pub fn formula_cells_on(&self, sheet: SheetId) -> impl Iterator<Item = CellAddr> + '_ {
        self.formula_columns
            .get(&sheet)
            .into_iter()
            .flat_map(|cols| {
                cols.iter()
                    .flat_map(|(&col, rows)| rows.iter().map(move |&(row, _)| CellAddr::new(row, col)))
            })
    }

    /// Formula nodes whose cell lies inside `area` on `sheet`.
    pub fn formulas_in(&self, sheet: SheetId, area: &RangeArea) -> Vec<NodeId> {
        let Some(cols) = self.formula_columns.get(&sheet) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (_, rows) in cols.range(area.start_col..=area.end_col) {
            let lo = rows.partition_point(|&(r, _)| r < area.start_row);
            let hi = rows.partition_point(|&(r, _)| r <= area.end_row);
            out.extend(rows[lo..hi].iter().map(|&(_, id)| id));
        }
        out
    }

    /// Nodes grouped by assigned level; empty until levels are assigned.
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn is_leveled(&self) -> bool {
        self.leveled
    }

    /* ─────────────── construction ─────────────── */

    pub(crate) fn add_formula(&mut self, formula: FormulaNode) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        let cell = formula.cell;
        self.by_cell.insert(cell, id);
        self.formula_columns
            .entry(cell.sheet)
            .or_default()
            .entry(cell.addr.col)
            .or_default()
            .push((cell.addr.row, id));
        self.nodes.push(Node::new(NodeKind::Formula(formula)));
        self.formula_count += 1;
        id
    }

    /// Sort per-column formula rows; call once after every formula is added.
    pub(crate) fn seal_columns(&mut self) {
        for cols in self.formula_columns.values_mut() {
            for rows in cols.values_mut() {
                rows.sort_unstable();
            }
        }
    }

    pub(crate) fn range_node(&self, sheet: SheetId, area: RangeArea) -> Option<NodeId> {
        self.range_nodes.get(&(sheet, area)).copied()
    }

    pub(crate) fn add_range_node(
        &mut self,
        sheet: SheetId,
        area: RangeArea,
        members: Vec<NodeId>,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        let mut node = Node::new(NodeKind::Range { sheet, area });
        node.dependencies = members.into_iter().collect();
        node.dependencies.sort_unstable();
        node.dependencies.dedup();
        self.nodes.push(node);
        self.range_nodes.insert((sheet, area), id);
        id
    }

    pub(crate) fn set_dependencies(&mut self, id: NodeId, mut deps: SmallVec<[NodeId; 4]>) {
        deps.sort_unstable();
        deps.dedup();
        self.nodes[id.as_index()].dependencies = deps;
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.as_index()]
    }

    pub(crate) fn record_cell_read(&mut self, cell: CellId, reader: NodeId) {
        let readers = self.cell_readers.entry(cell).or_default();
        if !readers.contains(&reader) {
            readers.push(reader);
        }
    }

    pub(crate) fn record_range_read(&mut self, sheet: SheetId, area: RangeArea, reader: NodeId) {
        let idx = self.range_reads.len() as u32;
        self.range_reads.push(RangeRead { sheet, area, reader });
        if area.width() <= NARROW_READ_COLS {
            for col in area.start_col..=area.end_col {
                self.narrow_reads.entry((sheet, col)).or_default().push(idx);
            }
        } else {
            self.wide_reads.push(idx);
        }
    }

    /// Rebuild every dependents list from the dependency lists.
    pub(crate) fn link_dependents(&mut self) {
        for node in &mut self.nodes {
            node.dependents.clear();
        }
        for i in 0..self.nodes.len() {
            let deps = self.nodes[i].dependencies.clone();
            for dep in deps {
                self.nodes[dep.as_index()]
                    .dependents
                    .push(NodeId::new(i as u32));
            }
        }
    }

    pub(crate) fn set_levels(&mut self, levels: Vec<Vec<NodeId>>) {
        self.levels = levels;
        self.leveled = true;
    }

    /* ─────────────── incremental closure ─────────────── */

    /// Every node downstream of the given input cells: the formulas reading
    /// them directly or through a range, and everything that depends on
    /// those, transitively. Range nodes on the way are included.
    pub fn affected_by_cells(&self, cells: &[CellId]) -> FxHashSet<NodeId> {
        let mut seeds = Vec::new();
        for cell in cells {
            if let Some(readers) = self.cell_readers.get(cell) {
                seeds.extend(readers.iter().copied());
            }
            if let Some(reads) = self.narrow_reads.get(&(cell.sheet, cell.addr.col)) {
                seeds.extend(self.readers_covering(reads, *cell));
            }
            seeds.extend(self.readers_covering(&self.wide_reads, *cell));
        }
        self.closure(seeds)
    }

    /// Every node downstream of whole columns of `sheet`, including formulas
    /// that live in those columns.
    pub fn affected_by_columns(&self, sheet: SheetId, cols: &[u32]) -> FxHashSet<NodeId> {
        let cols: FxHashSet<u32> = cols.iter().copied().collect();
        let mut seeds = Vec::new();

        for (cell, readers) in &self.cell_readers {
            if cell.sheet == sheet && cols.contains(&cell.addr.col) {
                seeds.extend(readers.iter().copied());
            }
        }
        for &col in &cols {
            if let Some(reads) = self.narrow_reads.get(&(sheet, col)) {
                seeds.extend(reads.iter().map(|&i| self.range_reads[i as usize].reader));
            }
            if let Some(rows) = self.formula_columns.get(&sheet).and_then(|c| c.get(&col)) {
                seeds.extend(rows.iter().map(|&(_, id)| id));
            }
        }
        for &i in &self.wide_reads {
            let read = &self.range_reads[i as usize];
            let hit = read.sheet == sheet
                && cols
                    .iter()
                    .any(|&c| c >= read.area.start_col && c <= read.area.end_col);
            if hit {
                seeds.push(read.reader);
            }
        }
        self.closure(seeds)
    }

    fn readers_covering<'a>(
        &'a self,
        reads: &'a [u32],
        cell: CellId,
    ) -> impl Iterator<Item = NodeId> + 'a {
        reads.iter().filter_map(move |&i| {
            let read = &self.range_reads[i as usize];
            (read.sheet == cell.sheet && read.area.contains(cell.addr)).then_some(read.reader)
        })
    }

    fn closure(&self, seeds: Vec<NodeId>) -> FxHashSet<NodeId> {
        let mut seen = FxHashSet::default();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for s in seeds {
            if seen.insert(s) {
                queue.push_back(s);
            }
        }
        while let Some(id) = queue.pop_front() {
            for &d in &self.node(id).dependents {
                if seen.insert(d) {
                    queue.push_back(d);
                }
            }
        }
        seen
    }

    /* ─────────────── subgraphs ─────────────── */

    /// Grow `keep` with the upstream formulas whose cell is `stale`, and the
    /// range nodes they are read through, repeating from every addition.
    pub fn pull_upstream(&self, keep: &mut FxHashSet<NodeId>, stale: impl Fn(CellId) -> bool) {
        let mut stack: Vec<NodeId> = keep.iter().copied().collect();
        while let Some(id) = stack.pop() {
            for &dep in &self.node(id).dependencies {
                if dep == POISONED || keep.contains(&dep) {
                    continue;
                }
                let node = self.node(dep);
                let pull = match &node.kind {
                    NodeKind::Formula(f) => stale(f.cell),
                    NodeKind::Range { .. } => node
                        .dependencies
                        .iter()
                        .any(|&d| self.node(d).cell().is_some_and(&stale)),
                    NodeKind::Poisoned => false,
                };
                if pull {
                    keep.insert(dep);
                    stack.push(dep);
                }
            }
        }
    }


    /// The subgraph made of `keep`. Dependencies outside the set are treated
    /// as already computed and dropped, except dependencies on the poisoned
    /// sentinel and, once levels are assigned, on nodes without a level:
    /// those are pulled in so cycles stay detectable in the subgraph.
    pub fn filter(&self, keep: &FxHashSet<NodeId>) -> DependencyGraph {
        let mut included: FxHashSet<NodeId> = keep
            .iter()
            .copied()
            .filter(|&id| id != POISONED && self.get(id).is_some())
            .collect();

        if self.leveled {
            let mut stack: Vec<NodeId> = included.iter().copied().collect();
            while let Some(id) = stack.pop() {
                for &dep in &self.node(id).dependencies {
                    if dep == POISONED || included.contains(&dep) {
                        continue;
                    }
                    if self.node(dep).level.is_none() {
                        included.insert(dep);
                        stack.push(dep);
                    }
                }
            }
        }

        let mut order: Vec<NodeId> = included.into_iter().collect();
        order.sort_unstable();

        let mut remap: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        remap.insert(POISONED, POISONED);
        let mut sub = DependencyGraph::new();
        for &old in &order {
            let new_id = match &self.node(old).kind {
                NodeKind::Formula(f) => sub.add_formula(f.clone()),
                NodeKind::Range { sheet, area } => sub.add_range_node(*sheet, *area, Vec::new()),
                NodeKind::Poisoned => continue,
            };
            remap.insert(old, new_id);
        }
        for &old in &order {
            let Some(&new_id) = remap.get(&old) else {
                continue;
            };
            let deps: SmallVec<[NodeId; 4]> = self
                .node(old)
                .dependencies
                .iter()
                .filter_map(|d| remap.get(d).copied())
                .collect();
            sub.set_dependencies(new_id, deps);
        }
        sub.seal_columns();
        sub.link_dependents();
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(sheet: SheetId, row: u32, col: u32, text: &str) -> FormulaNode {
        FormulaNode {
            cell: CellId::new(sheet, CellAddr::new(row, col)),
            formula: text.into(),
            self_reference: false,
            unresolved: false,
            template: None,
        }
    }

    #[test]
    fn formulas_in_uses_column_and_row_bounds() {
        let mut g = DependencyGraph::new();
        let a = g.add_formula(formula(0, 5, 2, "=1"));
        let b = g.add_formula(formula(0, 2, 2, "=2"));
        let _c = g.add_formula(formula(0, 2, 4, "=3"));
        let d = g.add_formula(formula(1, 3, 2, "=4"));
        g.seal_columns();

        let hits = g.formulas_in(0, &RangeArea::new(1, 1, 10, 3));
        assert_eq!(hits, vec![b, a]);
        assert_eq!(g.formulas_in(1, &RangeArea::whole_columns(2, 2)), vec![d]);
        assert!(g.formulas_in(0, &RangeArea::new(6, 1, 9, 9)).is_empty());
    }

    #[test]
    fn closure_follows_cell_and_range_readers() {
        let mut g = DependencyGraph::new();
        let b1 = g.add_formula(formula(0, 1, 2, "=A1*2"));
        let b2 = g.add_formula(formula(0, 2, 2, "=B1+1"));
        let c1 = g.add_formula(formula(0, 1, 3, "=SUM(A:A)"));
        let d1 = g.add_formula(formula(0, 1, 4, "=E1"));
        g.seal_columns();
        g.record_cell_read(CellId::new(0, CellAddr::new(1, 1)), b1);
        g.record_cell_read(CellId::new(0, CellAddr::new(1, 2)), b2);
        g.record_range_read(0, RangeArea::whole_columns(1, 1), c1);
        g.record_cell_read(CellId::new(0, CellAddr::new(1, 5)), d1);
        g.set_dependencies(b2, SmallVec::from_slice(&[b1]));
        g.link_dependents();

        let hit = g.affected_by_cells(&[CellId::new(0, CellAddr::new(1, 1))]);
        assert!(hit.contains(&b1) && hit.contains(&b2) && hit.contains(&c1));
        assert!(!hit.contains(&d1));

        let hit = g.affected_by_cells(&[CellId::new(0, CellAddr::new(40, 1))]);
        assert_eq!(hit.len(), 1);
        assert!(hit.contains(&c1));

        let hit = g.affected_by_columns(0, &[5]);
        assert_eq!(hit.into_iter().collect::<Vec<_>>(), vec![d1]);
    }

    #[test]
    fn filter_drops_outside_dependencies_and_keeps_poison() {
        let mut g = DependencyGraph::new();
        let a = g.add_formula(formula(0, 1, 1, "=1"));
        let b = g.add_formula(formula(0, 2, 1, "=A1+Missing!A1"));
        g.seal_columns();
        g.set_dependencies(b, SmallVec::from_slice(&[a, POISONED]));
        g.link_dependents();

        let keep: FxHashSet<NodeId> = [b].into_iter().collect();
        let sub = g.filter(&keep);
        assert_eq!(sub.formula_count(), 1);
        let nb = sub
            .node_for_cell(CellId::new(0, CellAddr::new(2, 1)))
            .unwrap();
        assert_eq!(sub.node(nb).dependencies.as_slice(), &[POISONED]);
    }

    #[test]
    fn pull_upstream_reaches_stale_cells_through_ranges() {
        let mut g = DependencyGraph::new();
        let a1 = g.add_formula(formula(0, 1, 1, "=SLEEP(9)"));
        let a2 = g.add_formula(formula(0, 2, 1, "=2"));
        let c1 = g.add_formula(formula(0, 1, 3, "=A2+1"));
        let b1 = g.add_formula(formula(0, 1, 2, "=SUM(A1:A2)+X1"));
        g.seal_columns();
        let range = g.add_range_node(0, RangeArea::new(1, 1, 2, 1), vec![a1, a2]);
        g.set_dependencies(b1, SmallVec::from_slice(&[range]));
        g.set_dependencies(c1, SmallVec::from_slice(&[a2]));
        g.link_dependents();

        let stale = CellId::new(0, CellAddr::new(1, 1));
        let mut keep: FxHashSet<NodeId> = [b1, c1].into_iter().collect();
        g.pull_upstream(&mut keep, |cell| cell == stale);
        assert!(keep.contains(&range) && keep.contains(&a1));
        assert!(!keep.contains(&a2));
        assert_eq!(keep.len(), 4);
    }
}
