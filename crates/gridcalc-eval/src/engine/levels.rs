//! Topological leveling, cycle isolation and batch merging.
//!
//! Levels come from iterative dependency-count reduction, so arbitrarily
//! deep chains never recurse. A formula sits one level above its deepest
//! formula dependency; a range node sits at the level of its deepest member,
//! so formulas reading it land strictly above every member. Whatever never
//! reaches a count of zero is on a cycle or downstream of one.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use super::graph::DependencyGraph;
use super::node::{NodeId, NodeKind};

#[derive(Debug, Clone, Default)]
pub struct LevelPlan {
    /// Schedulable nodes (formulas and range nodes) by level.
    pub levels: Vec<Vec<NodeId>>,
    /// Nodes with no resolvable level: cycle members and their dependents.
    pub circular: Vec<NodeId>,
    /// Strongly connected components among `circular`, each a real cycle.
    pub cycles: Vec<Vec<NodeId>>,
}

impl LevelPlan {
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn scheduled_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// One DAG run: consecutive levels executed without a barrier between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionBatch {
    pub first_level: u32,
    pub last_level: u32,
    pub nodes: Vec<NodeId>,
}

/// Assign levels to every schedulable node and record them on the graph.
pub fn assign_levels(graph: &mut DependencyGraph) -> LevelPlan {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("assign_levels", nodes = graph.len()).entered();

    let n = graph.len();
    let mut remaining = vec![0u32; n];
    let mut level: Vec<u32> = vec![0; n];
    let mut queue = VecDeque::new();

    for id in graph.node_ids() {
        let node = graph.node(id);
        if !node.is_schedulable() {
            continue;
        }
        let count = node
            .dependencies
            .iter()
            .filter(|d| graph.node(**d).is_schedulable())
            .count() as u32;
        remaining[id.as_index()] = count;
        if count == 0 {
            queue.push_back(id);
        }
    }

    let mut resolved = vec![false; n];
    while let Some(id) = queue.pop_front() {
        resolved[id.as_index()] = true;
        let lvl = level[id.as_index()];
        for &dep in &graph.node(id).dependents {
            let d = dep.as_index();
            let candidate = match graph.node(dep).kind {
                NodeKind::Formula(_) => lvl + 1,
                _ => lvl,
            };
            level[d] = level[d].max(candidate);
            remaining[d] -= 1;
            if remaining[d] == 0 {
                queue.push_back(dep);
            }
        }
    }

    let mut plan = LevelPlan::default();
    for i in 0..n {
        let id = NodeId::new(i as u32);
        if !graph.node(id).is_schedulable() {
            continue;
        }
        if resolved[i] {
            let lvl = level[i] as usize;
            if plan.levels.len() <= lvl {
                plan.levels.resize_with(lvl + 1, Vec::new);
            }
            plan.levels[lvl].push(id);
            graph.node_mut(id).level = Some(level[i]);
        } else {
            plan.circular.push(id);
            graph.node_mut(id).level = None;
        }
    }

    if !plan.circular.is_empty() {
        plan.cycles = find_cycles(graph, &plan.circular);
        #[cfg(feature = "tracing")]
        tracing::warn!(
            circular = plan.circular.len(),
            cycles = plan.cycles.len(),
            "circular references detected"
        );
    }

    graph.set_levels(plan.levels.clone());
    plan
}

/// Strongly connected components of the subgraph induced by `members` that
/// form actual cycles (more than one node, or a node depending on itself).
/// Iterative Tarjan.
fn find_cycles(graph: &DependencyGraph, members: &[NodeId]) -> Vec<Vec<NodeId>> {
    let in_set: FxHashSet<NodeId> = members.iter().copied().collect();
    let mut index: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut lowlink: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut on_stack: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack: Vec<NodeId> = Vec::new();
    let mut next_index = 0usize;
    let mut cycles = Vec::new();

    for &root in members {
        if index.contains_key(&root) {
            continue;
        }
        // (node, position in its dependency list)
        let mut work: Vec<(NodeId, usize)> = vec![(root, 0)];
        index.insert(root, next_index);
        lowlink.insert(root, next_index);
        next_index += 1;
        stack.push(root);
        on_stack.insert(root);

        while let Some(top) = work.last_mut() {
            let v = top.0;
            let deps = &graph.node(v).dependencies;
            if top.1 < deps.len() {
                let w = deps[top.1];
                top.1 += 1;
                if !in_set.contains(&w) {
                    continue;
                }
                if !index.contains_key(&w) {
                    index.insert(w, next_index);
                    lowlink.insert(w, next_index);
                    next_index += 1;
                    stack.push(w);
                    on_stack.insert(w);
                    work.push((w, 0));
                } else if on_stack.contains(&w) {
                    let low = lowlink[&v].min(index[&w]);
                    lowlink.insert(v, low);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                let low = lowlink[&parent].min(lowlink[&v]);
                lowlink.insert(parent, low);
            }
            if lowlink[&v] == index[&v] {
                let mut scc = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack.remove(&w);
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                let is_cycle = scc.len() > 1 || graph.node(v).dependencies.contains(&v);
                if is_cycle {
                    scc.sort_unstable();
                    cycles.push(scc);
                }
            }
        }
    }
    cycles
}

/// Fold consecutive levels into execution batches.
///
/// Level `k+1` joins the current batch unless one of its pattern-optimizer
/// candidates depends on a node already in the batch: the optimizer
/// resolves candidates before a batch starts, so their inputs must be
/// final by then. Every other ordering constraint inside a batch is
/// enforced by the scheduler's dependency counts. With `merge` off every
/// level is its own batch.
pub fn merge_levels(graph: &DependencyGraph, plan: &LevelPlan, merge: bool) -> Vec<ExecutionBatch> {
    let mut batches: Vec<ExecutionBatch> = Vec::new();
    let mut in_batch: FxHashSet<NodeId> = FxHashSet::default();

    for (k, nodes) in plan.levels.iter().enumerate() {
        let k = k as u32;
        let joins = merge
            && !batches.is_empty()
            && !nodes
                .iter()
                .any(|&id| is_candidate(graph, id) && depends_on_any(graph, id, &in_batch));

        if joins {
            if let Some(batch) = batches.last_mut() {
                batch.last_level = k;
                batch.nodes.extend_from_slice(nodes);
            }
        } else {
            in_batch.clear();
            batches.push(ExecutionBatch {
                first_level: k,
                last_level: k,
                nodes: nodes.clone(),
            });
        }
        in_batch.extend(nodes.iter().copied());
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        levels = plan.levels.len(),
        batches = batches.len(),
        "levels merged"
    );
    batches
}

fn is_candidate(graph: &DependencyGraph, id: NodeId) -> bool {
    graph
        .node(id)
        .as_formula()
        .is_some_and(|f| f.template.is_some())
}

/// Direct dependencies, looking through range nodes to their members.
fn depends_on_any(graph: &DependencyGraph, id: NodeId, set: &FxHashSet<NodeId>) -> bool {
    graph.node(id).dependencies.iter().any(|dep| {
        set.contains(dep)
            || (graph.node(*dep).is_range()
                && graph.node(*dep).dependencies.iter().any(|m| set.contains(m)))
    })
}
