//! Dependency-counting scheduler for one execution batch.
//!
//! Every node starts with the number of its dependencies that are still
//! pending inside the batch. Nodes at zero sit on a shared channel; workers
//! block on it, run the node, then decrement the node's dependents under
//! one lock and enqueue the ones that reach zero. The channel closes exactly
//! once, when the completed count reaches the total.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};

use parking_lot::Mutex;
use rayon::ThreadPool;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::graph::DependencyGraph;
use super::node::NodeId;

struct ReadyState {
    remaining: FxHashMap<NodeId, usize>,
    sender: Option<Sender<NodeId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DagRun {
    pub completed: usize,
    pub total: usize,
}

impl DagRun {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

pub struct DagScheduler<'g> {
    graph: &'g DependencyGraph,
    state: Mutex<ReadyState>,
    receiver: Mutex<Receiver<NodeId>>,
    dependents: FxHashMap<NodeId, SmallVec<[NodeId; 4]>>,
    completed: AtomicUsize,
    closed: AtomicBool,
    total: usize,
    initially_ready: usize,
}

impl<'g> DagScheduler<'g> {
    /// Prepare a run over `nodes`. Nodes in `pre_resolved` already have
    /// their value: they are not run and count as satisfied dependencies.
    /// Dependencies outside `nodes` are treated as satisfied too.
    pub fn new(
        graph: &'g DependencyGraph,
        nodes: &[NodeId],
        pre_resolved: &FxHashSet<NodeId>,
    ) -> Self {
        let members: FxHashSet<NodeId> = nodes
            .iter()
            .copied()
            .filter(|id| !pre_resolved.contains(id))
            .collect();

        let (sender, receiver) = channel();
        let mut remaining = FxHashMap::default();
        let mut dependents: FxHashMap<NodeId, SmallVec<[NodeId; 4]>> = FxHashMap::default();
        let mut initially_ready = 0;

        for &id in nodes {
            if !members.contains(&id) || remaining.contains_key(&id) {
                continue;
            }
            let mut count = 0;
            for &dep in &graph.node(id).dependencies {
                if members.contains(&dep) {
                    count += 1;
                    dependents.entry(dep).or_default().push(id);
                }
            }
            remaining.insert(id, count);
            if count == 0 {
                // Receiver is alive; send cannot fail.
                let _ = sender.send(id);
                initially_ready += 1;
            }
        }

        let total = remaining.len();
        let scheduler = Self {
            graph,
            state: Mutex::new(ReadyState {
                remaining,
                sender: Some(sender),
            }),
            receiver: Mutex::new(receiver),
            dependents,
            completed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            total,
            initially_ready,
        };
        if total == 0 {
            scheduler.close();
        }
        scheduler
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Run every node to completion. `make_worker` is called once per
    /// worker and returns that worker's node handler; range nodes never
    /// reach the handler. Without a pool the batch runs on the calling
    /// thread.
    pub fn run<W, F>(&self, pool: Option<&ThreadPool>, make_worker: F) -> DagRun
    where
        F: Fn() -> W + Sync,
        W: FnMut(NodeId),
    {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "dag_batch",
            nodes = self.total,
            ready = self.initially_ready
        )
        .entered();

        if self.total > 0 && self.initially_ready == 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!(nodes = self.total, "batch has no ready nodes");
            self.close();
            return self.outcome();
        }

        match pool {
            Some(pool) if pool.current_num_threads() > 1 => {
                let workers = pool.current_num_threads().min(self.total.max(1));
                pool.scope(|s| {
                    for _ in 0..workers {
                        s.spawn(|_| self.drain_blocking(make_worker()));
                    }
                });
            }
            _ => self.drain_inline(make_worker()),
        }
        self.outcome()
    }

    fn drain_blocking<W: FnMut(NodeId)>(&self, mut work: W) {
        loop {
            // The guard is a temporary: released before the node runs.
            let next = self.receiver.lock().recv();
            match next {
                Ok(id) => {
                    self.execute(id, &mut work);
                }
                Err(_) => break,
            }
        }
    }

    /// Single-threaded drain; every enqueue happens on this thread, so an
    /// empty queue means the batch is finished (or stalled).
    fn drain_inline<W: FnMut(NodeId)>(&self, mut work: W) {
        loop {
            let next = self.receiver.lock().try_recv();
            match next {
                Ok(id) => self.execute(id, &mut work),
                Err(_) => break,
            }
        }
    }

    fn execute<W: FnMut(NodeId)>(&self, id: NodeId, work: &mut W) {
        if !self.graph.node(id).is_range() {
            work(id);
        }
        self.complete(id);
    }

    fn complete(&self, id: NodeId) {
        if let Some(deps) = self.dependents.get(&id) {
            let mut state = self.state.lock();
            let ReadyState { remaining, sender } = &mut *state;
            for &dep in deps {
                let Some(count) = remaining.get_mut(&dep) else {
                    continue;
                };
                match count.checked_sub(1) {
                    Some(next) => {
                        *count = next;
                        if next == 0
                            && let Some(tx) = sender.as_ref()
                        {
                            let _ = tx.send(dep);
                        }
                    }
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(node = %dep, "dependency count underflow");
                    }
                }
            }
        }
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.total {
            self.close();
        }
    }

    fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.state.lock().sender.take();
        }
    }

    fn outcome(&self) -> DagRun {
        DagRun {
            completed: self.completed.load(Ordering::Acquire),
            total: self.total,
        }
    }
}
