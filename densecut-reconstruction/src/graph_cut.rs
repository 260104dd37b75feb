//! Max-flow / min-cut on a capacity graph
//!
//! Dinic's algorithm with residual arcs stored in pairs: arc `i` and its
//! reverse `i ^ 1`. The minimum cut returned by [`FlowNetwork::source_side`]
//! is the set of nodes reachable from the source in the final residual graph,
//! which is the unique minimal source side of all minimum cuts.

use std::collections::VecDeque;

/// Residual capacities at or below this value count as saturated
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct FlowNetwork {
    adjacency: Vec<Vec<usize>>,
    heads: Vec<usize>,
    capacities: Vec<f64>,
}

impl FlowNetwork {
    pub fn new(nodes: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); nodes],
            heads: Vec::new(),
            capacities: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn arc_count(&self) -> usize {
        self.heads.len()
    }

    /// Add an arc `from -> to` with capacity `capacity` and its reverse arc
    /// with capacity `reverse_capacity`
    pub fn add_edge(&mut self, from: usize, to: usize, capacity: f64, reverse_capacity: f64) {
        let index = self.heads.len();
        self.heads.push(to);
        self.capacities.push(capacity.max(0.0));
        self.adjacency[from].push(index);
        self.heads.push(from);
        self.capacities.push(reverse_capacity.max(0.0));
        self.adjacency[to].push(index + 1);
    }

    /// BFS levels over residual arcs; `None` when the sink is unreachable
    fn levels(&self, source: usize, sink: usize) -> Option<Vec<i64>> {
        let mut level = vec![-1i64; self.node_count()];
        let mut queue = VecDeque::new();
        level[source] = 0;
        queue.push_back(source);
        while let Some(u) = queue.pop_front() {
            for &arc in &self.adjacency[u] {
                let v = self.heads[arc];
                if level[v] < 0 && self.capacities[arc] > EPS {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        (level[sink] >= 0).then_some(level)
    }

    /// Push flow along one shortest augmenting path of the level graph.
    ///
    /// Iterative so long paths through large cell graphs cannot overflow the
    /// stack. Dead-end nodes are removed from the level graph.
    fn augment(&mut self, source: usize, sink: usize, level: &mut [i64], cursor: &mut [usize]) -> f64 {
        let mut path: Vec<usize> = Vec::new();
        let mut u = source;
        loop {
            if u == sink {
                let bottleneck = path
                    .iter()
                    .map(|&arc| self.capacities[arc])
                    .fold(f64::INFINITY, f64::min);
                for &arc in &path {
                    self.capacities[arc] -= bottleneck;
                    self.capacities[arc ^ 1] += bottleneck;
                }
                return bottleneck;
            }

            let mut advanced = false;
            while cursor[u] < self.adjacency[u].len() {
                let arc = self.adjacency[u][cursor[u]];
                let v = self.heads[arc];
                if self.capacities[arc] > EPS && level[v] == level[u] + 1 {
                    path.push(arc);
                    u = v;
                    advanced = true;
                    break;
                }
                cursor[u] += 1;
            }

            if !advanced {
                level[u] = -1;
                match path.pop() {
                    Some(arc) => {
                        u = self.heads[arc ^ 1];
                        cursor[u] += 1;
                    }
                    None => return 0.0,
                }
            }
        }
    }

    /// Compute the maximum flow from `source` to `sink`, leaving the
    /// residual capacities in place for [`FlowNetwork::source_side`].
    ///
    /// Returns infinity when the sink is reachable through arcs of infinite
    /// capacity only.
    pub fn max_flow(&mut self, source: usize, sink: usize) -> f64 {
        if source == sink {
            return 0.0;
        }
        let mut total = 0.0;
        while let Some(mut level) = self.levels(source, sink) {
            let mut cursor = vec![0usize; self.node_count()];
            loop {
                let pushed = self.augment(source, sink, &mut level, &mut cursor);
                if !pushed.is_finite() {
                    return f64::INFINITY;
                }
                if pushed <= EPS {
                    break;
                }
                total += pushed;
            }
        }
        total
    }

    /// Nodes reachable from `source` through unsaturated residual arcs
    pub fn source_side(&self, source: usize) -> Vec<bool> {
        let mut reached = vec![false; self.node_count()];
        let mut queue = VecDeque::new();
        reached[source] = true;
        queue.push_back(source);
        while let Some(u) = queue.pop_front() {
            for &arc in &self.adjacency[u] {
                let v = self.heads[arc];
                if !reached[v] && self.capacities[arc] > EPS {
                    reached[v] = true;
                    queue.push_back(v);
                }
            }
        }
        reached
    }
}
