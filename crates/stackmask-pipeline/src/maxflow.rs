//! Minimum s-t cut on a sparse capacity graph.
//!
//! Dinic's algorithm over a compressed adjacency layout. Both the
//! level-graph search and the blocking-flow search are iterative, so
//! graph size is bounded by memory, not stack depth.

use std::collections::VecDeque;

/// Residual capacities at or below this are treated as saturated.
const EPSILON: f64 = 1e-9;

const UNREACHED: u32 = u32::MAX;

/// Builder for a flow network with an implicit source and sink.
///
/// Nodes are `0..node_count`; terminal capacities are attached with
/// [`add_terminal`](Self::add_terminal).
#[derive(Debug, Default)]
pub struct FlowGraph {
    source_caps: Vec<f64>,
    sink_caps: Vec<f64>,
    edges: Vec<(u32, u32, f64, f64)>,
}

/// Result of [`FlowGraph::min_cut`].
#[derive(Debug, Clone)]
pub struct MinCut {
    /// Value of the maximum flow (equal to the cut capacity).
    pub flow: f64,
    /// `true` for nodes on the source side of the cut.
    pub source_side: Vec<bool>,
}

impl FlowGraph {
    /// Create a graph with `node_count` nodes and no edges.
    #[must_use]
    pub fn new(node_count: usize) -> Self {
        Self {
            source_caps: vec![0.0; node_count],
            sink_caps: vec![0.0; node_count],
            edges: Vec::new(),
        }
    }

    /// Number of non-terminal nodes.
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.source_caps.len()
    }

    /// Add capacity from the source to `node` and from `node` to the
    /// sink. Repeated calls accumulate.
    pub fn add_terminal(&mut self, node: u32, from_source: f64, to_sink: f64) {
        let i = node as usize;
        self.source_caps[i] += from_source;
        self.sink_caps[i] += to_sink;
    }

    /// Add an edge `u -> v` with capacity `cap` and `v -> u` with
    /// capacity `rev_cap`.
    pub fn add_edge(&mut self, u: u32, v: u32, cap: f64, rev_cap: f64) {
        self.edges.push((u, v, cap, rev_cap));
    }

    /// Compute the maximum flow and the source side of a minimum cut.
    #[must_use]
    pub fn min_cut(self) -> MinCut {
        let n = self.node_count();
        let source = n;
        let sink = n + 1;

        // Flow through s -> v -> t is pushed up front.
        let mut flow = 0.0;
        let mut arcs: Vec<(usize, usize, f64, f64)> =
            Vec::with_capacity(self.edges.len() + n);
        for (v, (&s_cap, &t_cap)) in self.source_caps.iter().zip(&self.sink_caps).enumerate() {
            let common = s_cap.min(t_cap);
            flow += common;
            if s_cap - common > EPSILON {
                arcs.push((source, v, s_cap - common, 0.0));
            }
            if t_cap - common > EPSILON {
                arcs.push((v, sink, t_cap - common, 0.0));
            }
        }
        arcs.extend(
            self.edges
                .into_iter()
                .map(|(u, v, c, r)| (u as usize, v as usize, c, r)),
        );

        let mut residual = Residual::build(n + 2, &arcs);
        flow += residual.max_flow(source, sink);
        let reachable = residual.reachable_from(source);
        MinCut {
            flow,
            source_side: reachable[..n].to_vec(),
        }
    }
}

/// Residual network in compressed adjacency form. Arc `a`'s reverse is
/// `rev[a]`.
struct Residual {
    offsets: Vec<usize>,
    to: Vec<usize>,
    cap: Vec<f64>,
    rev: Vec<usize>,
}

impl Residual {
    fn build(node_count: usize, arcs: &[(usize, usize, f64, f64)]) -> Self {
        let mut degree = vec![0usize; node_count];
        for &(u, v, _, _) in arcs {
            degree[u] += 1;
            degree[v] += 1;
        }
        let mut offsets = Vec::with_capacity(node_count + 1);
        let mut running = 0;
        offsets.push(0);
        for d in &degree {
            running += d;
            offsets.push(running);
        }

        let mut fill = offsets[..node_count].to_vec();
        let mut to = vec![0; running];
        let mut cap = vec![0.0; running];
        let mut rev = vec![0; running];
        for &(u, v, c, r) in arcs {
            let a = fill[u];
            fill[u] += 1;
            let b = fill[v];
            fill[v] += 1;
            to[a] = v;
            cap[a] = c;
            rev[a] = b;
            to[b] = u;
            cap[b] = r;
            rev[b] = a;
        }
        Self {
            offsets,
            to,
            cap,
            rev,
        }
    }

    fn levels(&self, source: usize) -> Vec<u32> {
        let mut level = vec![UNREACHED; self.offsets.len() - 1];
        let mut queue = VecDeque::new();
        level[source] = 0;
        queue.push_back(source);
        while let Some(u) = queue.pop_front() {
            for a in self.offsets[u]..self.offsets[u + 1] {
                let v = self.to[a];
                if self.cap[a] > EPSILON && level[v] == UNREACHED {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        level
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> f64 {
        let mut total = 0.0;
        loop {
            let mut level = self.levels(source);
            if level[sink] == UNREACHED {
                return total;
            }
            let mut next_arc = self.offsets[..self.offsets.len() - 1].to_vec();
            loop {
                let pushed = self.augment(source, sink, &mut level, &mut next_arc);
                if pushed <= EPSILON {
                    break;
                }
                total += pushed;
            }
        }
    }

    /// Find one augmenting path in the level graph and push flow along
    /// it. Dead-end nodes are removed from the level graph.
    fn augment(
        &mut self,
        source: usize,
        sink: usize,
        level: &mut [u32],
        next_arc: &mut [usize],
    ) -> f64 {
        let mut path: Vec<usize> = Vec::new();
        let mut u = source;
        loop {
            if u == sink {
                let bottleneck = path
                    .iter()
                    .map(|&a| self.cap[a])
                    .fold(f64::INFINITY, f64::min);
                for &a in &path {
                    self.cap[a] -= bottleneck;
                    self.cap[self.rev[a]] += bottleneck;
                }
                return bottleneck;
            }

            let end = self.offsets[u + 1];
            while next_arc[u] < end {
                let a = next_arc[u];
                let v = self.to[a];
                if self.cap[a] > EPSILON && level[v] != UNREACHED && level[v] == level[u] + 1 {
                    break;
                }
                next_arc[u] += 1;
            }

            if next_arc[u] < end {
                let a = next_arc[u];
                path.push(a);
                u = self.to[a];
            } else {
                if u == source {
                    return 0.0;
                }
                level[u] = UNREACHED;
                let Some(a) = path.pop() else {
                    return 0.0;
                };
                u = self.to[self.rev[a]];
                next_arc[u] += 1;
            }
        }
    }

    fn reachable_from(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.offsets.len() - 1];
        let mut queue = VecDeque::new();
        seen[source] = true;
        queue.push_back(source);
        while let Some(u) = queue.pop_front() {
            for a in self.offsets[u]..self.offsets[u + 1] {
                let v = self.to[a];
                if self.cap[a] > EPSILON && !seen[v] {
                    seen[v] = true;
                    queue.push_back(v);
                }
            }
        }
        seen
    }
}
