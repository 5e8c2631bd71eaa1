//! Dependency graph: cycle detection and deterministic topological order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Directed graph over node indices, with human-readable labels for
/// diagnostics. An edge `u -> v` means "u must be constructed before v".
pub(crate) struct Graph {
    labels: Vec<String>,
    adj: Vec<Vec<usize>>,
}

impl Graph {
    pub fn new(labels: Vec<String>) -> Self {
        let adj = vec![Vec::new(); labels.len()];
        Self { labels, adj }
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.adj[from].push(to);
    }

    /// DFS with path tracking; returns the cycle (closed, first node
    /// repeated at the end) if one exists.
    pub fn cycle_path(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            node: usize,
            adj: &[Vec<usize>],
            colors: &mut [Color],
            path: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            colors[node] = Color::Gray;
            path.push(node);

            for &next in &adj[node] {
                match colors[next] {
                    Color::Gray => {
                        // Back edge: the cycle is the path suffix from `next`.
                        if let Some(start) = path.iter().position(|&n| n == next) {
                            let mut cycle: Vec<usize> = path[start..].to_vec();
                            cycle.push(next);
                            return Some(cycle);
                        }
                    }
                    Color::White => {
                        if let Some(cycle) = dfs(next, adj, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            colors[node] = Color::Black;
            None
        }

        let mut colors = vec![Color::White; self.labels.len()];
        let mut path = Vec::new();
        for i in 0..self.labels.len() {
            if colors[i] == Color::White {
                if let Some(cycle) = dfs(i, &self.adj, &mut colors, &mut path) {
                    return Some(cycle.into_iter().map(|n| self.labels[n].clone()).collect());
                }
            }
        }
        None
    }

    /// Kahn's algorithm. The ready set is a min-heap over node indices, so
    /// ties between independent nodes resolve to registration order and the
    /// result is deterministic. Callers must have ruled out cycles first.
    pub fn topo_sorted(&self) -> Vec<usize> {
        let mut indeg = vec![0usize; self.labels.len()];
        for targets in &self.adj {
            for &t in targets {
                indeg[t] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indeg
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.labels.len());
        while let Some(Reverse(u)) = ready.pop() {
            order.push(u);
            for &v in &self.adj[u] {
                indeg[v] -= 1;
                if indeg[v] == 0 {
                    ready.push(Reverse(v));
                }
            }
        }
        order
    }
}
