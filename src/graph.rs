//! GraphEngine (C5): computes PageRank, betweenness, closeness and local
//! clustering coefficient over a vault's resolved internal links, plus
//! weakly-connected-component clustering and ego-graph extraction.
//!
//! Grounded on `webdesserts-obsidian-memory`'s `pagerank.rs` for the iterative
//! mechanics (reverse-adjacency precomputation, L1-distance convergence,
//! `tracing` progress/non-convergence logging) but computes *global* PageRank
//! (uniform restart mass `(1 - damping) / n`) rather than that source's
//! personalized/seeded variant, and adds the betweenness/closeness/clustering
//! metrics and cluster/ego-graph operations it does not have.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::cancel::CancellationToken;
use crate::model::{Cluster, EgoGraph, GraphMetricFields};
use crate::{Error, Link, LinkType, Note, NoteId, Result, Store, VaultId};

/// A deduplicated directed graph built from one vault's notes and resolved
/// internal links. Self-loops are kept; parallel edges are collapsed.
pub struct GraphSnapshot {
    nodes: Vec<NoteId>,
    forward: HashMap<NoteId, Vec<NoteId>>,
    reverse: HashMap<NoteId, Vec<NoteId>>,
    edge_count: usize,
}

impl GraphSnapshot {
    /// Build the snapshot from a vault's notes and its links, keeping only
    /// resolved internal edges and deduplicating `(source, target)` pairs.
    pub fn build(notes: &[Note], links: &[Link]) -> Self {
        let nodes: Vec<NoteId> = notes.iter().map(|n| n.id.clone()).collect();

        let mut seen: HashSet<(NoteId, NoteId)> = HashSet::new();
        let mut forward: HashMap<NoteId, Vec<NoteId>> = HashMap::new();
        let mut reverse: HashMap<NoteId, Vec<NoteId>> = HashMap::new();
        for node in &nodes {
            forward.entry(node.clone()).or_default();
            reverse.entry(node.clone()).or_default();
        }

        for link in links {
            if link.link_type != LinkType::Internal {
                continue;
            }
            let Some(target) = &link.target_note_id else {
                continue;
            };
            let pair = (link.source_note_id.clone(), target.clone());
            if !seen.insert(pair) {
                continue;
            }
            forward
                .entry(link.source_note_id.clone())
                .or_default()
                .push(target.clone());
            reverse
                .entry(target.clone())
                .or_default()
                .push(link.source_note_id.clone());
        }

        Self {
            nodes,
            forward,
            reverse,
            edge_count: seen.len(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn density(&self) -> f64 {
        let n = self.nodes.len();
        if n > 1 {
            self.edge_count as f64 / (n * (n - 1)) as f64
        } else {
            0.0
        }
    }

    fn out_neighbors(&self, id: &NoteId) -> &[NoteId] {
        self.forward.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn in_neighbors(&self, id: &NoteId) -> &[NoteId] {
        self.reverse.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Undirected neighbor set (an edge `u-v` exists if `u->v` or `v->u`),
    /// used by betweenness, closeness and clustering coefficient.
    fn undirected_neighbors(&self, id: &NoteId) -> Vec<NoteId> {
        let mut set: HashSet<NoteId> = HashSet::new();
        set.extend(self.out_neighbors(id).iter().cloned());
        set.extend(self.in_neighbors(id).iter().cloned());
        set.into_iter().collect()
    }
}

pub struct GraphEngine {
    damping: f64,
    tolerance: f64,
    max_iterations: usize,
}

impl GraphEngine {
    pub fn new(damping: f64, tolerance: f64, max_iterations: usize) -> Self {
        Self {
            damping,
            tolerance,
            max_iterations,
        }
    }

    /// Global PageRank over the snapshot. Dangling nodes (`out_degree == 0`)
    /// contribute no forward mass; their score is simply not redistributed.
    /// Returns the best-so-far values and logs a warning on non-convergence
    /// rather than failing.
    pub fn pagerank(&self, snapshot: &GraphSnapshot) -> HashMap<NoteId, f64> {
        self.pagerank_cancellable(snapshot, None)
    }

    /// Like [`Self::pagerank`], but checks `cancellation` at iteration
    /// boundary (§5) and returns the best-so-far scores if set, rather than
    /// running to convergence or the iteration cap.
    pub fn pagerank_cancellable(
        &self,
        snapshot: &GraphSnapshot,
        cancellation: Option<&CancellationToken>,
    ) -> HashMap<NoteId, f64> {
        let n = snapshot.node_count();
        if n == 0 {
            return HashMap::new();
        }

        let init_score = 1.0 / n as f64;
        let mut scores: HashMap<NoteId, f64> =
            snapshot.nodes.iter().map(|id| (id.clone(), init_score)).collect();
        let restart_mass = (1.0 - self.damping) / n as f64;

        let out_degree: HashMap<NoteId, f64> = snapshot
            .nodes
            .iter()
            .map(|id| (id.clone(), snapshot.out_neighbors(id).len() as f64))
            .collect();

        let start = std::time::Instant::now();
        let mut converged_at = None;
        for iteration in 0..self.max_iterations {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                tracing::warn!(iteration, "pagerank cancelled, returning best-so-far scores");
                break;
            }

            let mut new_scores: HashMap<NoteId, f64> = HashMap::with_capacity(n);
            for node in &snapshot.nodes {
                let mut inbound = 0.0;
                for source in snapshot.in_neighbors(node) {
                    let source_score = scores.get(source).copied().unwrap_or(0.0);
                    let source_out = out_degree.get(source).copied().unwrap_or(0.0);
                    if source_out > 0.0 {
                        inbound += source_score / source_out;
                    }
                }
                new_scores.insert(node.clone(), restart_mass + self.damping * inbound);
            }

            let diff: f64 = snapshot
                .nodes
                .iter()
                .map(|id| {
                    (new_scores.get(id).copied().unwrap_or(0.0) - scores.get(id).copied().unwrap_or(0.0)).abs()
                })
                .sum();
            scores = new_scores;

            if iteration % 10 == 0 && iteration > 0 {
                tracing::debug!(iteration, diff, "pagerank iteration progress");
            }
            if diff < self.tolerance {
                converged_at = Some(iteration);
                break;
            }
        }

        let elapsed = start.elapsed();
        match converged_at {
            Some(iter) => {
                tracing::debug!(iterations = iter, elapsed_ms = elapsed.as_millis(), "pagerank converged")
            }
            None => tracing::warn!(
                max_iterations = self.max_iterations,
                elapsed_ms = elapsed.as_millis(),
                "pagerank did not converge"
            ),
        }

        scores
    }

    /// Normalized betweenness centrality via Brandes' algorithm (unweighted
    /// BFS per source), `1 / ((n-1)(n-2))` for `n > 2` else left at 0.
    pub fn betweenness(&self, snapshot: &GraphSnapshot) -> HashMap<NoteId, f64> {
        let n = snapshot.node_count();
        let mut centrality: HashMap<NoteId, f64> =
            snapshot.nodes.iter().map(|id| (id.clone(), 0.0)).collect();
        if n <= 2 {
            return centrality;
        }

        for source in &snapshot.nodes {
            let mut stack: Vec<NoteId> = Vec::new();
            let mut predecessors: HashMap<NoteId, Vec<NoteId>> = HashMap::new();
            let mut sigma: HashMap<NoteId, f64> =
                snapshot.nodes.iter().map(|id| (id.clone(), 0.0)).collect();
            let mut dist: HashMap<NoteId, i64> =
                snapshot.nodes.iter().map(|id| (id.clone(), -1)).collect();
            sigma.insert(source.clone(), 1.0);
            dist.insert(source.clone(), 0);

            let mut queue = VecDeque::new();
            queue.push_back(source.clone());
            while let Some(v) = queue.pop_front() {
                stack.push(v.clone());
                for w in snapshot.out_neighbors(&v) {
                    if dist[w] < 0 {
                        dist.insert(w.clone(), dist[&v] + 1);
                        queue.push_back(w.clone());
                    }
                    if dist[w] == dist[&v] + 1 {
                        let new_sigma = sigma[&v] + sigma[w];
                        sigma.insert(w.clone(), new_sigma);
                        predecessors.entry(w.clone()).or_default().push(v.clone());
                    }
                }
            }

            let mut delta: HashMap<NoteId, f64> =
                snapshot.nodes.iter().map(|id| (id.clone(), 0.0)).collect();
            while let Some(w) = stack.pop() {
                if let Some(preds) = predecessors.get(&w) {
                    for v in preds {
                        let contrib = (sigma[v] / sigma[&w]) * (1.0 + delta[&w]);
                        *delta.get_mut(v).unwrap() += contrib;
                    }
                }
                if w != *source {
                    *centrality.get_mut(&w).unwrap() += delta[&w];
                }
            }
        }

        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for value in centrality.values_mut() {
            *value *= scale;
        }
        centrality
    }

    /// wf-improved closeness centrality. Unreachable pairs contribute 0 (not
    /// infinity) to the distance sum.
    pub fn closeness(&self, snapshot: &GraphSnapshot) -> HashMap<NoteId, f64> {
        let n = snapshot.node_count();
        let mut result: HashMap<NoteId, f64> =
            snapshot.nodes.iter().map(|id| (id.clone(), 0.0)).collect();
        if n <= 1 {
            return result;
        }

        for node in &snapshot.nodes {
            let distances = bfs_undirected_distances(snapshot, node);
            let reachable = distances.len();
            let sum_distances: i64 = distances.values().sum();
            if reachable > 1 && sum_distances > 0 {
                let reachable_f = (reachable - 1) as f64;
                let value = (reachable_f / (n - 1) as f64) * (reachable_f / sum_distances as f64);
                result.insert(node.clone(), value);
            }
        }
        result
    }

    /// Local clustering coefficient on the undirected projection:
    /// `2 * triangles(v) / (deg(v) * (deg(v) - 1))` for `deg(v) >= 2`, else 0.
    pub fn clustering_coefficient(&self, snapshot: &GraphSnapshot) -> HashMap<NoteId, f64> {
        let mut result: HashMap<NoteId, f64> =
            snapshot.nodes.iter().map(|id| (id.clone(), 0.0)).collect();

        for node in &snapshot.nodes {
            let neighbors = snapshot.undirected_neighbors(node);
            let degree = neighbors.len();
            if degree < 2 {
                continue;
            }
            let neighbor_set: HashSet<&NoteId> = neighbors.iter().collect();
            let mut triangles = 0usize;
            for a in &neighbors {
                for b in snapshot.undirected_neighbors(a) {
                    if neighbor_set.contains(&b) {
                        triangles += 1;
                    }
                }
            }
            // Each triangle counted twice (once from each endpoint of the shared edge).
            let triangles = triangles / 2;
            let coefficient = (2 * triangles) as f64 / (degree * (degree - 1)) as f64;
            result.insert(node.clone(), coefficient);
        }
        result
    }

    /// Compute every metric for every node and return the full per-node map.
    pub fn compute_metrics(&self, snapshot: &GraphSnapshot) -> HashMap<NoteId, GraphMetricFields> {
        self.compute_metrics_cancellable(snapshot, None)
    }

    /// Like [`Self::compute_metrics`], threading `cancellation` through to PageRank.
    pub fn compute_metrics_cancellable(
        &self,
        snapshot: &GraphSnapshot,
        cancellation: Option<&CancellationToken>,
    ) -> HashMap<NoteId, GraphMetricFields> {
        let pagerank = self.pagerank_cancellable(snapshot, cancellation);
        let betweenness = self.betweenness(snapshot);
        let closeness = self.closeness(snapshot);
        let clustering = self.clustering_coefficient(snapshot);

        snapshot
            .nodes
            .iter()
            .map(|id| {
                let fields = GraphMetricFields {
                    pagerank: pagerank.get(id).copied().unwrap_or(0.0),
                    in_degree: snapshot.in_neighbors(id).len() as i64,
                    out_degree: snapshot.out_neighbors(id).len() as i64,
                    betweenness: betweenness.get(id).copied().unwrap_or(0.0),
                    closeness: closeness.get(id).copied().unwrap_or(0.0),
                    clustering_coefficient: clustering.get(id).copied().unwrap_or(0.0),
                };
                (id.clone(), fields)
            })
            .collect()
    }

    /// Weakly connected components of the undirected projection, filtered to
    /// at least `min_size` members, sorted by descending size then by the
    /// lexicographically smallest member id.
    pub fn find_clusters(&self, snapshot: &GraphSnapshot, min_size: usize) -> Vec<Cluster> {
        let mut visited: HashSet<NoteId> = HashSet::new();
        let mut clusters: Vec<Cluster> = Vec::new();

        for node in &snapshot.nodes {
            if visited.contains(node) {
                continue;
            }
            let mut component: Cluster = HashSet::new();
            let mut queue = VecDeque::new();
            queue.push_back(node.clone());
            visited.insert(node.clone());
            while let Some(current) = queue.pop_front() {
                component.insert(current.clone());
                for neighbor in snapshot.undirected_neighbors(&current) {
                    if visited.insert(neighbor.clone()) {
                        queue.push_back(neighbor);
                    }
                }
            }
            if component.len() >= min_size {
                clusters.push(component);
            }
        }

        clusters.sort_by(|a, b| {
            b.len().cmp(&a.len()).then_with(|| {
                let min_a = a.iter().map(|id| id.0.as_str()).min().unwrap_or("");
                let min_b = b.iter().map(|id| id.0.as_str()).min().unwrap_or("");
                min_a.cmp(min_b)
            })
        });
        clusters
    }

    /// Induced subgraph within `radius` hops of `note_id` (BFS over the
    /// undirected projection); edges are directed `G` edges with both
    /// endpoints inside the node set.
    pub fn ego_graph(&self, snapshot: &GraphSnapshot, note_id: &NoteId, radius: usize) -> Result<EgoGraph> {
        if !snapshot.forward.contains_key(note_id) {
            return Err(Error::NoteNotFound(note_id.0.clone()));
        }

        let distances = bfs_undirected_distances_bounded(snapshot, note_id, radius);
        let node_set: HashSet<&NoteId> = distances.keys().collect();
        let mut nodes: Vec<NoteId> = distances.keys().cloned().collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut edges: Vec<(NoteId, NoteId)> = Vec::new();
        for source in &nodes {
            for target in snapshot.out_neighbors(source) {
                if node_set.contains(target) {
                    edges.push((source.clone(), target.clone()));
                }
            }
        }

        Ok(EgoGraph {
            center: note_id.clone(),
            nodes,
            edges,
        })
    }
}

fn bfs_undirected_distances(snapshot: &GraphSnapshot, source: &NoteId) -> HashMap<NoteId, i64> {
    bfs_undirected_distances_bounded(snapshot, source, usize::MAX)
}

fn bfs_undirected_distances_bounded(
    snapshot: &GraphSnapshot,
    source: &NoteId,
    radius: usize,
) -> HashMap<NoteId, i64> {
    let mut distances = HashMap::new();
    distances.insert(source.clone(), 0i64);
    let mut queue = VecDeque::new();
    queue.push_back(source.clone());

    while let Some(current) = queue.pop_front() {
        let current_dist = distances[&current];
        if current_dist as usize >= radius {
            continue;
        }
        for neighbor in snapshot.undirected_neighbors(&current) {
            if !distances.contains_key(&neighbor) {
                distances.insert(neighbor.clone(), current_dist + 1);
                queue.push_back(neighbor);
            }
        }
    }
    distances
}

/// Run the full metric pipeline for `vault_id` and persist the results in one
/// transaction. Fails with `Error::VaultNotFound` if the vault itself is
/// unknown to the Store; a known vault with zero notes yields an empty
/// snapshot rather than an error.
pub fn analyze_graph(
    store: &mut Store,
    vault_id: &VaultId,
    engine: &GraphEngine,
) -> Result<(GraphSnapshot, HashMap<NoteId, GraphMetricFields>)> {
    analyze_graph_cancellable(store, vault_id, engine, None)
}

/// Like [`analyze_graph`], threading `cancellation` through to PageRank.
pub fn analyze_graph_cancellable(
    store: &mut Store,
    vault_id: &VaultId,
    engine: &GraphEngine,
    cancellation: Option<&CancellationToken>,
) -> Result<(GraphSnapshot, HashMap<NoteId, GraphMetricFields>)> {
    store.get_vault(vault_id)?;
    let notes = store
        .get_notes(vault_id)
        .map_err(|e| Error::AnalysisError(e.to_string()))?;
    let links = store
        .internal_links_for_vault(vault_id)
        .map_err(|e| Error::AnalysisError(e.to_string()))?;

    let snapshot = GraphSnapshot::build(&notes, &links);
    let metrics = engine.compute_metrics_cancellable(&snapshot, cancellation);

    let rows: Vec<(NoteId, GraphMetricFields)> =
        metrics.iter().map(|(id, fields)| (id.clone(), *fields)).collect();
    store
        .persist_graph_metrics(&rows)
        .map_err(|e| Error::AnalysisError(e.to_string()))?;

    Ok((snapshot, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkType;

    fn note(id: &str, path: &str) -> Note {
        let now = chrono::Utc::now();
        Note {
            id: NoteId(id.into()),
            vault_id: VaultId("v".into()),
            relative_path: path.into(),
            title: path.into(),
            content_hash: String::new(),
            word_count: 0,
            char_count: 0,
            size_bytes: 0,
            created_at: now,
            modified_at: now,
            scanned_at: now,
            tags: Vec::new(),
            aliases: Vec::new(),
            metadata: Default::default(),
        }
    }

    fn link(id: i64, source: &str, target: &str) -> Link {
        Link {
            id,
            source_note_id: NoteId(source.into()),
            target_note_id: Some(NoteId(target.into())),
            target_path: target.into(),
            link_type: LinkType::Internal,
            link_text: None,
        }
    }

    fn engine() -> GraphEngine {
        GraphEngine::new(0.85, 1e-6, 100)
    }

    #[test]
    fn pagerank_sums_to_roughly_one() {
        let notes = vec![note("a", "a.md"), note("b", "b.md"), note("c", "c.md")];
        let links = vec![link(1, "a", "b"), link(2, "b", "c"), link(3, "c", "a")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let scores = engine().pagerank(&snapshot);
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-4, "total was {total}");
    }

    #[test]
    fn pre_cancelled_pagerank_returns_uniform_initial_scores() {
        let notes = vec![note("a", "a.md"), note("b", "b.md"), note("c", "c.md")];
        let links = vec![link(1, "a", "b"), link(2, "b", "c"), link(3, "c", "a")];
        let snapshot = GraphSnapshot::build(&notes, &links);

        let token = CancellationToken::new();
        token.cancel();
        let scores = engine().pagerank_cancellable(&snapshot, Some(&token));

        for score in scores.values() {
            assert!((score - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn dangling_node_does_not_redistribute_mass() {
        let notes = vec![note("a", "a.md"), note("b", "b.md")];
        let links = vec![link(1, "a", "b")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let scores = engine().pagerank(&snapshot);
        assert!(scores[&NoteId("b".into())] > scores[&NoteId("a".into())]);
    }

    #[test]
    fn betweenness_is_zero_for_small_graphs() {
        let notes = vec![note("a", "a.md"), note("b", "b.md")];
        let links = vec![link(1, "a", "b")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let scores = engine().betweenness(&snapshot);
        assert!(scores.values().all(|&v| v == 0.0));
    }

    #[test]
    fn betweenness_credits_the_bridge_node() {
        let notes = vec![note("a", "a.md"), note("b", "b.md"), note("c", "c.md")];
        let links = vec![link(1, "a", "b"), link(2, "b", "c")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let scores = engine().betweenness(&snapshot);
        assert!(scores[&NoteId("b".into())] > scores[&NoteId("a".into())]);
        assert!(scores[&NoteId("b".into())] > scores[&NoteId("c".into())]);
    }

    #[test]
    fn clustering_coefficient_for_a_triangle_is_one() {
        let notes = vec![note("a", "a.md"), note("b", "b.md"), note("c", "c.md")];
        let links = vec![link(1, "a", "b"), link(2, "b", "c"), link(3, "c", "a")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let scores = engine().clustering_coefficient(&snapshot);
        for score in scores.values() {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn find_clusters_separates_weak_components() {
        let notes = vec![
            note("a", "a.md"),
            note("b", "b.md"),
            note("c", "c.md"),
            note("d", "d.md"),
        ];
        let links = vec![link(1, "a", "b"), link(2, "c", "d")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let clusters = engine().find_clusters(&snapshot, 2);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn find_clusters_filters_below_min_size() {
        let notes = vec![note("a", "a.md"), note("b", "b.md"), note("c", "c.md")];
        let links = vec![link(1, "a", "b")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let clusters = engine().find_clusters(&snapshot, 3);
        assert!(clusters.is_empty());
    }

    #[test]
    fn ego_graph_respects_radius() {
        let notes = vec![
            note("a", "a.md"),
            note("b", "b.md"),
            note("c", "c.md"),
            note("d", "d.md"),
        ];
        let links = vec![link(1, "a", "b"), link(2, "b", "c"), link(3, "c", "d")];
        let snapshot = GraphSnapshot::build(&notes, &links);
        let ego = engine()
            .ego_graph(&snapshot, &NoteId("a".into()), 1)
            .unwrap();
        assert_eq!(ego.nodes.len(), 2);
        assert!(ego.nodes.contains(&NoteId("b".into())));
        assert!(!ego.nodes.contains(&NoteId("c".into())));
    }

    #[test]
    fn ego_graph_unknown_note_is_not_found() {
        let notes = vec![note("a", "a.md")];
        let snapshot = GraphSnapshot::build(&notes, &[]);
        let err = engine().ego_graph(&snapshot, &NoteId("missing".into()), 1);
        assert!(err.is_err());
    }
}
