//! Facade (C6): the single entry point the CLI (and any other embedder) uses.
//! Every public method is `async fn`; Store/Parser/Resolver/GraphEngine are
//! synchronous and run inside `tokio::task::spawn_blocking`, since SQLite and
//! CPU-bound graph math do not benefit from async. Grounded on the teacher's
//! `VaultService` facade-locking pattern (`service.rs`), generalized from one
//! global `Arc<RwLock<VaultIndex>>` to a per-vault lock registry.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::graph::{self, GraphEngine};
use crate::link_resolve;
use crate::model::{
    AnalysisSummary, BrokenLink, EgoGraph, GlobalStats, GraphMetrics, GraphStats, Note, NoteId,
    ResolveSummary, ScanResult, VaultId, VaultRecord, VaultRef, VaultStats,
};
use crate::scanner::Scanner;
use crate::store::Store;
use crate::vault;
use crate::{Error, Result};

/// Lazily-created per-vault exclusive lock, so concurrent callers never race
/// each other's `scan_vault`/`analyze_vault`/`delete_vault` on the same vault,
/// while operations on different vaults proceed independently.
#[derive(Default)]
pub struct VaultLockRegistry {
    locks: Mutex<HashMap<VaultId, Arc<tokio::sync::Mutex<()>>>>,
    /// The cancellation token for whichever scan/analyze currently holds a
    /// vault's lock, if any; `cancel()` looks a vault up here rather than
    /// needing a handle back from the in-flight operation itself.
    tokens: Mutex<HashMap<VaultId, CancellationToken>>,
}

impl VaultLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_for(&self, vault_id: &VaultId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(vault_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn acquire(&self, vault_id: &VaultId) -> tokio::sync::OwnedMutexGuard<()> {
        self.handle_for(vault_id).lock_owned().await
    }

    /// Registers a fresh cancellation token for the operation about to run
    /// under `vault_id`'s lock, replacing (not merging with) any stale one
    /// left behind by a prior call.
    fn begin_operation(&self, vault_id: &VaultId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(vault_id.clone(), token.clone());
        token
    }

    fn end_operation(&self, vault_id: &VaultId) {
        self.tokens.lock().unwrap().remove(vault_id);
    }

    /// Requests cancellation of whatever scan/analyze currently holds
    /// `vault_id`'s lock. A no-op if nothing is in flight.
    pub fn cancel(&self, vault_id: &VaultId) {
        if let Some(token) = self.tokens.lock().unwrap().get(vault_id) {
            token.cancel();
        }
    }
}

pub struct Engine {
    store: Arc<Mutex<Store>>,
    locks: VaultLockRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn open(store_path: &Path, config: EngineConfig) -> Result<Self> {
        let store = Store::open(store_path)?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            locks: VaultLockRegistry::new(),
            config,
        })
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        let store = Store::open_in_memory()?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            locks: VaultLockRegistry::new(),
            config,
        })
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = store.lock().expect("store mutex poisoned");
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::AnalysisError(format!("blocking task panicked: {e}")))?
    }

    // ---- discovery ------------------------------------------------------

    pub async fn discover_vaults(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || vault::discover_vaults(&root))
            .await
            .map_err(|e| Error::AnalysisError(format!("blocking task panicked: {e}")))?
    }

    // ---- lifecycle --------------------------------------------------------

    pub async fn scan_vault(&self, path: &Path, name: Option<&str>) -> Result<ScanResult> {
        let canonical = std::fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
        let vault_id = crate::model::vault_id_for_path(&canonical);
        let _guard = self.locks.acquire(&vault_id).await;
        let token = self.locks.begin_operation(&vault_id);

        let path = path.to_path_buf();
        let name = name.map(str::to_string);
        let result = self
            .run_blocking(move |store| {
                let mut scanner = Scanner::new(store);
                scanner.scan_cancellable(&path, name.as_deref(), Some(&token))
            })
            .await;
        self.locks.end_operation(&vault_id);
        result
    }

    /// Requests cancellation of whatever scan or analysis currently holds
    /// `vault_id`'s lock (§5). A no-op if nothing is in flight for it.
    pub fn cancel(&self, vault_id: &VaultId) {
        self.locks.cancel(vault_id);
    }

    pub async fn delete_vault(&self, vault_id: &VaultId) -> Result<()> {
        let _guard = self.locks.acquire(vault_id).await;
        let vault_id = vault_id.clone();
        self.run_blocking(move |store| store.delete_vault(&vault_id)).await
    }

    // ---- query --------------------------------------------------------

    pub async fn list_vaults(&self) -> Result<Vec<VaultRecord>> {
        self.run_blocking(|store| store.list_vaults()).await
    }

    pub async fn get_vault(&self, id_or_path: VaultRef<'_>) -> Result<VaultRecord> {
        let vault_id = match id_or_path {
            VaultRef::Id(id) => id.clone(),
            VaultRef::Path(path) => {
                let canonical = std::fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
                crate::model::vault_id_for_path(&canonical)
            }
        };
        self.run_blocking(move |store| store.get_vault(&vault_id)).await
    }

    pub async fn get_notes(
        &self,
        vault_id: &VaultId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Note>> {
        let vault_id = vault_id.clone();
        self.run_blocking(move |store| {
            let notes = store.get_notes(&vault_id)?;
            Ok(paginate(notes, limit, offset))
        })
        .await
    }

    pub async fn get_note(&self, note_id: &NoteId) -> Result<Note> {
        let note_id = note_id.clone();
        self.run_blocking(move |store| store.get_note(&note_id)).await
    }

    pub async fn get_vault_stats(&self, vault_id: &VaultId) -> Result<VaultStats> {
        let vault_id = vault_id.clone();
        self.run_blocking(move |store| store.get_vault_stats(&vault_id)).await
    }

    /// Totals across every vault, used by `stats` when no vault is given.
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        self.run_blocking(|store| store.global_stats()).await
    }

    // ---- analysis --------------------------------------------------------

    /// Canonical pipeline: resolve links, build the graph, compute metrics,
    /// detect clusters, persist, return a summary. Never run implicitly by
    /// `scan_vault`; composition is the CLI's job (`scan --analyze`).
    pub async fn analyze_vault(&self, vault_id: &VaultId) -> Result<AnalysisSummary> {
        let _guard = self.locks.acquire(vault_id).await;
        let token = self.locks.begin_operation(vault_id);
        let vault_id_for_cleanup = vault_id.clone();
        let vault_id = vault_id.clone();
        let engine_params = (
            self.config.pagerank_damping,
            self.config.pagerank_tolerance,
            self.config.pagerank_max_iterations,
        );
        let cluster_min_size = self.config.default_cluster_min_size;

        let result = self
            .run_blocking(move |store| {
                let link_stats: ResolveSummary = link_resolve::resolve_vault(store, &vault_id)?;

                let engine = GraphEngine::new(engine_params.0, engine_params.1, engine_params.2);
                let (snapshot, _metrics) =
                    graph::analyze_graph_cancellable(store, &vault_id, &engine, Some(&token))?;
                let clusters = engine.find_clusters(&snapshot, cluster_min_size);

                Ok(AnalysisSummary {
                    vault_id,
                    link_stats,
                    graph_stats: GraphStats {
                        notes: snapshot.node_count(),
                        edges: snapshot.edge_count(),
                        density: snapshot.density(),
                    },
                    clusters: clusters
                        .into_iter()
                        .map(|cluster| {
                            let mut ids: Vec<NoteId> = cluster.into_iter().collect();
                            ids.sort_by(|a, b| a.0.cmp(&b.0));
                            ids
                        })
                        .collect(),
                })
            })
            .await;
        self.locks.end_operation(&vault_id_for_cleanup);
        result
    }

    pub async fn get_note_metrics(&self, note_id: &NoteId) -> Result<GraphMetrics> {
        let note_id = note_id.clone();
        self.run_blocking(move |store| store.get_note_metrics(&note_id)).await
    }

    pub async fn get_hub_notes(&self, vault_id: &VaultId, min_links: Option<u32>) -> Result<Vec<Note>> {
        let vault_id = vault_id.clone();
        let min_links = min_links.unwrap_or(self.config.hub_min_links) as i64;
        self.run_blocking(move |store| store.hub_notes(&vault_id, min_links)).await
    }

    pub async fn get_orphan_notes(&self, vault_id: &VaultId, limit: Option<usize>) -> Result<Vec<Note>> {
        let vault_id = vault_id.clone();
        self.run_blocking(move |store| {
            let notes = store.orphaned_notes(&vault_id)?;
            Ok(paginate(notes, limit, None))
        })
        .await
    }

    pub async fn get_broken_links(
        &self,
        vault_id: &VaultId,
        limit: Option<usize>,
    ) -> Result<Vec<BrokenLink>> {
        let vault_id = vault_id.clone();
        self.run_blocking(move |store| {
            let links = store.broken_links(&vault_id)?;
            Ok(paginate(links, limit, None))
        })
        .await
    }

    pub async fn find_clusters(
        &self,
        vault_id: &VaultId,
        min_size: Option<usize>,
    ) -> Result<Vec<HashSet<NoteId>>> {
        let vault_id = vault_id.clone();
        let min_size = min_size.unwrap_or(self.config.default_cluster_min_size);
        let engine_params = (
            self.config.pagerank_damping,
            self.config.pagerank_tolerance,
            self.config.pagerank_max_iterations,
        );
        self.run_blocking(move |store| {
            store.get_vault(&vault_id)?;
            let notes = store.get_notes(&vault_id)?;
            let links = store.internal_links_for_vault(&vault_id)?;
            let snapshot = graph::GraphSnapshot::build(&notes, &links);
            let engine = GraphEngine::new(engine_params.0, engine_params.1, engine_params.2);
            Ok(engine.find_clusters(&snapshot, min_size))
        })
        .await
    }

    pub async fn get_ego_graph(&self, note_id: &NoteId, radius: Option<usize>) -> Result<EgoGraph> {
        let note_id = note_id.clone();
        let radius = radius.unwrap_or(self.config.default_ego_radius);
        let engine_params = (
            self.config.pagerank_damping,
            self.config.pagerank_tolerance,
            self.config.pagerank_max_iterations,
        );
        self.run_blocking(move |store| {
            let note = store.get_note(&note_id)?;
            let notes = store.get_notes(&note.vault_id)?;
            let links = store.internal_links_for_vault(&note.vault_id)?;
            let snapshot = graph::GraphSnapshot::build(&notes, &links);
            let engine = GraphEngine::new(engine_params.0, engine_params.1, engine_params.2);
            engine.ego_graph(&snapshot, &note_id, radius)
        })
        .await
    }
}

fn paginate<T>(items: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Vec<T> {
    let offset = offset.unwrap_or(0);
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_note(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn scan_then_analyze_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        write_note(dir.path(), "a.md", "links to [[b]]");
        write_note(dir.path(), "b.md", "no links");

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let scan = engine.scan_vault(dir.path(), Some("demo")).await.unwrap();
        assert_eq!(scan.notes_added, 2);

        let summary = engine.analyze_vault(&scan.vault_id).await.unwrap();
        assert_eq!(summary.link_stats.resolved, 1);
        assert_eq!(summary.graph_stats.notes, 2);
        assert_eq!(summary.graph_stats.edges, 1);
    }

    #[tokio::test]
    async fn get_vault_by_path_resolves_deterministic_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        write_note(dir.path(), "a.md", "hello");

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let scan = engine.scan_vault(dir.path(), None).await.unwrap();

        let record = engine.get_vault(VaultRef::Path(dir.path())).await.unwrap();
        assert_eq!(record.id, scan.vault_id);
    }

    #[tokio::test]
    async fn cancel_on_idle_vault_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        write_note(dir.path(), "a.md", "hello");

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let scan = engine.scan_vault(dir.path(), None).await.unwrap();

        // No scan/analyze is in flight for this vault anymore; cancelling it
        // must not affect a subsequent, unrelated operation.
        engine.cancel(&scan.vault_id);
        let summary = engine.analyze_vault(&scan.vault_id).await.unwrap();
        assert_eq!(summary.graph_stats.notes, 1);
    }

    #[tokio::test]
    async fn analyze_unknown_vault_is_not_found() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let err = engine.analyze_vault(&VaultId("missing".into())).await;
        assert!(err.is_err());
    }
}
