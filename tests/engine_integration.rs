use std::path::Path;

use vault_engine::EngineConfig;

fn write_note(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn new_vault(temp: &tempfile::TempDir) -> std::path::PathBuf {
    let root = temp.path().join("vault");
    std::fs::create_dir_all(root.join(".obsidian")).unwrap();
    root
}

// Scenario A: a minimal two-note vault scans cleanly with no links or tags.
#[tokio::test]
async fn scenario_a_minimal_vault() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "one.md", "# One\nplain text, no links.\n");
    write_note(&root, "two.md", "# Two\nalso plain.\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let result = engine.scan_vault(&root, Some("minimal")).await?;

    assert_eq!(result.notes_added, 2);
    assert_eq!(result.links_found, 0);
    assert_eq!(result.tags_found, 0);
    assert!(result.success());

    let notes = engine.get_notes(&result.vault_id, None, None).await?;
    assert_eq!(notes.len(), 2);
    Ok(())
}

// Scenario B: a wikilink that resolves to an existing note is reported resolved,
// and the link reconciliation property (no duplicate growth on rescan) holds.
#[tokio::test]
async fn scenario_b_resolved_wikilink_and_rescan_idempotence() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "See [[b]] for details.\n");
    write_note(&root, "b.md", "# B\nnothing links out.\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan1 = engine.scan_vault(&root, None).await?;
    let summary1 = engine.analyze_vault(&scan1.vault_id).await?;
    assert_eq!(summary1.link_stats.resolved, 1);
    assert_eq!(summary1.link_stats.broken, 0);

    // Rescanning unchanged files must not add or update anything (idempotence).
    let scan2 = engine.scan_vault(&root, None).await?;
    assert_eq!(scan2.notes_added, 0);
    assert_eq!(scan2.notes_updated, 0);
    assert_eq!(scan2.notes_deleted, 0);

    let summary2 = engine.analyze_vault(&scan1.vault_id).await?;
    assert_eq!(summary2.link_stats.resolved, 1);
    assert_eq!(summary2.graph_stats.edges, summary1.graph_stats.edges);
    Ok(())
}

// Scenario C: a wikilink to a nonexistent note is reported broken, not resolved.
#[tokio::test]
async fn scenario_c_broken_wikilink() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "Dangling reference: [[nowhere]].\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    let summary = engine.analyze_vault(&scan.vault_id).await?;

    assert_eq!(summary.link_stats.broken, 1);
    assert_eq!(summary.link_stats.resolved, 0);

    let broken = engine.get_broken_links(&scan.vault_id, None).await?;
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].target_path, "nowhere");
    Ok(())
}

// Scenario D: deleting a note from disk removes it from the Store on rescan,
// and its inbound links become broken rather than dangling in the Store.
#[tokio::test]
async fn scenario_d_deletion_updates_links() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "Links to [[b]].\n");
    write_note(&root, "b.md", "# B\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan1 = engine.scan_vault(&root, None).await?;
    let summary1 = engine.analyze_vault(&scan1.vault_id).await?;
    assert_eq!(summary1.link_stats.resolved, 1);

    std::fs::remove_file(root.join("b.md"))?;
    let scan2 = engine.scan_vault(&root, None).await?;
    assert_eq!(scan2.notes_deleted, 1);

    let summary2 = engine.analyze_vault(&scan1.vault_id).await?;
    assert_eq!(summary2.link_stats.broken, 1);
    assert_eq!(summary2.link_stats.resolved, 0);

    let notes = engine.get_notes(&scan1.vault_id, None, None).await?;
    assert_eq!(notes.len(), 1);
    Ok(())
}

// Scenario E: tag counters track additions, removals, and reuse across notes.
#[tokio::test]
async fn scenario_e_tag_stats() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "#project #draft\nbody\n");
    write_note(&root, "b.md", "#project\nbody\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    assert_eq!(scan.tags_found, 3);

    let stats = engine.get_vault_stats(&scan.vault_id).await?;
    assert_eq!(stats.tag_count, 2);

    // Dropping a tag from one note should shrink the tag's reach, not the global count.
    write_note(&root, "a.md", "#project\nbody, draft tag removed\n");
    engine.scan_vault(&root, None).await?;
    let stats2 = engine.get_vault_stats(&scan.vault_id).await?;
    assert_eq!(stats2.tag_count, 1);
    Ok(())
}

// Scenario F: PageRank over a simple hub produces a shape, not just a number --
// the hub every other note links to should outrank any single leaf.
#[tokio::test]
async fn scenario_f_pagerank_shape() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "hub.md", "# Hub\n");
    write_note(&root, "leaf1.md", "points at [[hub]]\n");
    write_note(&root, "leaf2.md", "points at [[hub]]\n");
    write_note(&root, "leaf3.md", "points at [[hub]]\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    engine.analyze_vault(&scan.vault_id).await?;

    let notes = engine.get_notes(&scan.vault_id, None, None).await?;
    let hub_note = notes.iter().find(|n| n.relative_path == "hub.md").unwrap();
    let leaf_note = notes.iter().find(|n| n.relative_path == "leaf1.md").unwrap();

    let hub_metrics = engine.get_note_metrics(&hub_note.id).await?;
    let leaf_metrics = engine.get_note_metrics(&leaf_note.id).await?;
    assert!(
        hub_metrics.pagerank > leaf_metrics.pagerank,
        "hub ({}) should outrank leaf ({})",
        hub_metrics.pagerank,
        leaf_metrics.pagerank
    );

    let hubs = engine.get_hub_notes(&scan.vault_id, Some(1)).await?;
    assert!(hubs.iter().any(|n| n.id == hub_note.id));
    Ok(())
}

// Testable property: a known vault with zero notes analyzes cleanly instead
// of being mistaken for an unknown vault (VaultNotFound means the vault row
// itself is absent, not that it currently has no notes).
#[tokio::test]
async fn empty_vault_analyzes_without_not_found_error() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    assert_eq!(scan.notes_added, 0);

    let summary = engine.analyze_vault(&scan.vault_id).await?;
    assert_eq!(summary.graph_stats.notes, 0);

    let clusters = engine.find_clusters(&scan.vault_id, None).await?;
    assert!(clusters.is_empty());
    Ok(())
}

// Testable property: deleting a vault cascades to its notes, links, and tags.
#[tokio::test]
async fn deleting_a_vault_removes_its_notes() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "#x\n[[b]]\n");
    write_note(&root, "b.md", "# B\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    engine.delete_vault(&scan.vault_id).await?;

    let result = engine.get_vault_stats(&scan.vault_id).await;
    assert!(result.is_err());
    Ok(())
}

// Testable property: ego graphs stay within the requested hop radius.
#[tokio::test]
async fn ego_graph_respects_radius() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "[[b]]\n");
    write_note(&root, "b.md", "[[c]]\n");
    write_note(&root, "c.md", "[[d]]\n");
    write_note(&root, "d.md", "# D\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    engine.analyze_vault(&scan.vault_id).await?;

    let notes = engine.get_notes(&scan.vault_id, None, None).await?;
    let a = notes.iter().find(|n| n.relative_path == "a.md").unwrap();

    let ego = engine.get_ego_graph(&a.id, Some(1)).await?;
    let d = notes.iter().find(|n| n.relative_path == "d.md").unwrap();
    assert!(!ego.nodes.contains(&d.id), "d.md is two hops out, should be excluded at radius 1");

    let ego2 = engine.get_ego_graph(&a.id, Some(3)).await?;
    assert!(ego2.nodes.contains(&d.id));
    Ok(())
}

// Testable property: a link with a display alias (`[[target|Alias]]`) resolves
// on `target`, not on the alias text.
#[tokio::test]
async fn aliased_wikilink_resolves_on_target() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = new_vault(&temp);
    write_note(&root, "a.md", "See [[real-note|a friendlier name]].\n");
    write_note(&root, "real-note.md", "# Real\n");

    let engine = vault_engine::Engine::open_in_memory(EngineConfig::default())?;
    let scan = engine.scan_vault(&root, None).await?;
    let summary = engine.analyze_vault(&scan.vault_id).await?;

    assert_eq!(summary.link_stats.resolved, 1);
    assert_eq!(summary.link_stats.broken, 0);
    Ok(())
}
