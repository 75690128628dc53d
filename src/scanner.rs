//! Scanner (C3): makes the Store reflect the current filesystem state of a
//! vault. Grounded on the teacher's `VaultIndex::scan`/`walk_markdown_files`
//! enumeration (`walkdir`, hard-excluded `.obsidian`/`.git`/`node_modules`,
//! sorted by relative path), rewritten against the Store instead of an
//! in-memory index and extended with `ScanRun` bookkeeping.

use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::model::{FsMeta, ScanCounts, ScanResult};
use crate::vault::Vault;
use crate::{Error, Result, Store};

const HARD_EXCLUDED_DIRS: [&str; 3] = [".obsidian", ".git", "node_modules"];

pub struct Scanner<'a> {
    store: &'a mut Store,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a mut Store) -> Self {
        Self { store }
    }

    /// Scan `vault_root`, creating the `Vault` row on first sight, and bring
    /// the Store's notes/links/tags for it in line with the filesystem.
    pub fn scan(&mut self, vault_root: &Path, display_name: Option<&str>) -> Result<ScanResult> {
        self.scan_cancellable(vault_root, display_name, None)
    }

    /// Like [`Self::scan`], but checks `cancellation` at file-boundary (§5).
    /// On cancellation the `ScanRun` is marked failed with `"cancelled"` and
    /// the caller gets a `ScanError`; no note/link/tag row for this scan is
    /// left half-written, since every file's writes are their own transaction.
    pub fn scan_cancellable(
        &mut self,
        vault_root: &Path,
        display_name: Option<&str>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<ScanResult> {
        let start = std::time::Instant::now();
        let vault = Vault::open(vault_root)?;
        let name = display_name
            .map(str::to_string)
            .or_else(|| {
                vault
                    .root()
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| vault.root().to_string_lossy().to_string());

        let vault_id = self.store.add_vault(vault.root(), &name)?;
        let scan_id = self.store.begin_scan(&vault_id)?;

        match self.run_scan(&vault_id, &vault, cancellation) {
            Ok(mut result) => {
                result.vault_id = vault_id.clone();
                result.duration_seconds = start.elapsed().as_secs_f64();
                let counts = ScanCounts {
                    notes_scanned: result.notes_scanned as i64,
                    notes_added: result.notes_added as i64,
                    notes_updated: result.notes_updated as i64,
                    notes_deleted: result.notes_deleted as i64,
                    links_found: result.links_found as i64,
                    tags_found: result.tags_found as i64,
                };
                self.store.complete_scan(scan_id, &counts, result.duration_seconds)?;
                self.store.touch_vault_scanned(&vault_id)?;
                Ok(result)
            }
            Err(Error::ScanError(msg)) if msg == "cancelled" => {
                let _ = self.store.fail_scan(scan_id, "cancelled");
                Err(Error::ScanError(msg))
            }
            Err(e) => {
                let _ = self.store.fail_scan(scan_id, &e.to_string());
                Err(Error::ScanError(e.to_string()))
            }
        }
    }

    fn run_scan(
        &mut self,
        vault_id: &crate::VaultId,
        vault: &Vault,
        cancellation: Option<&CancellationToken>,
    ) -> Result<ScanResult> {
        let mut result = ScanResult::default();

        let current_paths = enumerate_markdown_files(vault.root(), &mut result.warnings);
        let known_paths = self.store.known_paths(vault_id)?;
        let known_path_ids = self.store.known_path_ids(vault_id)?;

        for relative_path in &current_paths {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::ScanError("cancelled".into()));
            }

            let absolute = vault.root().join(relative_path);
            let bytes = match std::fs::read(&absolute) {
                Ok(b) => b,
                Err(e) => {
                    result.warnings.push(format!("{relative_path}: read failed: {e}"));
                    continue;
                }
            };

            let parsed = crate::parse::markdown::parse_note(relative_path, &bytes);
            result.notes_scanned += 1;

            let is_new = !known_paths.contains_key(relative_path);
            let changed = known_paths
                .get(relative_path)
                .map(|hash| hash != &parsed.content_hash)
                .unwrap_or(true);
            if !is_new && !changed {
                continue;
            }

            let metadata = match std::fs::metadata(&absolute) {
                Ok(m) => m,
                Err(e) => {
                    // Content was read successfully just above; metadata failing now
                    // means the file vanished or changed permissions mid-scan. Skip
                    // just this file rather than failing the whole scan.
                    result.errors.push(format!("{relative_path}: metadata failed: {e}"));
                    continue;
                }
            };
            let fs_meta = FsMeta {
                created_at: metadata
                    .created()
                    .map(chrono::DateTime::<chrono::Utc>::from)
                    .unwrap_or_else(|_| chrono::Utc::now()),
                modified_at: metadata
                    .modified()
                    .map(chrono::DateTime::<chrono::Utc>::from)
                    .unwrap_or_else(|_| chrono::Utc::now()),
                size_bytes: metadata.len() as i64,
            };

            let (note_id, was_new) =
                self.store.upsert_note(vault_id, relative_path, &parsed, fs_meta)?;
            self.store.replace_links(&note_id, &parsed.wikilinks)?;

            result.links_found += parsed.wikilinks.len();
            result.tags_found += parsed.tags.len();
            if was_new {
                result.notes_added += 1;
            } else {
                result.notes_updated += 1;
            }
        }

        for (relative_path, note_id) in &known_path_ids {
            if !current_paths.contains(relative_path) {
                self.store.delete_note(note_id)?;
                result.notes_deleted += 1;
            }
        }

        Ok(result)
    }
}

/// Enumerate `.md` files under `root`, excluding `.obsidian`/`.git`/`node_modules`,
/// sorted by relative (forward-slash) path. Unreadable directory entries and
/// symlinks pointing outside `root` are recorded as warnings and skipped.
fn enumerate_markdown_files(root: &Path, warnings: &mut Vec<String>) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !HARD_EXCLUDED_DIRS.iter().any(|ex| ex == &name)
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warnings.push(format!("walk error: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        if entry.path_is_symlink() {
            match std::fs::canonicalize(path) {
                Ok(target) if target.starts_with(root) => {}
                _ => {
                    warnings.push(format!(
                        "{}: symlink points outside the vault, skipped",
                        path.display()
                    ));
                    continue;
                }
            }
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        paths.insert(relative.to_string_lossy().replace('\\', "/"));
    }

    paths
}
