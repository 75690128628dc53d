//! Persistent relational store (C1). The single source of truth: every other
//! component acts through it rather than an in-memory index. Grounded on the
//! teacher's `sqlite.rs` transaction-per-mutation style, expanded from an
//! optional cache into the mandatory backing store and a proper schema with
//! foreign keys instead of hand-rolled cascading deletes.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{
    deserialize_fields, deserialize_string_list, parse_timestamp, serialize_fields,
    serialize_string_list, vault_id_for_path, FsMeta, GlobalStats, GraphMetricFields, GraphMetrics,
    Link, LinkId, LinkType, Note, NoteId, ResolutionNote, ScanCounts, ScanId, ScanStatus, Tag,
    TagId, VaultId, VaultRecord, VaultStats,
};
use crate::parse::markdown::{ParsedNote, ParsedWikiLink};
use crate::{BrokenLink, Error, Result};

const SCHEMA_VERSION: i64 = 1;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        let mut conn = Connection::open(path)?;
        Self::init_schema(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init_schema(&mut conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &mut Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

             CREATE TABLE IF NOT EXISTS vaults (
               id TEXT PRIMARY KEY,
               name TEXT NOT NULL,
               absolute_path TEXT NOT NULL UNIQUE,
               created_at TEXT NOT NULL,
               last_scanned_at TEXT,
               note_count INTEGER NOT NULL DEFAULT 0,
               total_size_bytes INTEGER NOT NULL DEFAULT 0,
               metadata TEXT NOT NULL DEFAULT '{}'
             );

             CREATE TABLE IF NOT EXISTS notes (
               id TEXT PRIMARY KEY,
               vault_id TEXT NOT NULL REFERENCES vaults(id) ON DELETE CASCADE,
               relative_path TEXT NOT NULL,
               title TEXT NOT NULL,
               content_hash TEXT NOT NULL,
               word_count INTEGER NOT NULL,
               char_count INTEGER NOT NULL,
               size_bytes INTEGER NOT NULL,
               created_at TEXT NOT NULL,
               modified_at TEXT NOT NULL,
               scanned_at TEXT NOT NULL,
               tags_json TEXT NOT NULL DEFAULT '[]',
               aliases_json TEXT NOT NULL DEFAULT '[]',
               metadata_json TEXT NOT NULL DEFAULT '{}',
               UNIQUE(vault_id, relative_path)
             );
             CREATE INDEX IF NOT EXISTS idx_notes_content_hash ON notes(content_hash);

             CREATE TABLE IF NOT EXISTS links (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               source_note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
               target_note_id TEXT REFERENCES notes(id) ON DELETE SET NULL,
               target_path TEXT NOT NULL,
               link_type TEXT NOT NULL,
               link_text TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_note_id);
             CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_note_id);

             CREATE TABLE IF NOT EXISTS tags (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               tag TEXT NOT NULL UNIQUE,
               note_count INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_tags_note_count ON tags(note_count DESC);

             CREATE TABLE IF NOT EXISTS note_tags (
               note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
               tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
               PRIMARY KEY (note_id, tag_id)
             );

             CREATE TABLE IF NOT EXISTS graph_metrics (
               note_id TEXT PRIMARY KEY REFERENCES notes(id) ON DELETE CASCADE,
               pagerank REAL NOT NULL,
               in_degree INTEGER NOT NULL,
               out_degree INTEGER NOT NULL,
               betweenness REAL NOT NULL,
               closeness REAL NOT NULL,
               clustering_coefficient REAL NOT NULL,
               computed_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_graph_metrics_pagerank ON graph_metrics(pagerank DESC);

             CREATE TABLE IF NOT EXISTS scan_history (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               vault_id TEXT NOT NULL REFERENCES vaults(id) ON DELETE CASCADE,
               started_at TEXT NOT NULL,
               completed_at TEXT,
               notes_scanned INTEGER NOT NULL DEFAULT 0,
               notes_added INTEGER NOT NULL DEFAULT 0,
               notes_updated INTEGER NOT NULL DEFAULT 0,
               notes_deleted INTEGER NOT NULL DEFAULT 0,
               links_found INTEGER NOT NULL DEFAULT 0,
               tags_found INTEGER NOT NULL DEFAULT 0,
               duration_seconds REAL NOT NULL DEFAULT 0,
               status TEXT NOT NULL,
               error_message TEXT
             );

             CREATE VIEW IF NOT EXISTS orphaned_notes AS
               SELECT n.* FROM notes n
               LEFT JOIN links l1 ON l1.source_note_id = n.id
               LEFT JOIN links l2 ON l2.target_note_id = n.id
               WHERE l1.id IS NULL AND l2.id IS NULL;

             CREATE VIEW IF NOT EXISTS hub_notes AS
               SELECT n.*, gm.in_degree, gm.out_degree FROM notes n
               JOIN graph_metrics gm ON gm.note_id = n.id
               WHERE gm.in_degree + gm.out_degree > 10
               ORDER BY (gm.in_degree + gm.out_degree) DESC;

             CREATE VIEW IF NOT EXISTS broken_links AS
               SELECT l.source_note_id AS source_note_id,
                      n.relative_path AS source_relative_path,
                      l.target_path AS target_path,
                      COUNT(*) AS occurrences
               FROM links l
               JOIN notes n ON n.id = l.source_note_id
               WHERE l.link_type = 'broken'
               GROUP BY l.source_note_id, l.target_path;
             ",
        )?;

        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| {
                r.get(0)
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version(version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(found) if found != SCHEMA_VERSION => {
                return Err(Error::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }

        Ok(())
    }

    // ---- mutations ----------------------------------------------------

    pub fn add_vault(&self, absolute_path: &Path, name: &str) -> Result<VaultId> {
        let id = vault_id_for_path(absolute_path);
        self.conn.execute(
            "INSERT INTO vaults(id, name, absolute_path, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(absolute_path) DO UPDATE SET name = excluded.name",
            params![
                id.0,
                name,
                absolute_path.to_string_lossy(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Identifies the note by `(vault_id, relative_path)`. Returns `was_new`.
    /// Maintains `Vault.note_count`/`total_size_bytes` atomically, per the
    /// Store's counter-maintenance contract.
    pub fn upsert_note(
        &mut self,
        vault_id: &VaultId,
        relative_path: &str,
        parsed: &ParsedNote,
        fs_meta: FsMeta,
    ) -> Result<(NoteId, bool)> {
        let tx = self.conn.transaction()?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT id, size_bytes FROM notes WHERE vault_id = ?1 AND relative_path = ?2",
                params![vault_id.0, relative_path],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let tags_json = serialize_string_list(&parsed.tags);
        let aliases_json = serialize_string_list(&parsed.aliases);
        let metadata_json = serialize_fields(&parsed.frontmatter);
        let now = chrono::Utc::now().to_rfc3339();

        let (note_id, was_new) = match existing {
            Some((id, old_size)) => {
                tx.execute(
                    "UPDATE notes SET title = ?1, content_hash = ?2, word_count = ?3, char_count = ?4,
                         size_bytes = ?5, modified_at = ?6, scanned_at = ?7, tags_json = ?8,
                         aliases_json = ?9, metadata_json = ?10
                     WHERE id = ?11",
                    params![
                        parsed.title,
                        parsed.content_hash,
                        parsed.word_count as i64,
                        parsed.char_count as i64,
                        fs_meta.size_bytes,
                        fs_meta.modified_at.to_rfc3339(),
                        now,
                        tags_json,
                        aliases_json,
                        metadata_json,
                        id,
                    ],
                )?;
                let delta = fs_meta.size_bytes - old_size;
                if delta != 0 {
                    tx.execute(
                        "UPDATE vaults SET total_size_bytes = total_size_bytes + ?1 WHERE id = ?2",
                        params![delta, vault_id.0],
                    )?;
                }
                (NoteId(id), false)
            }
            None => {
                let id = format!("{}:{}", vault_id.0, relative_path);
                tx.execute(
                    "INSERT INTO notes(id, vault_id, relative_path, title, content_hash, word_count,
                         char_count, size_bytes, created_at, modified_at, scanned_at, tags_json,
                         aliases_json, metadata_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        id,
                        vault_id.0,
                        relative_path,
                        parsed.title,
                        parsed.content_hash,
                        parsed.word_count as i64,
                        parsed.char_count as i64,
                        fs_meta.size_bytes,
                        fs_meta.created_at.to_rfc3339(),
                        fs_meta.modified_at.to_rfc3339(),
                        now,
                        tags_json,
                        aliases_json,
                        metadata_json,
                    ],
                )?;
                tx.execute(
                    "UPDATE vaults SET note_count = note_count + 1, total_size_bytes = total_size_bytes + ?1
                     WHERE id = ?2",
                    params![fs_meta.size_bytes, vault_id.0],
                )?;
                (NoteId(id), true)
            }
        };

        Self::reconcile_note_tags(&tx, &note_id, &parsed.tags)?;

        tx.commit()?;
        Ok((note_id, was_new))
    }

    /// Delete rows for tags no longer present, insert rows for new ones, matching
    /// the teacher's diff-style reconciliation rather than a blanket delete+reinsert.
    fn reconcile_note_tags(
        tx: &rusqlite::Transaction<'_>,
        note_id: &NoteId,
        tags: &[String],
    ) -> Result<()> {
        let mut have_stmt = tx.prepare(
            "SELECT t.id, t.tag FROM tags t JOIN note_tags nt ON nt.tag_id = t.id WHERE nt.note_id = ?1",
        )?;
        let have: HashMap<String, TagId> = have_stmt
            .query_map(params![note_id.0], |r| Ok((r.get::<_, String>(1)?, r.get(0)?)))?
            .collect::<std::result::Result<_, _>>()?;
        drop(have_stmt);

        let want: std::collections::HashSet<&String> = tags.iter().collect();

        for (tag, tag_id) in &have {
            if !want.contains(tag) {
                tx.execute(
                    "DELETE FROM note_tags WHERE note_id = ?1 AND tag_id = ?2",
                    params![note_id.0, tag_id],
                )?;
                tx.execute(
                    "UPDATE tags SET note_count = note_count - 1 WHERE id = ?1",
                    params![tag_id],
                )?;
            }
        }

        for tag in tags {
            if have.contains_key(tag) {
                continue;
            }
            tx.execute(
                "INSERT INTO tags(tag, note_count) VALUES (?1, 0)
                 ON CONFLICT(tag) DO NOTHING",
                params![tag],
            )?;
            let tag_id: TagId = tx.query_row(
                "SELECT id FROM tags WHERE tag = ?1",
                params![tag],
                |r| r.get(0),
            )?;
            tx.execute(
                "INSERT INTO note_tags(note_id, tag_id) VALUES (?1, ?2)",
                params![note_id.0, tag_id],
            )?;
            tx.execute(
                "UPDATE tags SET note_count = note_count + 1 WHERE id = ?1",
                params![tag_id],
            )?;
        }

        Ok(())
    }

    pub fn delete_note(&mut self, note_id: &NoteId) -> Result<()> {
        let tx = self.conn.transaction()?;
        let row: Option<(String, i64)> = tx
            .query_row(
                "SELECT vault_id, size_bytes FROM notes WHERE id = ?1",
                params![note_id.0],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((vault_id, size_bytes)) = row else {
            return Err(Error::NoteNotFound(note_id.0.clone()));
        };

        let tag_ids: Vec<TagId> = tx
            .prepare("SELECT tag_id FROM note_tags WHERE note_id = ?1")?
            .query_map(params![note_id.0], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        for tag_id in tag_ids {
            tx.execute(
                "UPDATE tags SET note_count = note_count - 1 WHERE id = ?1",
                params![tag_id],
            )?;
        }

        tx.execute("DELETE FROM notes WHERE id = ?1", params![note_id.0])?;
        tx.execute(
            "UPDATE vaults SET note_count = note_count - 1, total_size_bytes = total_size_bytes - ?1
             WHERE id = ?2",
            params![size_bytes, vault_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes all outbound links of `source_note_id` and inserts `links` as
    /// unresolved `internal` rows (`target_note_id = NULL`). The Resolver pass
    /// sets targets afterward via `update_link_target`.
    pub fn replace_links(&mut self, source_note_id: &NoteId, links: &[ParsedWikiLink]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM links WHERE source_note_id = ?1",
            params![source_note_id.0],
        )?;
        for link in links {
            tx.execute(
                "INSERT INTO links(source_note_id, target_note_id, target_path, link_type, link_text)
                 VALUES (?1, NULL, ?2, 'internal', ?3)",
                params![source_note_id.0, link.target, link.display],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn update_link_target(
        &self,
        link_id: LinkId,
        target_note_id: Option<&NoteId>,
        link_type: LinkType,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE links SET target_note_id = ?1, link_type = ?2 WHERE id = ?3",
            params![target_note_id.map(|n| n.0.as_str()), link_type.as_str(), link_id],
        )?;
        Ok(())
    }

    pub fn upsert_graph_metric(&self, note_id: &NoteId, metric: &GraphMetricFields) -> Result<()> {
        self.conn.execute(
            "INSERT INTO graph_metrics(note_id, pagerank, in_degree, out_degree, betweenness,
                 closeness, clustering_coefficient, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(note_id) DO UPDATE SET
               pagerank = excluded.pagerank,
               in_degree = excluded.in_degree,
               out_degree = excluded.out_degree,
               betweenness = excluded.betweenness,
               closeness = excluded.closeness,
               clustering_coefficient = excluded.clustering_coefficient,
               computed_at = excluded.computed_at",
            params![
                note_id.0,
                metric.pagerank,
                metric.in_degree,
                metric.out_degree,
                metric.betweenness,
                metric.closeness,
                metric.clustering_coefficient,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn begin_scan(&self, vault_id: &VaultId) -> Result<ScanId> {
        self.conn.execute(
            "INSERT INTO scan_history(vault_id, started_at, status) VALUES (?1, ?2, ?3)",
            params![vault_id.0, chrono::Utc::now().to_rfc3339(), ScanStatus::Running.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn complete_scan(&self, scan_id: ScanId, counts: &ScanCounts, duration_seconds: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE scan_history SET completed_at = ?1, status = ?2, notes_scanned = ?3,
                 notes_added = ?4, notes_updated = ?5, notes_deleted = ?6, links_found = ?7,
                 tags_found = ?8, duration_seconds = ?9
             WHERE id = ?10",
            params![
                chrono::Utc::now().to_rfc3339(),
                ScanStatus::Completed.as_str(),
                counts.notes_scanned,
                counts.notes_added,
                counts.notes_updated,
                counts.notes_deleted,
                counts.links_found,
                counts.tags_found,
                duration_seconds,
                scan_id,
            ],
        )?;
        Ok(())
    }

    pub fn fail_scan(&self, scan_id: ScanId, msg: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE scan_history SET completed_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![
                chrono::Utc::now().to_rfc3339(),
                ScanStatus::Failed.as_str(),
                msg,
                scan_id,
            ],
        )?;
        Ok(())
    }

    pub fn touch_vault_scanned(&self, vault_id: &VaultId) -> Result<()> {
        self.conn.execute(
            "UPDATE vaults SET last_scanned_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), vault_id.0],
        )?;
        Ok(())
    }

    // ---- reads ----------------------------------------------------------

    pub fn list_vaults(&self) -> Result<Vec<VaultRecord>> {
        let mut stmt = self.conn.prepare("SELECT * FROM vaults ORDER BY name")?;
        let rows = stmt
            .query_map([], |r| Ok(VaultRecord::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn get_vault(&self, vault_id: &VaultId) -> Result<VaultRecord> {
        self.conn
            .query_row("SELECT * FROM vaults WHERE id = ?1", params![vault_id.0], |r| {
                Ok(VaultRecord::from_row(r))
            })
            .optional()?
            .ok_or_else(|| Error::VaultNotFound(vault_id.0.clone()))?
    }

    pub fn get_vault_by_path(&self, absolute_path: &Path) -> Result<Option<VaultRecord>> {
        self.conn
            .query_row(
                "SELECT * FROM vaults WHERE absolute_path = ?1",
                params![absolute_path.to_string_lossy()],
                |r| Ok(VaultRecord::from_row(r)),
            )
            .optional()?
            .transpose()
    }

    /// Deletes the vault row; `ON DELETE CASCADE` foreign keys take care of
    /// its notes, links, note_tags, graph_metrics and scan_history rows.
    pub fn delete_vault(&self, vault_id: &VaultId) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM vaults WHERE id = ?1", params![vault_id.0])?;
        if changed == 0 {
            return Err(Error::VaultNotFound(vault_id.0.clone()));
        }
        Ok(())
    }

    pub fn get_notes(&self, vault_id: &VaultId) -> Result<Vec<Note>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM notes WHERE vault_id = ?1 ORDER BY relative_path")?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(Note::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn get_note(&self, note_id: &NoteId) -> Result<Note> {
        self.conn
            .query_row("SELECT * FROM notes WHERE id = ?1", params![note_id.0], |r| {
                Ok(Note::from_row(r))
            })
            .optional()?
            .ok_or_else(|| Error::NoteNotFound(note_id.0.clone()))?
    }

    pub fn get_vault_stats(&self, vault_id: &VaultId) -> Result<VaultStats> {
        let vault = self.get_vault(vault_id)?;
        let tag_count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT nt.tag_id) FROM note_tags nt
             JOIN notes n ON n.id = nt.note_id WHERE n.vault_id = ?1",
            params![vault_id.0],
            |r| r.get(0),
        )?;
        let link_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM links l JOIN notes n ON n.id = l.source_note_id WHERE n.vault_id = ?1",
            params![vault_id.0],
            |r| r.get(0),
        )?;
        let broken_link_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM links l JOIN notes n ON n.id = l.source_note_id
             WHERE n.vault_id = ?1 AND l.link_type = 'broken'",
            params![vault_id.0],
            |r| r.get(0),
        )?;

        Ok(VaultStats {
            vault_id: vault.id,
            note_count: vault.note_count,
            tag_count,
            link_count,
            broken_link_count,
            total_size_bytes: vault.total_size_bytes,
            last_scanned_at: vault.last_scanned_at,
        })
    }

    /// Totals across every vault in the store, for `stats` with no `--vault` given.
    pub fn global_stats(&self) -> Result<GlobalStats> {
        let vault_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM vaults", [], |r| r.get(0))?;
        let note_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?;
        let tag_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
        let link_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?;
        let broken_link_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM links WHERE link_type = 'broken'",
            [],
            |r| r.get(0),
        )?;
        let total_size_bytes: i64 = self
            .conn
            .query_row("SELECT COALESCE(SUM(total_size_bytes), 0) FROM vaults", [], |r| {
                r.get(0)
            })?;

        Ok(GlobalStats {
            vault_count,
            note_count,
            tag_count,
            link_count,
            broken_link_count,
            total_size_bytes,
        })
    }

    /// `relative_path -> content_hash` for every note currently stored in the vault.
    pub fn known_paths(&self, vault_id: &VaultId) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT relative_path, content_hash FROM notes WHERE vault_id = ?1")?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<HashMap<String, String>, _>>()?;
        Ok(rows)
    }

    /// Also returns the note's own id, needed by the Scanner to key `known_paths`
    /// entries back to `NoteId` for deletion.
    pub fn known_path_ids(&self, vault_id: &VaultId) -> Result<HashMap<String, NoteId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT relative_path, id FROM notes WHERE vault_id = ?1")?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| {
                Ok((r.get::<_, String>(0)?, NoteId(r.get::<_, String>(1)?)))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn notes_for_resolution(&self, vault_id: &VaultId) -> Result<Vec<ResolutionNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, relative_path, title, aliases_json FROM notes WHERE vault_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(ResolutionNote::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn internal_links_for_vault(&self, vault_id: &VaultId) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.* FROM links l JOIN notes n ON n.id = l.source_note_id WHERE n.vault_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(Link::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Links still awaiting resolution (`target_note_id IS NULL` and not yet
    /// marked broken). Used by the Resolver so a repeated `resolve_vault` call
    /// only touches unresolved rows.
    pub fn unresolved_links_for_vault(&self, vault_id: &VaultId) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.* FROM links l JOIN notes n ON n.id = l.source_note_id
             WHERE n.vault_id = ?1 AND l.target_note_id IS NULL AND l.link_type != 'broken'",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(Link::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn orphaned_notes(&self, vault_id: &VaultId) -> Result<Vec<Note>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM orphaned_notes WHERE vault_id = ?1 ORDER BY relative_path")?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(Note::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn hub_notes(&self, vault_id: &VaultId, min_links: i64) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT n.* FROM notes n JOIN graph_metrics gm ON gm.note_id = n.id
             WHERE n.vault_id = ?1 AND (gm.in_degree + gm.out_degree) >= ?2
             ORDER BY (gm.in_degree + gm.out_degree) DESC",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0, min_links], |r| Ok(Note::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn broken_links(&self, vault_id: &VaultId) -> Result<Vec<BrokenLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT bl.* FROM broken_links bl
             JOIN notes n ON n.id = bl.source_note_id
             WHERE n.vault_id = ?1
             ORDER BY bl.occurrences DESC",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| {
                Ok(BrokenLink {
                    source_note_id: NoteId(r.get("source_note_id")?),
                    source_relative_path: r.get("source_relative_path")?,
                    target_path: r.get("target_path")?,
                    occurrences: r.get("occurrences")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn tag_counts(&self, vault_id: &VaultId) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.tag, COUNT(nt.note_id) AS note_count
             FROM tags t
             JOIN note_tags nt ON nt.tag_id = t.id
             JOIN notes n ON n.id = nt.note_id
             WHERE n.vault_id = ?1
             GROUP BY t.id
             ORDER BY note_count DESC",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(Tag::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn get_graph_metrics(&self, vault_id: &VaultId) -> Result<Vec<GraphMetrics>> {
        let mut stmt = self.conn.prepare(
            "SELECT gm.* FROM graph_metrics gm JOIN notes n ON n.id = gm.note_id WHERE n.vault_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![vault_id.0], |r| Ok(GraphMetrics::from_row(r)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn get_note_metrics(&self, note_id: &NoteId) -> Result<GraphMetrics> {
        self.conn
            .query_row(
                "SELECT * FROM graph_metrics WHERE note_id = ?1",
                params![note_id.0],
                |r| Ok(GraphMetrics::from_row(r)),
            )
            .optional()?
            .ok_or_else(|| Error::NoteNotFound(note_id.0.clone()))?
    }

    /// Writes every node's metrics in one transaction, so a GraphEngine
    /// caller never observes a vault with some notes updated and others
    /// stale. Rolls back entirely on the first failure.
    pub fn persist_graph_metrics(&mut self, metrics: &[(NoteId, GraphMetricFields)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        for (note_id, metric) in metrics {
            tx.execute(
                "INSERT INTO graph_metrics(note_id, pagerank, in_degree, out_degree, betweenness,
                     closeness, clustering_coefficient, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(note_id) DO UPDATE SET
                   pagerank = excluded.pagerank,
                   in_degree = excluded.in_degree,
                   out_degree = excluded.out_degree,
                   betweenness = excluded.betweenness,
                   closeness = excluded.closeness,
                   clustering_coefficient = excluded.clustering_coefficient,
                   computed_at = excluded.computed_at",
                params![
                    note_id.0,
                    metric.pagerank,
                    metric.in_degree,
                    metric.out_degree,
                    metric.betweenness,
                    metric.closeness,
                    metric.clustering_coefficient,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FsMeta;
    use chrono::Utc;

    fn sample_fs_meta(size: i64) -> FsMeta {
        FsMeta {
            created_at: Utc::now(),
            modified_at: Utc::now(),
            size_bytes: size,
        }
    }

    #[test]
    fn add_vault_is_idempotent_by_path() {
        let store = Store::open_in_memory().unwrap();
        let path = Path::new("/tmp/my-vault");
        let a = store.add_vault(path, "my-vault").unwrap();
        let b = store.add_vault(path, "renamed").unwrap();
        assert_eq!(a, b);
        let record = store.get_vault(&a).unwrap();
        assert_eq!(record.name, "renamed");
    }

    #[test]
    fn upsert_note_increments_vault_note_count_once() {
        let mut store = Store::open_in_memory().unwrap();
        let vault_id = store.add_vault(Path::new("/tmp/v"), "v").unwrap();
        let parsed = crate::parse::markdown::parse_note("a.md", b"# A\nbody");

        let (note_id, was_new) = store
            .upsert_note(&vault_id, "a.md", &parsed, sample_fs_meta(100))
            .unwrap();
        assert!(was_new);

        let (_, was_new_again) = store
            .upsert_note(&vault_id, "a.md", &parsed, sample_fs_meta(100))
            .unwrap();
        assert!(!was_new_again);

        let vault = store.get_vault(&vault_id).unwrap();
        assert_eq!(vault.note_count, 1);
        assert_eq!(vault.total_size_bytes, 100);

        store.delete_note(&note_id).unwrap();
        let vault = store.get_vault(&vault_id).unwrap();
        assert_eq!(vault.note_count, 0);
        assert_eq!(vault.total_size_bytes, 0);
    }

    #[test]
    fn tag_counts_follow_note_tag_reconciliation() {
        let mut store = Store::open_in_memory().unwrap();
        let vault_id = store.add_vault(Path::new("/tmp/v"), "v").unwrap();

        let p1 = crate::parse::markdown::parse_note("a.md", b"---\ntags: [x, y]\n---\nbody");
        store.upsert_note(&vault_id, "a.md", &p1, sample_fs_meta(10)).unwrap();
        let tags = store.tag_counts(&vault_id).unwrap();
        assert_eq!(tags.len(), 2);

        let p2 = crate::parse::markdown::parse_note("a.md", b"---\ntags: [x]\n---\nbody");
        store.upsert_note(&vault_id, "a.md", &p2, sample_fs_meta(10)).unwrap();
        let tags = store.tag_counts(&vault_id).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag, "x");
    }

    #[test]
    fn replace_links_then_resolve_marks_targets() {
        let mut store = Store::open_in_memory().unwrap();
        let vault_id = store.add_vault(Path::new("/tmp/v"), "v").unwrap();

        let a = crate::parse::markdown::parse_note("a.md", b"see [[b]]");
        let (a_id, _) = store.upsert_note(&vault_id, "a.md", &a, sample_fs_meta(1)).unwrap();
        store.replace_links(&a_id, &a.wikilinks).unwrap();

        let b = crate::parse::markdown::parse_note("b.md", b"# B");
        let (b_id, _) = store.upsert_note(&vault_id, "b.md", &b, sample_fs_meta(1)).unwrap();

        let unresolved = store.unresolved_links_for_vault(&vault_id).unwrap();
        assert_eq!(unresolved.len(), 1);
        store
            .update_link_target(unresolved[0].id, Some(&b_id), LinkType::Internal)
            .unwrap();

        let links = store.internal_links_for_vault(&vault_id).unwrap();
        assert_eq!(links[0].target_note_id, Some(b_id));
    }

    #[test]
    fn schema_mismatch_is_detected_on_reopen_with_different_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let _store = Store::open(&path).unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE schema_version SET version = 999", [])
                .unwrap();
        }
        let err = Store::open(&path).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }
}
