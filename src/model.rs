//! Value objects returned by the Store and Facade. Each derives `Serialize`/
//! `Deserialize` with snake_case keys (§6) and carries an explicit `from_row`
//! constructor rather than relying on reflective mapping (§9 design note).

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::fields::FieldMap;
use crate::Result;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(VaultId);
opaque_id!(NoteId);

impl Default for VaultId {
    fn default() -> Self {
        VaultId(String::new())
    }
}

pub type LinkId = i64;
pub type TagId = i64;
pub type ScanId = i64;

/// Identifies a vault either by its opaque id or by its absolute filesystem path.
pub enum VaultRef<'a> {
    Id(&'a VaultId),
    Path(&'a std::path::Path),
}

/// `id` is derived deterministically from the absolute path: the first 16 hex
/// characters of the SHA-256 digest of the path bytes.
pub fn vault_id_for_path(absolute_path: &std::path::Path) -> VaultId {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(absolute_path.as_os_str().as_encoded_bytes());
    VaultId(hex::encode(&digest[..8]))
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VaultRecord {
    pub id: VaultId,
    pub name: String,
    pub absolute_path: String,
    pub created_at: DateTime<Utc>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub note_count: i64,
    pub total_size_bytes: i64,
    pub metadata: FieldMap,
}

impl VaultRecord {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: VaultId(row.get("id")?),
            name: row.get("name")?,
            absolute_path: row.get("absolute_path")?,
            created_at: parse_timestamp(row.get::<_, String>("created_at")?),
            last_scanned_at: row
                .get::<_, Option<String>>("last_scanned_at")?
                .map(parse_timestamp),
            note_count: row.get("note_count")?,
            total_size_bytes: row.get("total_size_bytes")?,
            metadata: deserialize_fields(row.get::<_, Option<String>>("metadata")?),
        })
    }
}

/// Filesystem metadata captured by the Scanner at read time, passed through to
/// `Store::upsert_note` since the Store has no filesystem access of its own.
#[derive(Debug, Clone, Copy)]
pub struct FsMeta {
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Note {
    pub id: NoteId,
    pub vault_id: VaultId,
    pub relative_path: String,
    pub title: String,
    pub content_hash: String,
    pub word_count: i64,
    pub char_count: i64,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub scanned_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    pub metadata: FieldMap,
}

impl Note {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: NoteId(row.get("id")?),
            vault_id: VaultId(row.get("vault_id")?),
            relative_path: row.get("relative_path")?,
            title: row.get("title")?,
            content_hash: row.get("content_hash")?,
            word_count: row.get("word_count")?,
            char_count: row.get("char_count")?,
            size_bytes: row.get("size_bytes")?,
            created_at: parse_timestamp(row.get::<_, String>("created_at")?),
            modified_at: parse_timestamp(row.get::<_, String>("modified_at")?),
            scanned_at: parse_timestamp(row.get::<_, String>("scanned_at")?),
            tags: deserialize_string_list(row.get::<_, Option<String>>("tags_json")?),
            aliases: deserialize_string_list(row.get::<_, Option<String>>("aliases_json")?),
            metadata: deserialize_fields(row.get::<_, Option<String>>("metadata_json")?),
        })
    }
}

/// Slim projection of `Note` used to build the Resolver's lookup caches: avoids
/// pulling `metadata`/`content_hash` across the wire for notes that are only
/// ever used as link-resolution targets.
#[derive(Debug, Clone)]
pub struct ResolutionNote {
    pub id: NoteId,
    pub relative_path: String,
    pub title: String,
    pub aliases: Vec<String>,
}

impl ResolutionNote {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: NoteId(row.get("id")?),
            relative_path: row.get("relative_path")?,
            title: row.get("title")?,
            aliases: deserialize_string_list(row.get::<_, Option<String>>("aliases_json")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Internal,
    External,
    Broken,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Internal => "internal",
            LinkType::External => "external",
            LinkType::Broken => "broken",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "external" => LinkType::External,
            "broken" => LinkType::Broken,
            _ => LinkType::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Link {
    pub id: LinkId,
    pub source_note_id: NoteId,
    pub target_note_id: Option<NoteId>,
    pub target_path: String,
    pub link_type: LinkType,
    pub link_text: Option<String>,
}

impl Link {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            source_note_id: NoteId(row.get("source_note_id")?),
            target_note_id: row.get::<_, Option<String>>("target_note_id")?.map(NoteId),
            target_path: row.get("target_path")?,
            link_type: LinkType::from_str(&row.get::<_, String>("link_type")?),
            link_text: row.get("link_text")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Tag {
    pub id: TagId,
    pub tag: String,
    pub note_count: i64,
}

impl Tag {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            tag: row.get("tag")?,
            note_count: row.get("note_count")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphMetricFields {
    pub pagerank: f64,
    pub in_degree: i64,
    pub out_degree: i64,
    pub betweenness: f64,
    pub closeness: f64,
    pub clustering_coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphMetrics {
    pub note_id: NoteId,
    pub pagerank: f64,
    pub in_degree: i64,
    pub out_degree: i64,
    pub betweenness: f64,
    pub closeness: f64,
    pub clustering_coefficient: f64,
    pub computed_at: DateTime<Utc>,
}

impl GraphMetrics {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            note_id: NoteId(row.get("note_id")?),
            pagerank: row.get("pagerank")?,
            in_degree: row.get("in_degree")?,
            out_degree: row.get("out_degree")?,
            betweenness: row.get("betweenness")?,
            closeness: row.get("closeness")?,
            clustering_coefficient: row.get("clustering_coefficient")?,
            computed_at: parse_timestamp(row.get::<_, String>("computed_at")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScanCounts {
    pub notes_scanned: i64,
    pub notes_added: i64,
    pub notes_updated: i64,
    pub notes_deleted: i64,
    pub links_found: i64,
    pub tags_found: i64,
}

/// Outcome of a single `scan_vault` call.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScanResult {
    pub vault_id: VaultId,
    pub notes_scanned: usize,
    pub notes_added: usize,
    pub notes_updated: usize,
    pub notes_deleted: usize,
    pub links_found: usize,
    pub tags_found: usize,
    pub duration_seconds: f64,
    /// Per-file anomalies that did not stop the scan but are notable enough
    /// not to bury in `warnings` (e.g. a file's metadata becoming unreadable
    /// after its content was already read).
    pub errors: Vec<String>,
    /// Per-file conditions that are routine and expected (an unreadable
    /// file, a symlink pointing outside the vault).
    pub warnings: Vec<String>,
}

impl ScanResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VaultStats {
    pub vault_id: VaultId,
    pub note_count: i64,
    pub tag_count: i64,
    pub link_count: i64,
    pub broken_link_count: i64,
    pub total_size_bytes: i64,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// Aggregate across every vault in the store, returned by `stats` when no
/// vault is specified (§6: `get_vault_stats` or global aggregate).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GlobalStats {
    pub vault_count: i64,
    pub note_count: i64,
    pub tag_count: i64,
    pub link_count: i64,
    pub broken_link_count: i64,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResolveSummary {
    pub resolved: usize,
    pub broken: usize,
    pub total: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphStats {
    pub notes: usize,
    pub edges: usize,
    pub density: f64,
}

/// Returned by `analyze_vault`: the canonical resolve + build-graph + compute +
/// detect-clusters + persist pipeline, summarized.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisSummary {
    pub vault_id: VaultId,
    pub link_stats: ResolveSummary,
    pub graph_stats: GraphStats,
    pub clusters: Vec<Vec<NoteId>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokenLink {
    pub source_note_id: NoteId,
    pub source_relative_path: String,
    pub target_path: String,
    pub occurrences: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EgoGraph {
    pub center: NoteId,
    pub nodes: Vec<NoteId>,
    pub edges: Vec<(NoteId, NoteId)>,
}

pub(crate) fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn serialize_string_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

pub(crate) fn deserialize_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

pub(crate) fn serialize_fields(fields: &FieldMap) -> String {
    serde_json::to_string(fields).unwrap_or_else(|_| "{}".into())
}

pub(crate) fn deserialize_fields(raw: Option<String>) -> FieldMap {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(BTreeMap::new)
}

/// Weakly connected components, used by `find_clusters`.
pub type Cluster = HashSet<NoteId>;
