mod cancel;
mod config;
mod error;
mod facade;
mod fields;
mod graph;
mod link_resolve;
mod model;
mod parse;
mod scanner;
mod store;
mod vault;

pub use crate::cancel::CancellationToken;
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::facade::{Engine, VaultLockRegistry};
pub use crate::fields::{FieldMap, FieldValue};
pub use crate::graph::{GraphEngine, GraphSnapshot};
pub use crate::link_resolve::Resolver;
pub use crate::model::{
    vault_id_for_path, AnalysisSummary, BrokenLink, Cluster, EgoGraph, FsMeta, GlobalStats,
    GraphMetricFields, GraphMetrics, GraphStats, Link, LinkId, LinkType, Note, NoteId,
    ResolutionNote, ResolveSummary, ScanCounts, ScanId, ScanResult, ScanStatus, Tag, TagId,
    VaultId, VaultRecord, VaultRef, VaultStats,
};
pub use crate::parse::markdown::{parse_note, ParsedNote, ParsedWikiLink};
pub use crate::scanner::Scanner;
pub use crate::store::Store;
pub use crate::vault::{discover_vaults, Vault, VaultPath};
