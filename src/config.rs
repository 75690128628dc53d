use std::path::{Path, PathBuf};

/// Tunable knobs for the engine, layered defaults < `config.toml` < environment.
///
/// Grounded on the teacher's `VaultConfig`/`Default` pattern, extended with the
/// graph-metric constants and store locations this spec's Store/GraphEngine need.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory names hard-excluded from traversal, in addition to `.obsidian`/`.git`/`node_modules`.
    pub ignore_dirs: Vec<String>,
    /// File extensions (without dot) that are considered notes.
    pub note_extensions: Vec<String>,
    /// Minimum total degree (in + out) for a note to count as a hub.
    pub hub_min_links: u32,
    /// PageRank damping factor.
    pub pagerank_damping: f64,
    /// PageRank convergence tolerance (L1 distance between iterations).
    pub pagerank_tolerance: f64,
    /// PageRank iteration cap.
    pub pagerank_max_iterations: usize,
    /// Default `min_size` for `find_clusters` when the caller does not specify one.
    pub default_cluster_min_size: usize,
    /// Default hop radius for `get_ego_graph` when the caller does not specify one.
    pub default_ego_radius: usize,
    /// Filename of the SQLite store within the config directory.
    pub store_filename: String,
    /// Filename of the "last opened vault" marker within the config directory.
    pub last_vault_filename: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: vec![".obsidian".into(), ".git".into(), "node_modules".into()],
            note_extensions: vec!["md".into()],
            hub_min_links: 10,
            pagerank_damping: 0.85,
            pagerank_tolerance: 1e-6,
            pagerank_max_iterations: 100,
            default_cluster_min_size: 3,
            default_ego_radius: 1,
            store_filename: "vault_db".into(),
            last_vault_filename: "last_vault".into(),
        }
    }
}

/// Mirror of [`EngineConfig`] with every field optional, deserialized from `config.toml`
/// and merged field-by-field over the defaults (the teacher's layered-config idiom,
/// generalized from one `VaultConfig::default()` call site to a three-layer merge).
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
struct PartialEngineConfig {
    ignore_dirs: Option<Vec<String>>,
    note_extensions: Option<Vec<String>>,
    hub_min_links: Option<u32>,
    pagerank_damping: Option<f64>,
    pagerank_tolerance: Option<f64>,
    pagerank_max_iterations: Option<usize>,
    default_cluster_min_size: Option<usize>,
    default_ego_radius: Option<usize>,
    store_filename: Option<String>,
    last_vault_filename: Option<String>,
}

impl EngineConfig {
    /// Resolve the config directory: `$VAULT_ENGINE_CONFIG_DIR`, else `~/.config/vault-engine/`.
    pub fn default_config_dir() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("VAULT_ENGINE_CONFIG_DIR") {
            return Some(PathBuf::from(dir));
        }
        let home = std::env::var_os("HOME")?;
        Some(PathBuf::from(home).join(".config").join("vault-engine"))
    }

    /// Load defaults, overlay `config.toml` under `config_dir` if present, then
    /// overlay `VAULT_ENGINE_<FIELD>` environment variables.
    pub fn load(config_dir: Option<&Path>) -> crate::Result<Self> {
        let mut cfg = Self::default();

        let dir = config_dir
            .map(Path::to_path_buf)
            .or_else(Self::default_config_dir);
        if let Some(dir) = dir {
            let path = dir.join("config.toml");
            if path.exists() {
                let text = std::fs::read_to_string(&path).map_err(|e| crate::Error::io(&path, e))?;
                let partial: PartialEngineConfig = toml::from_str(&text)
                    .map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))?;
                cfg.merge(partial);
            }
        }

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn merge(&mut self, partial: PartialEngineConfig) {
        if let Some(v) = partial.ignore_dirs {
            self.ignore_dirs = v;
        }
        if let Some(v) = partial.note_extensions {
            self.note_extensions = v;
        }
        if let Some(v) = partial.hub_min_links {
            self.hub_min_links = v;
        }
        if let Some(v) = partial.pagerank_damping {
            self.pagerank_damping = v;
        }
        if let Some(v) = partial.pagerank_tolerance {
            self.pagerank_tolerance = v;
        }
        if let Some(v) = partial.pagerank_max_iterations {
            self.pagerank_max_iterations = v;
        }
        if let Some(v) = partial.default_cluster_min_size {
            self.default_cluster_min_size = v;
        }
        if let Some(v) = partial.default_ego_radius {
            self.default_ego_radius = v;
        }
        if let Some(v) = partial.store_filename {
            self.store_filename = v;
        }
        if let Some(v) = partial.last_vault_filename {
            self.last_vault_filename = v;
        }
    }

    /// A malformed override is a warning, not a startup failure: this is operator
    /// convenience, not a required input.
    fn apply_env_overrides(&mut self) {
        macro_rules! override_parsed {
            ($env_suffix:literal, $field:expr) => {
                if let Ok(raw) = std::env::var(concat!("VAULT_ENGINE_", $env_suffix)) {
                    match raw.parse() {
                        Ok(v) => $field = v,
                        Err(_) => tracing::warn!(
                            var = concat!("VAULT_ENGINE_", $env_suffix),
                            value = %raw,
                            "ignoring malformed config override"
                        ),
                    }
                }
            };
        }

        override_parsed!("HUB_MIN_LINKS", self.hub_min_links);
        override_parsed!("PAGERANK_DAMPING", self.pagerank_damping);
        override_parsed!("PAGERANK_TOLERANCE", self.pagerank_tolerance);
        override_parsed!("PAGERANK_MAX_ITERATIONS", self.pagerank_max_iterations);
        override_parsed!("DEFAULT_CLUSTER_MIN_SIZE", self.default_cluster_min_size);
        override_parsed!("DEFAULT_EGO_RADIUS", self.default_ego_radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pagerank_damping, 0.85);
        assert_eq!(cfg.pagerank_tolerance, 1e-6);
        assert_eq!(cfg.pagerank_max_iterations, 100);
        assert_eq!(cfg.hub_min_links, 10);
        assert_eq!(cfg.default_cluster_min_size, 3);
        assert_eq!(cfg.default_ego_radius, 1);
    }

    #[test]
    fn merge_only_overwrites_present_fields() {
        let mut cfg = EngineConfig::default();
        cfg.merge(PartialEngineConfig {
            hub_min_links: Some(20),
            ..Default::default()
        });
        assert_eq!(cfg.hub_min_links, 20);
        assert_eq!(cfg.pagerank_damping, 0.85);
    }
}
