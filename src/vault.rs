use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::{Error, Result};

const HARD_EXCLUDED_DIRS: [&str; 3] = [".obsidian", ".git", "node_modules"];

/// A path relative to a vault root, normalized (no `..`, no absolute prefix).
///
/// Grounded on the teacher's `VaultPath` newtype; kept near-verbatim since the
/// normalization rules (reject absolute, reject traversal, collapse `.`) are
/// exactly what the Scanner and Resolver both need.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaultPath(PathBuf);

impl VaultPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn as_str_lossy(&self) -> String {
        self.0.to_string_lossy().replace('\\', "/")
    }
}

impl TryFrom<&Path> for VaultPath {
    type Error = Error;

    fn try_from(value: &Path) -> Result<Self> {
        if value.as_os_str().is_empty() {
            return Err(Error::InvalidPath("empty path".into()));
        }
        if value.is_absolute() {
            return Err(Error::InvalidPath("absolute paths are not allowed".into()));
        }

        let mut cleaned = PathBuf::new();
        for c in value.components() {
            match c {
                Component::Prefix(_) | Component::RootDir => {
                    return Err(Error::InvalidPath("absolute paths are not allowed".into()));
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::InvalidPath("path traversal is not allowed".into()));
                }
                Component::Normal(part) => cleaned.push(part),
            }
        }

        if cleaned.as_os_str().is_empty() {
            return Err(Error::InvalidPath("empty path".into()));
        }

        Ok(Self(cleaned))
    }
}

/// A vault directory on disk, identified by its canonicalized absolute path.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() || !root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "{} does not exist or is not a directory",
                root.display()
            )));
        }
        let root = std::fs::canonicalize(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn to_abs(&self, rel: &VaultPath) -> PathBuf {
        self.root.join(rel.as_path())
    }

    pub fn to_rel(&self, abs: &Path) -> Result<VaultPath> {
        let abs = if abs.is_absolute() {
            abs.to_path_buf()
        } else {
            self.root.join(abs)
        };
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| Error::InvalidPath(format!("{} is outside the vault", abs.display())))?;
        VaultPath::try_from(rel)
    }

    /// Whether `path` is itself a vault root: a directory containing `.obsidian`.
    pub fn is_vault_root(path: &Path) -> bool {
        path.is_dir() && path.join(".obsidian").is_dir()
    }
}

/// Given a root directory, find every directory under it (root included) whose
/// immediate subtree contains a `.obsidian` directory. Does not descend into
/// `.git`, `node_modules`, or any `.obsidian` directory. Returns canonicalized,
/// lexicographically sorted absolute paths. Does not mutate anything.
pub fn discover_vaults(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() || !root.is_dir() {
        return Err(Error::InvalidPath(format!(
            "{} does not exist or is not a directory",
            root.display()
        )));
    }
    let root = std::fs::canonicalize(root).map_err(|e| Error::io(root, e))?;

    let mut found = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(false)
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
            Err(_) => continue,
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if Vault::is_vault_root(entry.path()) {
            if let Ok(p) = std::fs::canonicalize(entry.path()) {
                found.push(p);
            }
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}
