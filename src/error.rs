use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault not found: {0}")]
    VaultNotFound(String),

    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("scan failed: {0}")]
    ScanError(String),

    #[error("analysis failed: {0}")]
    AnalysisError(String),

    #[error("store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("schema mismatch: store is at version {found}, code expects {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The kind name used in `--json` error output and for exit-code mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::VaultNotFound(_) => "VaultNotFound",
            Error::NoteNotFound(_) => "NoteNotFound",
            Error::InvalidPath(_) => "InvalidPath",
            Error::ScanError(_) => "ScanError",
            Error::AnalysisError(_) => "AnalysisError",
            Error::StoreError(_) => "StoreError",
            Error::SchemaMismatch { .. } => "SchemaMismatch",
            Error::Io { .. } => "Io",
            Error::Config(_) => "Config",
        }
    }

    /// `true` for "not found" style errors, which the CLI maps to exit code 2.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::VaultNotFound(_) | Error::NoteNotFound(_))
    }
}
