//! Reference Data
//!
//! In-memory symbol → `{id, name}` lookup, optionally loaded from a JSON
//! file of the form:
//!
//! ```json
//! [{"symbol": "005930", "id": 1, "name": "Samsung Electronics"}]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Deserialize;

use crate::application::ports::ReferenceLookup;
use crate::domain::tick::{CompanyRef, Symbol};

/// Errors loading reference data.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    /// The file could not be read.
    #[error("failed to read reference data {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid reference list.
    #[error("invalid reference data {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ReferenceEntry {
    symbol: Symbol,
    id: i64,
    name: String,
}

/// Thread-safe in-memory reference lookup.
#[derive(Debug, Default)]
pub struct InMemoryReferenceLookup {
    entries: RwLock<HashMap<Symbol, CompanyRef>>,
}

impl InMemoryReferenceLookup {
    /// Create an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<ReferenceEntry> =
            serde_json::from_str(&raw).map_err(|source| ReferenceError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let lookup = Self::new();
        for entry in entries {
            lookup.insert(entry.symbol, CompanyRef::new(entry.id, entry.name));
        }
        tracing::info!(path = %path.display(), symbols = lookup.len(), "Loaded reference data");
        Ok(lookup)
    }

    /// Insert or replace an entry.
    pub fn insert(&self, symbol: impl Into<Symbol>, company: CompanyRef) {
        self.entries.write().insert(symbol.into(), company);
    }

    /// Number of known symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no symbols are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Known symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.entries.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl ReferenceLookup for InMemoryReferenceLookup {
    fn lookup(&self, symbol: &str) -> Option<CompanyRef> {
        self.entries.read().get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_entries_from_file() {
        let file = write_file(
            r#"[
                {"symbol": "005930", "id": 1, "name": "Samsung Electronics"},
                {"symbol": "000660", "id": 2, "name": "SK hynix"}
            ]"#,
        );

        let lookup = InMemoryReferenceLookup::from_json_file(file.path()).unwrap();

        assert_eq!(lookup.len(), 2);
        assert_eq!(
            lookup.lookup("005930"),
            Some(CompanyRef::new(1, "Samsung Electronics"))
        );
        assert_eq!(lookup.symbols(), vec!["000660", "005930"]);
        assert!(lookup.lookup("035420").is_none());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            InMemoryReferenceLookup::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ReferenceError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let file = write_file(r#"[{"symbol": "005930", "id": "one"}]"#);
        let err = InMemoryReferenceLookup::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ReferenceError::Parse { .. }));
    }

    #[test]
    fn insert_replaces_entry() {
        let lookup = InMemoryReferenceLookup::new();
        assert!(lookup.is_empty());

        lookup.insert("005930", CompanyRef::new(1, "Samsung"));
        lookup.insert("005930", CompanyRef::new(1, "Samsung Electronics"));

        assert_eq!(lookup.len(), 1);
        assert_eq!(
            lookup.lookup("005930").map(|c| c.name),
            Some("Samsung Electronics".to_string())
        );
    }
}
