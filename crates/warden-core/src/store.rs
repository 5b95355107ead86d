//! Shared redb database handle.
//!
//! All stores (decisions, executions, runs, templates, jobs, ledger) share one
//! `Database` behind an `Arc`. redb serializes write transactions, which is
//! the property the two compare-and-set points in this crate lean on: the
//! execution-row uniqueness check and the job claim both read and write
//! inside a single write transaction, so no second writer can interleave.

use std::path::Path;
use std::sync::Arc;

use redb::Database;

use crate::error::{Result, WardenError};

/// Open or create the redb database at `path`.
pub fn open_db(path: &Path) -> Result<Arc<Database>> {
    let db = Database::create(path).map_err(store_err)?;
    Ok(Arc::new(db))
}

/// Map any storage-layer error into `WardenError::Store`.
pub(crate) fn store_err(e: impl std::fmt::Display) -> WardenError {
    WardenError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warden.db");
        let _db = open_db(&path).unwrap();
        assert!(path.exists());
    }
}
