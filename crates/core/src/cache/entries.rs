//! Persisted cache entry operations.
//!
//! The on-disk table is a flat mapping from fingerprint to `(payload, created_at)`.
//! It is rewritten wholesale on flush, so readers never see a half-applied
//! mix of two flushes.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;

/// One persisted row, payload still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub fingerprint: String,
    pub payload_json: String,
    pub created_at: String,
}

impl CacheDb {
    /// Replace the whole table with `entries` in one transaction.
    pub async fn replace_entries(&self, entries: Vec<StoredEntry>) -> Result<usize, Error> {
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO cache_entries (fingerprint, payload_json, created_at) VALUES (?1, ?2, ?3)",
                    )?;
                    for entry in &entries {
                        stmt.execute(params![entry.fingerprint, entry.payload_json, entry.created_at])?;
                    }
                }
                tx.commit()?;
                Ok(entries.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Read every persisted row.
    pub async fn load_entries(&self) -> Result<Vec<StoredEntry>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<StoredEntry>, Error> {
                let mut stmt = conn.prepare("SELECT fingerprint, payload_json, created_at FROM cache_entries")?;
                let rows = stmt.query_map([], |row| {
                    Ok(StoredEntry { fingerprint: row.get(0)?, payload_json: row.get(1)?, created_at: row.get(2)? })
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?);
                }
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every persisted row, returning how many were removed.
    pub async fn clear_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
