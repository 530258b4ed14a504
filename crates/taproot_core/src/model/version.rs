//! Optimistic-concurrency version records.
//!
//! # Responsibility
//! - Manage `_versions` rows shared by an aggregate root and its subtree.
//!
//! # Invariants
//! - A version is created exactly once, when its aggregate root is first
//!   inserted; subsequent writes only increment.
//! - Timestamps are epoch milliseconds written by SQLite itself.

use crate::db::{DbError, DbResult};
use rusqlite::{Connection, OptionalExtension};

/// Table holding one record per aggregate root.
pub const VERSIONS_TABLE: &str = "_versions";

/// One optimistic-concurrency counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    id: Option<i64>,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl Version {
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn number(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Inserts a fresh counter starting at 1 and returns the stored record.
    pub fn create(conn: &Connection) -> DbResult<Self> {
        conn.execute(
            "INSERT INTO _versions (version, created_at, updated_at)
             VALUES (1, (strftime('%s', 'now') * 1000), (strftime('%s', 'now') * 1000));",
            [],
        )?;
        let id = conn.last_insert_rowid();
        Self::load(conn, id)?.ok_or_else(|| {
            DbError::Corrupt(format!("freshly inserted _versions row {id} is missing"))
        })
    }

    /// Loads a counter by id. `None` when the row does not exist.
    pub fn load(conn: &Connection, id: i64) -> DbResult<Option<Self>> {
        let record = conn
            .query_row(
                "SELECT id, version, created_at, updated_at
                 FROM _versions
                 WHERE id = ?1;",
                [id],
                |row| {
                    Ok(Self {
                        id: Some(row.get(0)?),
                        version: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Resolves the counter attached to a root row, creating nothing.
    /// A missing link (`None` id) yields `None`.
    pub fn resolve(conn: &Connection, version_id: Option<i64>) -> DbResult<Option<Self>> {
        match version_id {
            Some(id) => Self::load(conn, id),
            None => Ok(None),
        }
    }

    /// Adds one to the stored counter and refreshes this record in place.
    pub fn increment(&mut self, conn: &Connection) -> DbResult<()> {
        let Some(id) = self.id else {
            return Err(DbError::Corrupt(
                "cannot increment an unpersisted version record".to_string(),
            ));
        };
        conn.execute(
            "UPDATE _versions
             SET version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;
        if let Some(reloaded) = Self::load(conn, id)? {
            *self = reloaded;
            Ok(())
        } else {
            Err(DbError::Corrupt(format!("_versions row {id} vanished")))
        }
    }
}
