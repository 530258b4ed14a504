//! SQLite storage bootstrap and metadata-driven schema entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the persistence core.
//! - Create entity, intermediate, and version tables from registered
//!   metadata.
//!
//! # Invariants
//! - Core code must not read/write aggregate data before bootstrap succeeds.
//! - Every table creation is idempotent (`IF NOT EXISTS`).

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod schema;

pub use open::{open_db, open_db_in_memory};
pub use schema::create_tables;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Stored data violates an invariant the store itself should uphold.
    Corrupt(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Corrupt(message) => write!(f, "corrupt storage state: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Corrupt(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
