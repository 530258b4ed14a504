//! Aggregate persistence core: maps entity graphs onto relational rows and
//! back, with unit-of-work tracking and optimistic-concurrency versioning.

pub mod db;
pub mod logging;
pub mod mapper;
pub mod model;
pub mod repo;
pub mod serializer;
pub mod uow;

pub use db::{create_tables, open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging};
pub use mapper::{Mapper, MapperError, MapperResult};
pub use model::{
    AttrDescriptor, AttrKind, AttrValue, Entity, EntityDef, EntityError, Field, MappingKind,
    MetaError, MetaRegistry, Reference, Row, ScalarType, Version,
};
pub use repo::{Finder, FinderError, FinderResult};
pub use serializer::{
    strip_key, to_flat_map, to_nested_map, to_row, FlatValue, NestedValue, SerializeOpts,
};
pub use uow::{
    SearchResult, TrackedEntity, TrackedState, TrackerError, TrackerResult, Transaction,
    TransactionRegistry,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
