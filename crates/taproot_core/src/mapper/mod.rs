//! Insert/update/delete engine for aggregate trees.
//!
//! # Responsibility
//! - Walk an aggregate root and its owned sub-graph, computing row sets
//!   through the active inheritance strategy and writing them transactionally.
//! - Reconcile child collections and many-to-many links between snapshots.
//!
//! # Invariants
//! - Every public operation runs its whole call tree inside one store
//!   transaction; an error aborts and rolls back every row already written.
//! - The aggregate version is incremented at most once per call tree, no
//!   matter how many sub-entities request a bump.
//! - Writes on aggregate roots require a registered owning transaction.

mod class_table;
mod leaf_table;

use crate::db::DbError;
use crate::model::descriptor::{EntityDef, MappingKind, MetaError, MetaRegistry, ID_COLUMN};
use crate::model::entity::{Entity, EntityError, Reference};
use crate::model::value::{AttrValue, Row};
use crate::model::version::Version;
use crate::uow::TransactionRegistry;
use log::info;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Owned-tree recursion bound; deeper graphs are treated as cyclic.
const MAX_TREE_DEPTH: usize = 64;

pub type MapperResult<T> = Result<T, MapperError>;

/// Mapper operation failures.
#[derive(Debug)]
pub enum MapperError {
    /// Write attempted outside a bound transaction, or against state the
    /// mapper cannot act on.
    IllegalOperation(String),
    /// Update attempted on an immutable class.
    ImmutableObject { class: &'static str },
    /// Identifier fields changed between original and modified snapshots.
    IllegalUpdate(String),
    /// A multi-reference without an id reached a row write.
    UntrackedReference {
        class: &'static str,
        attr: &'static str,
    },
    Entity(EntityError),
    Meta(MetaError),
    Db(DbError),
}

impl Display for MapperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalOperation(message) => write!(f, "{message}"),
            Self::ImmutableObject { class } => {
                write!(f, "`{class}` is immutable - it can't be updated")
            }
            Self::IllegalUpdate(message) => write!(f, "illegal update: {message}"),
            Self::UntrackedReference { class, attr } => write!(
                f,
                "reference `{attr}` to `{class}` has no id; persist the target first"
            ),
            Self::Entity(err) => write!(f, "{err}"),
            Self::Meta(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MapperError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Entity(err) => Some(err),
            Self::Meta(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EntityError> for MapperError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

impl From<MetaError> for MapperError {
    fn from(value: MetaError) -> Self {
        Self::Meta(value)
    }
}

impl From<DbError> for MapperError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MapperError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Per-call-tree write context: the aggregate's version record and the
/// at-most-one-increment flag, threaded through the recursion.
pub(crate) struct WriteSession {
    version: Option<Version>,
    versioned: bool,
    depth: usize,
}

impl WriteSession {
    fn new() -> Self {
        Self {
            version: None,
            versioned: false,
            depth: 0,
        }
    }

    fn bind_version(&mut self, version: Version) {
        self.version = Some(version);
    }

    fn take_version(&mut self) -> Option<Version> {
        self.version.take()
    }

    pub(crate) fn version_id(&self) -> Option<i64> {
        self.version.as_ref().and_then(Version::id)
    }

    /// Increments the bound version exactly once per call tree. A session
    /// without a version record (untracked leaf classes) is a no-op.
    pub(crate) fn ensure_bumped(&mut self, conn: &Connection) -> MapperResult<()> {
        if self.versioned {
            return Ok(());
        }
        if let Some(version) = self.version.as_mut() {
            version.increment(conn)?;
            self.versioned = true;
        }
        Ok(())
    }

    fn descend(&mut self) -> MapperResult<()> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(MapperError::IllegalOperation(format!(
                "aggregate tree deeper than {MAX_TREE_DEPTH} levels; assuming a cycle"
            )));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Persistence engine for one connection, metadata registry, and
/// unit-of-work registry.
pub struct Mapper<'a> {
    conn: &'a Connection,
    meta: &'a MetaRegistry,
    registry: &'a TransactionRegistry,
}

impl<'a> Mapper<'a> {
    pub fn new(
        conn: &'a Connection,
        meta: &'a MetaRegistry,
        registry: &'a TransactionRegistry,
    ) -> Self {
        Self {
            conn,
            meta,
            registry,
        }
    }

    /// Persists a new aggregate root and its owned sub-graph. Assigns the
    /// generated id and a fresh version record to the root.
    pub fn insert(&self, entity: &mut Entity) -> MapperResult<()> {
        let started_at = Instant::now();
        let tx = rusqlite::Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut session = WriteSession::new();
        self.insert_node(&tx, &mut session, entity, None)?;
        entity.set_version(session.take_version());
        tx.commit()?;
        info!(
            "event=insert module=mapper class={} id={:?} duration_ms={}",
            entity.class_name(),
            entity.id(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Writes the difference between two snapshots of one aggregate:
    /// changed rows, new/removed children, and many-to-many link changes.
    pub fn update(&self, modified: &mut Entity, original: &Entity) -> MapperResult<()> {
        if !std::ptr::eq(modified.def(), original.def()) {
            return Err(MapperError::IllegalUpdate(format!(
                "snapshots disagree on class: `{}` vs `{}`",
                modified.class_name(),
                original.class_name()
            )));
        }
        let started_at = Instant::now();
        let tx = rusqlite::Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut session = WriteSession::new();
        if let Some(version) = modified.version() {
            session.bind_version(version.clone());
        }
        self.update_node(&tx, &mut session, modified, original)?;
        if let Some(version) = session.take_version() {
            modified.set_version(Some(version));
        }
        tx.commit()?;
        info!(
            "event=update module=mapper class={} id={:?} duration_ms={}",
            modified.class_name(),
            modified.id(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Logically deletes an aggregate and cascades through its owned
    /// children. Rows are flagged inactive, never removed.
    pub fn delete(&self, entity: &mut Entity) -> MapperResult<()> {
        let started_at = Instant::now();
        let tx = rusqlite::Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut session = WriteSession::new();
        if let Some(version) = entity.version() {
            session.bind_version(version.clone());
        }
        self.delete_node(&tx, &mut session, entity)?;
        if let Some(version) = session.take_version() {
            entity.set_version(Some(version));
        }
        tx.commit()?;
        info!(
            "event=delete module=mapper class={} id={:?} duration_ms={}",
            entity.class_name(),
            entity.id(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn insert_node(
        &self,
        conn: &Connection,
        session: &mut WriteSession,
        entity: &mut Entity,
        parent_id: Option<i64>,
    ) -> MapperResult<()> {
        session.descend()?;
        if parent_id.is_none() {
            // It's the root.
            self.check_transaction(entity)?;
            session.bind_version(Version::create(conn)?);
        }

        let id = match entity.def().strategy() {
            MappingKind::ClassTable => {
                class_table::insert(conn, self.meta, session, entity, parent_id)?
            }
            MappingKind::LeafTable => {
                leaf_table::insert(conn, self.meta, session, entity, parent_id)?
            }
        };
        entity.set_id(id);

        if let (Some(parent_id), Some(parent_attr)) = (parent_id, entity.def().parent_ref()) {
            if let Some(reference) = entity.reference_mut(parent_attr.name) {
                reference.set_id(parent_id);
            } else if let Some(target) = parent_attr.kind.target() {
                entity.set_reference(parent_attr.name, Some(Reference::lazy(target, parent_id)))?;
            }
        }

        for attr in entity.def().child_refs() {
            let count = entity.children(attr.name).len();
            for index in 0..count {
                let Some(child) = entity.child_mut(attr.name, index) else {
                    continue;
                };
                self.insert_node(conn, session, child, Some(id))?;
            }
        }

        for attr in entity.def().multi_refs() {
            for reference in entity.references(attr.name) {
                self.insert_intermediate(conn, entity.def(), id, attr.name, reference)?;
            }
        }

        session.ascend();
        Ok(())
    }

    fn update_node(
        &self,
        conn: &Connection,
        session: &mut WriteSession,
        modified: &mut Entity,
        original: &Entity,
    ) -> MapperResult<()> {
        session.descend()?;
        self.check_transaction(modified)?;

        match modified.def().strategy() {
            MappingKind::ClassTable => {
                class_table::update(conn, self.meta, session, modified, original)?;
            }
            MappingKind::LeafTable => {
                leaf_table::update(conn, self.meta, session, modified, original)?;
            }
        }

        let owner_id = modified.id().ok_or_else(|| {
            MapperError::IllegalOperation(format!(
                "cannot reconcile children of an unpersisted `{}`",
                modified.class_name()
            ))
        })?;

        // New children are inserted, shared ones recurse, vanished ones
        // cascade into logical deletion. Identity equivalence is class + id.
        for attr in modified.def().child_refs() {
            let count = modified.children(attr.name).len();
            for index in 0..count {
                let (child_class, child_id) = {
                    let child = &modified.children(attr.name)[index];
                    (child.class_name(), child.id())
                };
                match child_id {
                    None => {
                        session.ensure_bumped(conn)?;
                        let Some(child) = modified.child_mut(attr.name, index) else {
                            continue;
                        };
                        self.insert_node(conn, session, child, Some(owner_id))?;
                    }
                    Some(id) => {
                        let Some(original_child) = original.find_child(child_class, id) else {
                            return Err(MapperError::IllegalOperation(format!(
                                "child `{child_class}` (id {id}) is not part of the original snapshot"
                            )));
                        };
                        let Some(child) = modified.child_mut(attr.name, index) else {
                            continue;
                        };
                        self.update_node(conn, session, child, original_child)?;
                    }
                }
            }
        }

        for attr in original.def().child_refs() {
            for original_child in original.children(attr.name) {
                let Some(id) = original_child.id() else {
                    continue;
                };
                if modified.find_child(original_child.class_name(), id).is_none() {
                    session.ensure_bumped(conn)?;
                    let mut doomed = original_child.clone();
                    self.delete_node(conn, session, &mut doomed)?;
                }
            }
        }

        // Many-to-many reconciliation: inserts are idempotent, pairings
        // absent from the modified snapshot are removed.
        for attr in modified.def().multi_refs() {
            for reference in modified.references(attr.name) {
                self.insert_intermediate(conn, modified.def(), owner_id, attr.name, reference)?;
            }
        }

        for attr in original.def().multi_refs() {
            for reference in original.references(attr.name) {
                let retained = modified
                    .references(attr.name)
                    .iter()
                    .any(|kept| kept.id() == reference.id());
                if !retained {
                    self.delete_intermediate(conn, original.def(), owner_id, attr.name, reference)?;
                }
            }
        }

        session.ascend();
        Ok(())
    }

    fn delete_node(
        &self,
        conn: &Connection,
        session: &mut WriteSession,
        entity: &mut Entity,
    ) -> MapperResult<()> {
        session.descend()?;
        self.check_transaction(entity)?;
        session.ensure_bumped(conn)?;

        match entity.def().strategy() {
            MappingKind::ClassTable => class_table::delete(conn, entity)?,
            MappingKind::LeafTable => leaf_table::delete(conn, entity)?,
        }
        entity.set_active(false);

        for attr in entity.def().child_refs() {
            let count = entity.children(attr.name).len();
            for index in 0..count {
                let Some(child) = entity.child_mut(attr.name, index) else {
                    continue;
                };
                self.delete_node(conn, session, child)?;
            }
        }

        session.ascend();
        Ok(())
    }

    /// Aggregate roots must belong to a registered transaction; child
    /// classes are covered by their root's transaction.
    fn check_transaction(&self, entity: &Entity) -> MapperResult<()> {
        if !entity.def().has_parent_ref() && self.registry.find_transactions(entity).is_empty() {
            return Err(MapperError::IllegalOperation("invalid transaction".to_string()));
        }
        Ok(())
    }

    /// Upserts one (owner, dependent) pairing. Checked before insert so
    /// re-insertion stays idempotent without a uniqueness constraint.
    fn insert_intermediate(
        &self,
        conn: &Connection,
        owner: &'static EntityDef,
        owner_id: i64,
        attr: &'static str,
        reference: &Reference,
    ) -> MapperResult<()> {
        let Some(dependent_id) = reference.id() else {
            return Err(MapperError::UntrackedReference {
                class: reference.class_name(),
                attr,
            });
        };
        let (table, owner_column, dependent_column) =
            self.meta
                .intermediate_descriptor(owner, attr, reference.class_name())?;

        let exists: i64 = conn.query_row(
            &format!(
                "SELECT EXISTS(
                    SELECT 1 FROM {table}
                    WHERE {owner_column} = ?1 AND {dependent_column} = ?2
                );"
            ),
            params![owner_id, dependent_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {table} ({owner_column}, {dependent_column}) VALUES (?1, ?2);"
                ),
                params![owner_id, dependent_id],
            )?;
        }
        Ok(())
    }

    /// Removes one (owner, dependent) pairing. Pairings of id-less
    /// references were never persisted, so they are skipped.
    fn delete_intermediate(
        &self,
        conn: &Connection,
        owner: &'static EntityDef,
        owner_id: i64,
        attr: &'static str,
        reference: &Reference,
    ) -> MapperResult<()> {
        let Some(dependent_id) = reference.id() else {
            return Ok(());
        };
        let (table, owner_column, dependent_column) =
            self.meta
                .intermediate_descriptor(owner, attr, reference.class_name())?;
        conn.execute(
            &format!("DELETE FROM {table} WHERE {owner_column} = ?1 AND {dependent_column} = ?2;"),
            params![owner_id, dependent_id],
        )?;
        Ok(())
    }
}

/// Identifier fields must agree between snapshots even when nothing else
/// differs.
pub(crate) fn verify_identifiers_unchanged(
    modified_row: &Row,
    original_row: &Row,
) -> MapperResult<()> {
    if modified_row.get(ID_COLUMN) != original_row.get(ID_COLUMN) {
        return Err(MapperError::IllegalUpdate(
            "identifiers don't match".to_string(),
        ));
    }
    Ok(())
}

/// Builds and runs a dynamic single-row INSERT, returning the generated id.
pub(crate) fn insert_row(conn: &Connection, table: &str, row: &Row) -> MapperResult<i64> {
    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({});",
        columns.join(", "),
        placeholders.join(", ")
    );
    let values: Vec<rusqlite::types::Value> =
        row.values().map(AttrValue::to_sql_value).collect();
    conn.execute(&sql, params_from_iter(values))?;
    Ok(conn.last_insert_rowid())
}

/// Builds and runs a dynamic UPDATE of one row by primary key.
pub(crate) fn update_row(conn: &Connection, table: &str, id: i64, row: &Row) -> MapperResult<()> {
    let mut assignments: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (index, (column, value)) in row.iter().enumerate() {
        assignments.push(format!("{column} = ?{}", index + 1));
        values.push(value.to_sql_value());
    }
    if assignments.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "UPDATE {table} SET {} WHERE {ID_COLUMN} = ?{};",
        assignments.join(", "),
        values.len() + 1
    );
    values.push(rusqlite::types::Value::Integer(id));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}
