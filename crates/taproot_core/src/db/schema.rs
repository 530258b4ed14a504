//! Metadata-driven DDL for entity, intermediate, and chain tables.
//!
//! # Responsibility
//! - Turn registered `EntityDef` chains into `CREATE TABLE` statements that
//!   reproduce the persisted row shape exactly.
//!
//! # Invariants
//! - Class-table roots carry `_type` and `_version_id`; non-root chain
//!   tables share the root's primary-key value and never auto-assign ids.
//! - Leaf tables carry `_version_id` only when the class declares version
//!   tracking.
//! - Every entity table carries `active`; intermediate tables carry no
//!   uniqueness constraint (idempotence is check-based at the mapper).

use crate::db::DbError;
use crate::model::descriptor::{
    AttrKind, EntityDef, MappingKind, MetaError, MetaRegistry,
};
use crate::model::naming;
use log::info;
use rusqlite::Connection;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Debug)]
pub enum SchemaError {
    Db(DbError),
    Meta(MetaError),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Meta(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Meta(err) => Some(err),
        }
    }
}

impl From<DbError> for SchemaError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<MetaError> for SchemaError {
    fn from(value: MetaError) -> Self {
        Self::Meta(value)
    }
}

impl From<rusqlite::Error> for SchemaError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Creates every table needed to persist the given classes: one table per
/// chain level (class-table), one per concrete class (leaf-table), and one
/// intermediate table per multi-reference attribute.
pub fn create_tables(
    conn: &Connection,
    meta: &MetaRegistry,
    defs: &[&'static EntityDef],
) -> SchemaResult<()> {
    let mut created: HashSet<String> = HashSet::new();

    for &def in defs {
        match def.strategy() {
            MappingKind::ClassTable => {
                let chain = def.superclass_list();
                let root = def.inheritance_root();
                for class in chain {
                    let is_root = std::ptr::eq(class, root);
                    let ddl = class_table_ddl(meta, class, is_root)?;
                    execute_once(conn, &mut created, class.table, &ddl)?;
                }
            }
            MappingKind::LeafTable => {
                let ddl = leaf_table_ddl(meta, def)?;
                execute_once(conn, &mut created, def.table, &ddl)?;
            }
        }

        for attr in def.multi_refs() {
            let Some(target) = attr.kind.target() else {
                continue;
            };
            let (table, owner_column, dependent_column) =
                meta.intermediate_descriptor(def, attr.name, target)?;
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    {owner_column} INTEGER NOT NULL,
    {dependent_column} INTEGER NOT NULL
);"
            );
            execute_once(conn, &mut created, &table, &ddl)?;
        }
    }

    Ok(())
}

fn execute_once(
    conn: &Connection,
    created: &mut HashSet<String>,
    table: &str,
    ddl: &str,
) -> SchemaResult<()> {
    if !created.insert(table.to_string()) {
        return Ok(());
    }
    conn.execute_batch(ddl)?;
    info!("event=create_table module=schema table={table}");
    Ok(())
}

fn class_table_ddl(
    meta: &MetaRegistry,
    class: &'static EntityDef,
    is_root: bool,
) -> SchemaResult<String> {
    let mut columns: Vec<String> = Vec::new();
    if is_root {
        columns.push("id INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        columns.push("active INTEGER NOT NULL DEFAULT 1".to_string());
        columns.push("_type TEXT".to_string());
        columns.push("_version_id INTEGER".to_string());
    } else {
        // Shares the root row's generated id.
        columns.push("id INTEGER PRIMARY KEY".to_string());
        columns.push("active INTEGER NOT NULL DEFAULT 1".to_string());
    }
    columns.extend(attribute_columns(meta, class)?);
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        class.table,
        columns.join(",\n    ")
    ))
}

fn leaf_table_ddl(meta: &MetaRegistry, def: &'static EntityDef) -> SchemaResult<String> {
    let mut columns: Vec<String> = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "active INTEGER NOT NULL DEFAULT 1".to_string(),
    ];
    if def.needs_version {
        columns.push("_version_id INTEGER".to_string());
    }
    for class in def.superclass_list() {
        columns.extend(attribute_columns(meta, class)?);
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        def.table,
        columns.join(",\n    ")
    ))
}

fn attribute_columns(
    meta: &MetaRegistry,
    class: &'static EntityDef,
) -> SchemaResult<Vec<String>> {
    let mut columns = Vec::new();
    for attr in class.attributes {
        match attr.kind {
            AttrKind::Plain(ty) => columns.push(format!("{} {}", attr.name, ty.sql_type())),
            AttrKind::ParentRef { .. } => {
                columns.push(format!("{} INTEGER", naming::attribute_key(attr.name)));
            }
            AttrKind::ImmutableRef { target } => {
                columns.push(format!("{} INTEGER", meta.reference_column(target)?));
            }
            AttrKind::ChildRef { .. }
            | AttrKind::MultiRef { .. }
            | AttrKind::ImmutableMultiRef { .. }
            | AttrKind::Version => {}
        }
    }
    Ok(columns)
}
