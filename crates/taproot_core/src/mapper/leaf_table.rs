//! Leaf-table inheritance: one full table per concrete class, no joins.
//!
//! # Invariants
//! - The complete instance lives in exactly one row of the class's table.
//! - The `_version_id` column exists only when the class declares version
//!   tracking, and the version is bumped only then.

use crate::mapper::{
    insert_row, update_row, verify_identifiers_unchanged, MapperError, MapperResult, WriteSession,
};
use crate::model::descriptor::{MetaRegistry, ACTIVE_COLUMN, ID_COLUMN, VERSION_ID_COLUMN};
use crate::model::entity::Entity;
use crate::model::value::AttrValue;
use crate::serializer;
use rusqlite::Connection;

pub(crate) fn insert(
    conn: &Connection,
    meta: &MetaRegistry,
    session: &WriteSession,
    entity: &Entity,
    parent_id: Option<i64>,
) -> MapperResult<i64> {
    let mut row = serializer::to_row(meta, entity, parent_id)?;
    row.remove(ID_COLUMN);
    if entity.def().needs_version {
        row.insert(
            VERSION_ID_COLUMN.to_string(),
            AttrValue::from(session.version_id()),
        );
    }
    insert_row(conn, entity.def().table, &row)
}

pub(crate) fn update(
    conn: &Connection,
    meta: &MetaRegistry,
    session: &mut WriteSession,
    modified: &Entity,
    original: &Entity,
) -> MapperResult<()> {
    if modified.def().immutable {
        return Err(MapperError::ImmutableObject {
            class: modified.def().class_name,
        });
    }

    let modified_row = serializer::to_row(meta, modified, None)?;
    let original_row = serializer::to_row(meta, original, None)?;
    verify_identifiers_unchanged(&modified_row, &original_row)?;

    if modified_row == original_row {
        return Ok(());
    }
    if modified.def().needs_version {
        session.ensure_bumped(conn)?;
    }

    let id = modified.id().ok_or_else(|| {
        MapperError::IllegalOperation(format!(
            "cannot update an unpersisted `{}`",
            modified.class_name()
        ))
    })?;
    let mut row = modified_row;
    row.remove(ID_COLUMN);
    update_row(conn, modified.def().table, id, &row)
}

pub(crate) fn delete(conn: &Connection, entity: &Entity) -> MapperResult<()> {
    let id = entity.id().ok_or_else(|| {
        MapperError::IllegalOperation(format!(
            "cannot delete an unpersisted `{}`",
            entity.class_name()
        ))
    })?;
    conn.execute(
        &format!(
            "UPDATE {} SET {ACTIVE_COLUMN} = 0 WHERE {ID_COLUMN} = ?1;",
            entity.def().table
        ),
        [id],
    )?;
    Ok(())
}
