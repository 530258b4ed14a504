//! Class-table inheritance: one table per class level, joined by shared id.
//!
//! # Invariants
//! - The root table row is written first and owns the generated id; every
//!   descendant table row reuses that id as its primary key.
//! - The root row carries the concrete-subtype tag and the shared version id.
//! - Logical deletion flags only the root row.

use crate::mapper::{
    insert_row, update_row, verify_identifiers_unchanged, MapperError, MapperResult, WriteSession,
};
use crate::model::descriptor::{
    AttrKind, EntityDef, MetaRegistry, ACTIVE_COLUMN, ID_COLUMN, TYPE_COLUMN, VERSION_ID_COLUMN,
};
use crate::model::entity::Entity;
use crate::model::naming;
use crate::model::value::{AttrValue, Row};
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

    let chain = entity.def().superclass_list();
    let mut rows = split_row(meta, &chain, &row)?;

    let root_index = chain.len() - 1;
    rows[root_index].insert(
        TYPE_COLUMN.to_string(),
        AttrValue::Text(entity.def().table.to_string()),
    );
    rows[root_index].insert(
        VERSION_ID_COLUMN.to_string(),
        AttrValue::from(session.version_id()),
    );

    let id = insert_row(conn, chain[root_index].table, &rows[root_index])?;

    // Descendant tables, walking from just below the root down to the
    // concrete class, all keyed by the root row's id.
    for index in (0..root_index).rev() {
        rows[index].insert(ID_COLUMN.to_string(), AttrValue::Int(id));
        insert_row(conn, chain[index].table, &rows[index])?;
    }

    Ok(id)
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
    session.ensure_bumped(conn)?;

    let id = modified.id().ok_or_else(|| {
        MapperError::IllegalOperation(format!(
            "cannot update an unpersisted `{}`",
            modified.class_name()
        ))
    })?;

    let mut row = modified_row;
    row.remove(ID_COLUMN);
    let chain = modified.def().superclass_list();
    let mut rows = split_row(meta, &chain, &row)?;
    let root_index = chain.len() - 1;
    rows[root_index].insert(
        TYPE_COLUMN.to_string(),
        AttrValue::Text(modified.def().table.to_string()),
    );

    for (class, class_row) in chain.iter().zip(rows.iter()) {
        update_row(conn, class.table, id, class_row)?;
    }
    Ok(())
}

pub(crate) fn delete(conn: &Connection, entity: &Entity) -> MapperResult<()> {
    let id = entity.id().ok_or_else(|| {
        MapperError::IllegalOperation(format!(
            "cannot delete an unpersisted `{}`",
            entity.class_name()
        ))
    })?;
    let root = entity.def().inheritance_root();
    conn.execute(
        &format!("UPDATE {} SET {ACTIVE_COLUMN} = 0 WHERE {ID_COLUMN} = ?1;", root.table),
        [id],
    )?;
    Ok(())
}

/// Splits a flat persisted row across the chain: each class level keeps the
/// columns its own attributes declare; the builtin `active` flag belongs to
/// the root.
fn split_row(
    meta: &MetaRegistry,
    chain: &[&'static EntityDef],
    row: &Row,
) -> MapperResult<Vec<Row>> {
    let mut rows: Vec<Row> = Vec::with_capacity(chain.len());
    for class in chain {
        let mut class_row = Row::new();
        for attr in class.attributes {
            let column = match attr.kind {
                AttrKind::Plain(_) => attr.name.to_string(),
                AttrKind::ParentRef { .. } => naming::attribute_key(attr.name),
                AttrKind::ImmutableRef { target } => meta.reference_column(target)?,
                AttrKind::ChildRef { .. }
                | AttrKind::MultiRef { .. }
                | AttrKind::ImmutableMultiRef { .. }
                | AttrKind::Version => continue,
            };
            if let Some(value) = row.get(&column) {
                class_row.insert(column, value.clone());
            }
        }
        rows.push(class_row);
    }
    if let (Some(root_row), Some(active)) = (rows.last_mut(), row.get(ACTIVE_COLUMN)) {
        root_row.insert(ACTIVE_COLUMN.to_string(), active.clone());
    }
    Ok(rows)
}
