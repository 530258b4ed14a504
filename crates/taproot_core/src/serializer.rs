//! Entity serialization: flat maps, nested maps, and single-table rows.
//!
//! # Responsibility
//! - Project an entity (and recursively its graph) into value trees suitable
//!   for row persistence or external transport.
//!
//! # Invariants
//! - Serialization never resolves a lazy reference; only its id is read.
//! - Parent back-pointers never appear in nested output or persisted rows.
//! - Options propagate unchanged through every recursive call.

use crate::model::descriptor::{
    AttrKind, EntityDef, MetaResult, MetaRegistry, ACTIVE_COLUMN, ID_COLUMN, VERSION_ATTR,
};
use crate::model::entity::{Entity, Field, Reference};
use crate::model::naming;
use crate::model::value::{AttrValue, Row};
use crate::model::version::Version;
use serde::Serialize;
use std::collections::BTreeMap;

/// Options threaded through recursive serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeOpts {
    /// Omits attributes whose value (or collection element type) belongs to
    /// the named class. The `_version` pseudo-class suppresses the version
    /// field.
    pub without: Option<&'static str>,
}

/// One attribute's value in a flat projection. Borrows the live graph.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue<'e> {
    Scalar(AttrValue),
    Reference(Option<&'e Reference>),
    Children(&'e [Entity]),
    References(&'e [Reference]),
    Version(Option<&'e Version>),
}

/// Owned recursive value tree produced by nested serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NestedValue {
    Scalar(AttrValue),
    Seq(Vec<NestedValue>),
    Map(BTreeMap<String, NestedValue>),
}

impl NestedValue {
    pub fn as_map(&self) -> Option<&BTreeMap<String, NestedValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[NestedValue]> {
        match self {
            Self::Seq(seq) => Some(seq),
            _ => None,
        }
    }
}

fn skipped(without: Option<&str>, class: &str) -> bool {
    without == Some(class)
}

/// Maps the entity's own declared attributes to their raw values, plus the
/// builtin `id`, `active`, and `_version` entries.
pub fn to_flat_map<'e>(
    entity: &'e Entity,
    opts: &SerializeOpts,
) -> BTreeMap<&'static str, FlatValue<'e>> {
    let mut flat = BTreeMap::new();
    flat.insert(ID_COLUMN, FlatValue::Scalar(AttrValue::from(entity.id())));
    flat.insert(
        ACTIVE_COLUMN,
        FlatValue::Scalar(AttrValue::Bool(entity.is_active())),
    );

    for attr in entity.def().chain_attributes() {
        let Some(field) = entity.field(attr.name) else {
            continue;
        };
        let value = match field {
            Field::Scalar(value) => FlatValue::Scalar(value.clone()),
            Field::Reference(reference) => {
                if let Some(reference) = reference {
                    if skipped(opts.without, reference.class_name()) {
                        continue;
                    }
                }
                FlatValue::Reference(reference.as_ref())
            }
            Field::Children(children) => {
                if attr
                    .kind
                    .target()
                    .is_some_and(|target| skipped(opts.without, target))
                {
                    continue;
                }
                FlatValue::Children(children)
            }
            Field::References(references) => {
                if attr
                    .kind
                    .target()
                    .is_some_and(|target| skipped(opts.without, target))
                {
                    continue;
                }
                FlatValue::References(references)
            }
        };
        flat.insert(attr.name, value);
    }

    if !skipped(opts.without, VERSION_ATTR) {
        flat.insert(VERSION_ATTR, FlatValue::Version(entity.version()));
    }
    flat
}

/// Recursively expands an entity into an owned value tree.
///
/// Parent references are removed, immutable (multi-)references pass through
/// as id maps, child and multi collections expand element-wise, and the
/// version record exposes its own fields. Terminates because the owned tree
/// is acyclic once parent back-pointers are stripped.
pub fn to_nested_map(entity: &Entity, opts: &SerializeOpts) -> NestedValue {
    let flat = to_flat_map(entity, opts);
    let mut nested = BTreeMap::new();

    for (name, value) in flat {
        let kind = entity.def().attribute(name).map(|attr| attr.kind);
        let expanded = match (kind, value) {
            (Some(AttrKind::ParentRef { .. }), _) => continue,
            (Some(AttrKind::ImmutableRef { .. }), FlatValue::Reference(reference)) => {
                reference.map_or(NestedValue::Scalar(AttrValue::Null), reference_id_map)
            }
            (Some(AttrKind::ImmutableMultiRef { .. }), FlatValue::References(references)) => {
                NestedValue::Seq(references.iter().map(reference_id_map).collect())
            }
            (Some(AttrKind::MultiRef { .. }), FlatValue::References(references)) => {
                NestedValue::Seq(
                    references
                        .iter()
                        .map(|reference| reference_nested(reference, opts))
                        .collect(),
                )
            }
            (Some(AttrKind::ChildRef { .. }), FlatValue::Children(children)) => NestedValue::Seq(
                children
                    .iter()
                    .map(|child| to_nested_map(child, opts))
                    .collect(),
            ),
            (_, FlatValue::Version(version)) => {
                version.map_or(NestedValue::Scalar(AttrValue::Null), version_map)
            }
            (_, FlatValue::Scalar(value)) => NestedValue::Scalar(value),
            (_, FlatValue::Reference(reference)) => {
                reference.map_or(NestedValue::Scalar(AttrValue::Null), reference_id_map)
            }
            (_, FlatValue::Children(children)) => NestedValue::Seq(
                children
                    .iter()
                    .map(|child| to_nested_map(child, opts))
                    .collect(),
            ),
            (_, FlatValue::References(references)) => NestedValue::Seq(
                references
                    .iter()
                    .map(|reference| reference_nested(reference, opts))
                    .collect(),
            ),
        };
        nested.insert(name.to_string(), expanded);
    }

    NestedValue::Map(nested)
}

/// A reference in nested output: resolved targets expand fully, lazy ones
/// contribute only their id. Never triggers a fetch.
fn reference_nested(reference: &Reference, opts: &SerializeOpts) -> NestedValue {
    match reference.resolved() {
        Some(entity) => to_nested_map(entity, opts),
        None => reference_id_map(reference),
    }
}

fn reference_id_map(reference: &Reference) -> NestedValue {
    let mut map = BTreeMap::new();
    map.insert(
        ID_COLUMN.to_string(),
        NestedValue::Scalar(AttrValue::from(reference.id())),
    );
    NestedValue::Map(map)
}

fn version_map(version: &Version) -> NestedValue {
    let mut map = BTreeMap::new();
    map.insert(
        "id".to_string(),
        NestedValue::Scalar(AttrValue::from(version.id())),
    );
    map.insert(
        "version".to_string(),
        NestedValue::Scalar(AttrValue::Int(version.number())),
    );
    map.insert(
        "created_at".to_string(),
        NestedValue::Scalar(AttrValue::Int(version.created_at())),
    );
    map.insert(
        "updated_at".to_string(),
        NestedValue::Scalar(AttrValue::Int(version.updated_at())),
    );
    NestedValue::Map(map)
}

/// Exact column set destined for a single table row.
///
/// Child, parent, and multi-reference attributes are dropped (they live in
/// related tables or are implicit); immutable references become foreign-key
/// columns holding the referenced id or NULL; a supplied parent id is
/// injected under the declared parent-reference attribute's key.
pub fn to_row(
    meta: &MetaRegistry,
    entity: &Entity,
    parent_id: Option<i64>,
) -> MetaResult<Row> {
    let def: &'static EntityDef = entity.def();
    let mut row = Row::new();
    row.insert(ID_COLUMN.to_string(), AttrValue::from(entity.id()));
    row.insert(
        ACTIVE_COLUMN.to_string(),
        AttrValue::Bool(entity.is_active()),
    );

    if let (Some(parent_id), Some(parent_attr)) = (parent_id, def.parent_ref()) {
        row.insert(
            naming::attribute_key(parent_attr.name),
            AttrValue::Int(parent_id),
        );
    }

    for attr in def.chain_attributes() {
        match attr.kind {
            AttrKind::Plain(_) => {
                let value = entity
                    .scalar(attr.name)
                    .cloned()
                    .unwrap_or(AttrValue::Null);
                row.insert(attr.name.to_string(), value);
            }
            AttrKind::ImmutableRef { target } => {
                let column = meta.reference_column(target)?;
                let value = entity
                    .reference(attr.name)
                    .and_then(Reference::id)
                    .map_or(AttrValue::Null, AttrValue::Int);
                row.insert(column, value);
            }
            AttrKind::ParentRef { .. }
            | AttrKind::ChildRef { .. }
            | AttrKind::MultiRef { .. }
            | AttrKind::ImmutableMultiRef { .. }
            | AttrKind::Version => {}
        }
    }
    Ok(row)
}

/// Deep-removes every occurrence of `key` from a nested value tree,
/// recursing through maps key-wise and sequences element-wise.
pub fn strip_key(value: &NestedValue, key: &str) -> NestedValue {
    match value {
        NestedValue::Scalar(scalar) => NestedValue::Scalar(scalar.clone()),
        NestedValue::Seq(seq) => {
            NestedValue::Seq(seq.iter().map(|item| strip_key(item, key)).collect())
        }
        NestedValue::Map(map) => NestedValue::Map(
            map.iter()
                .filter(|(name, _)| name.as_str() != key)
                .map(|(name, item)| (name.clone(), strip_key(item, key)))
                .collect(),
        ),
    }
}
