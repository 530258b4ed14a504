//! Finder: rehydrates aggregate graphs from storage by identifier.
//!
//! # Responsibility
//! - Read merged rows across inheritance chains, resolve concrete types via
//!   stored type tags, and rebuild entities with children, references, and
//!   version records attached.
//!
//! # Invariants
//! - Only rows flagged `active` are visible; a missing or inactive row is an
//!   empty result at this layer, not an error.
//! - References are attached lazily; nothing is fetched until `resolve`.
//! - Internal bookkeeping columns never reach constructed entities.

use crate::db::DbError;
use crate::model::descriptor::{
    AttrDescriptor, AttrKind, EntityDef, MappingKind, MetaError, MetaRegistry, ACTIVE_COLUMN,
    ID_COLUMN, TYPE_COLUMN, VERSION_ID_COLUMN,
};
use crate::model::entity::{Entity, EntityError, Reference};
use crate::model::naming;
use crate::model::value::{AttrValue, Row};
use crate::model::version::Version;
use log::debug;
use rusqlite::{Connection, OptionalExtension, Params};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type FinderResult<T> = Result<T, FinderError>;

/// Read-side failures.
#[derive(Debug)]
pub enum FinderError {
    /// Lookup by id found no active row.
    NotFound { class: &'static str, id: i64 },
    /// Persisted data cannot be converted to a valid entity.
    InvalidData(String),
    Entity(EntityError),
    Meta(MetaError),
    Db(DbError),
}

impl Display for FinderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { class, id } => write!(f, "`{class}` with id {id} not found"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Entity(err) => write!(f, "{err}"),
            Self::Meta(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for FinderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Entity(err) => Some(err),
            Self::Meta(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<EntityError> for FinderError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

impl From<MetaError> for FinderError {
    fn from(value: MetaError) -> Self {
        Self::Meta(value)
    }
}

impl From<DbError> for FinderError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for FinderError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read-side repository over one connection and metadata registry.
pub struct Finder<'a> {
    conn: &'a Connection,
    meta: &'a MetaRegistry,
}

impl<'a> Finder<'a> {
    pub fn new(conn: &'a Connection, meta: &'a MetaRegistry) -> Self {
        Self { conn, meta }
    }

    pub fn meta(&self) -> &MetaRegistry {
        self.meta
    }

    /// Reads one aggregate by id. `None` when no active row exists.
    ///
    /// The concrete runtime type comes from the stored type tag, falling
    /// back to the requested class for non-polymorphic tables.
    pub fn fetch_by_id(
        &self,
        def: &'static EntityDef,
        id: i64,
    ) -> FinderResult<Option<Entity>> {
        let row = match def.strategy() {
            MappingKind::ClassTable => {
                let root = def.inheritance_root();
                let tag: Option<Option<String>> = self
                    .conn
                    .query_row(
                        &format!(
                            "SELECT {TYPE_COLUMN} FROM {} WHERE {ID_COLUMN} = ?1;",
                            root.table
                        ),
                        [id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(tag) = tag else {
                    return Ok(None);
                };
                let concrete = match tag {
                    Some(table) => self.meta.class_for_table(&table)?,
                    None => def,
                };
                self.merged_row(concrete, id)?
                    .map(|row| (concrete, row))
            }
            MappingKind::LeafTable => self.leaf_row(def, id)?.map(|row| (def, row)),
        };

        let Some((concrete, mut row)) = row else {
            return Ok(None);
        };
        row.remove(TYPE_COLUMN);
        debug!(
            "event=fetch module=finder class={} id={id}",
            concrete.class_name
        );
        Ok(Some(self.create_object(concrete, row)?))
    }

    /// Escalates the empty result into the not-found error.
    pub fn require_by_id(&self, def: &'static EntityDef, id: i64) -> FinderResult<Entity> {
        self.fetch_by_id(def, id)?.ok_or(FinderError::NotFound {
            class: def.class_name,
            id,
        })
    }

    /// Lists every id in the class's own table and fetches each aggregate
    /// individually. N+1 by design at this layer.
    pub fn fetch_all(&self, def: &'static EntityDef) -> FinderResult<Vec<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ID_COLUMN} FROM {} ORDER BY {ID_COLUMN} ASC;",
            def.table
        ))?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get::<_, i64>(0)?);
        }

        let mut entities = Vec::new();
        for id in ids {
            if let Some(entity) = self.fetch_by_id(def, id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Lazy reference to an aggregate, resolved on demand.
    pub fn fetch_reference_by_id(&self, def: &'static EntityDef, id: i64) -> Reference {
        Reference::lazy(def.class_name, id)
    }

    /// Joins every chain table by shared id, filtered to active root rows.
    fn merged_row(&self, concrete: &'static EntityDef, id: i64) -> FinderResult<Option<Row>> {
        let chain = concrete.superclass_list();
        let root = concrete.inheritance_root();

        let mut columns = vec![
            format!("{0}.{ID_COLUMN} AS {ID_COLUMN}", root.table),
            format!("{0}.{ACTIVE_COLUMN} AS {ACTIVE_COLUMN}", root.table),
            format!("{0}.{TYPE_COLUMN} AS {TYPE_COLUMN}", root.table),
            format!("{0}.{VERSION_ID_COLUMN} AS {VERSION_ID_COLUMN}", root.table),
        ];
        for class in &chain {
            for attr in class.attributes {
                if let Some(column) = self.attribute_column(attr)? {
                    columns.push(format!("{}.{column} AS {column}", class.table));
                }
            }
        }

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), root.table);
        for class in &chain {
            if std::ptr::eq(*class, root) {
                continue;
            }
            sql.push_str(&format!(
                " JOIN {0} ON {0}.{ID_COLUMN} = {1}.{ID_COLUMN}",
                class.table, root.table
            ));
        }
        sql.push_str(&format!(
            " WHERE {0}.{ID_COLUMN} = ?1 AND {0}.{ACTIVE_COLUMN} = 1;",
            root.table
        ));

        self.query_row_map(&sql, [id])
    }

    fn leaf_row(&self, def: &'static EntityDef, id: i64) -> FinderResult<Option<Row>> {
        let mut columns = vec![ID_COLUMN.to_string(), ACTIVE_COLUMN.to_string()];
        if def.needs_version {
            columns.push(VERSION_ID_COLUMN.to_string());
        }
        for class in def.superclass_list() {
            for attr in class.attributes {
                if let Some(column) = self.attribute_column(attr)? {
                    columns.push(column);
                }
            }
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {ID_COLUMN} = ?1 AND {ACTIVE_COLUMN} = 1;",
            columns.join(", "),
            def.table
        );
        self.query_row_map(&sql, [id])
    }

    /// Column name a descriptor occupies in its declaring table, if any.
    fn attribute_column(&self, attr: &AttrDescriptor) -> FinderResult<Option<String>> {
        match attr.kind {
            AttrKind::Plain(_) => Ok(Some(attr.name.to_string())),
            AttrKind::ParentRef { .. } => Ok(Some(naming::attribute_key(attr.name))),
            AttrKind::ImmutableRef { target } => Ok(Some(self.meta.reference_column(target)?)),
            AttrKind::ChildRef { .. }
            | AttrKind::MultiRef { .. }
            | AttrKind::ImmutableMultiRef { .. }
            | AttrKind::Version => Ok(None),
        }
    }

    fn query_row_map(&self, sql: &str, params: impl Params) -> FinderResult<Option<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        let mut rows = stmt.query(params)?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut map = Row::new();
        for (index, name) in names.iter().enumerate() {
            let value = AttrValue::from_sql_ref(row.get_ref(index)?)
                .map_err(FinderError::InvalidData)?;
            map.insert(name.clone(), value);
        }
        Ok(Some(map))
    }

    /// Builds the concrete instance from a merged row: attaches the shared
    /// version record, turns foreign-key columns into lazy references, then
    /// recursively attaches children and multi-references.
    fn create_object(&self, def: &'static EntityDef, mut row: Row) -> FinderResult<Entity> {
        let version_id = row.remove(VERSION_ID_COLUMN).and_then(|value| value.as_int());
        let version = Version::resolve(self.conn, version_id)?;

        let mut entity = Entity::new(def);
        let id = row
            .remove(ID_COLUMN)
            .and_then(|value| value.as_int())
            .ok_or_else(|| {
                FinderError::InvalidData(format!(
                    "row for `{}` carries no id",
                    def.class_name
                ))
            })?;
        entity.set_id(id);
        if let Some(active) = row.remove(ACTIVE_COLUMN).and_then(|value| value.as_bool()) {
            entity.set_active(active);
        }

        for attr in def.chain_attributes() {
            match attr.kind {
                AttrKind::Plain(ty) => {
                    if let Some(value) = row.remove(attr.name) {
                        let coerced = value.coerce(ty).map_err(FinderError::InvalidData)?;
                        entity.set(attr.name, coerced)?;
                    }
                }
                AttrKind::ImmutableRef { target } => {
                    let column = self.meta.reference_column(target)?;
                    let reference = row
                        .remove(&column)
                        .and_then(|value| value.as_int())
                        .map(|ref_id| Reference::lazy(target, ref_id));
                    entity.set_reference(attr.name, reference)?;
                }
                AttrKind::ParentRef { target } => {
                    let column = naming::attribute_key(attr.name);
                    let reference = row
                        .remove(&column)
                        .and_then(|value| value.as_int())
                        .map(|parent_id| Reference::lazy(target, parent_id));
                    entity.set_reference(attr.name, reference)?;
                }
                AttrKind::ChildRef { .. }
                | AttrKind::MultiRef { .. }
                | AttrKind::ImmutableMultiRef { .. }
                | AttrKind::Version => {}
            }
        }
        entity.set_version(version);

        self.attach_children(&mut entity)?;
        self.attach_multi_references(&mut entity)?;
        Ok(entity)
    }

    /// Loads every owned child collection: child rows are looked up by the
    /// child's declared parent foreign key, rehydrated individually (so
    /// subtype tags resolve), and linked through the owner.
    fn attach_children(&self, entity: &mut Entity) -> FinderResult<()> {
        let owner_id = match entity.id() {
            Some(id) => id,
            None => return Ok(()),
        };

        for attr in entity.def().child_refs() {
            let Some(target) = attr.kind.target() else {
                continue;
            };
            let child_def = self.meta.class_named(target)?;
            let Some((fk_table, fk_column)) = parent_link(child_def) else {
                continue;
            };

            let mut stmt = self.conn.prepare(&format!(
                "SELECT {ID_COLUMN} FROM {fk_table} WHERE {fk_column} = ?1 ORDER BY {ID_COLUMN} ASC;"
            ))?;
            let mut rows = stmt.query([owner_id])?;
            let mut child_ids = Vec::new();
            while let Some(row) = rows.next()? {
                child_ids.push(row.get::<_, i64>(0)?);
            }

            for child_id in child_ids {
                if let Some(child) = self.fetch_by_id(child_def, child_id)? {
                    entity.add_child(attr.name, child)?;
                }
            }
        }
        Ok(())
    }

    /// Loads every multi-reference collection as lazy references, in the
    /// intermediate table's insertion order.
    fn attach_multi_references(&self, entity: &mut Entity) -> FinderResult<()> {
        let owner_id = match entity.id() {
            Some(id) => id,
            None => return Ok(()),
        };

        for attr in entity.def().multi_refs() {
            let Some(target) = attr.kind.target() else {
                continue;
            };
            let (table, owner_column, dependent_column) =
                self.meta
                    .intermediate_descriptor(entity.def(), attr.name, target)?;

            let mut stmt = self.conn.prepare(&format!(
                "SELECT {dependent_column} FROM {table} WHERE {owner_column} = ?1 ORDER BY {ID_COLUMN} ASC;"
            ))?;
            let mut rows = stmt.query([owner_id])?;
            let mut dependent_ids = Vec::new();
            while let Some(row) = rows.next()? {
                dependent_ids.push(row.get::<_, i64>(0)?);
            }

            for dependent_id in dependent_ids {
                entity.add_reference(attr.name, Reference::lazy(target, dependent_id))?;
            }
        }
        Ok(())
    }
}

/// Table and foreign-key column through which a child class links to its
/// parent: the declaring class's table and `{parent_attr}_id`.
fn parent_link(child_def: &'static EntityDef) -> Option<(&'static str, String)> {
    for class in child_def.superclass_list() {
        for attr in class.attributes {
            if matches!(attr.kind, AttrKind::ParentRef { .. }) {
                return Some((class.table, naming::attribute_key(attr.name)));
            }
        }
    }
    None
}
