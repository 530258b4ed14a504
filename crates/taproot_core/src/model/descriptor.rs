//! Entity metadata: attribute descriptors, inheritance chains, registry.
//!
//! # Responsibility
//! - Describe every persistent attribute of an entity class as data.
//! - Expose inheritance-chain and table-naming lookups to mapper and finder.
//!
//! # Invariants
//! - `EntityDef` records are `'static` and declared up front; nothing is
//!   introspected at runtime.
//! - The mapping strategy of a chain is declared on its root and shared by
//!   every class below it.
//! - Type tags stored in `_type` columns are table names and resolve through
//!   the registry.

use crate::model::naming;
use crate::model::value::ScalarType;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Column carrying the concrete-subtype tag on class-table root rows.
pub const TYPE_COLUMN: &str = "_type";
/// Column linking a root row to its `_versions` record.
pub const VERSION_ID_COLUMN: &str = "_version_id";
/// Soft-delete flag column, present on every entity table.
pub const ACTIVE_COLUMN: &str = "active";
/// Primary-key column of every entity table.
pub const ID_COLUMN: &str = "id";
/// Pseudo-attribute name under which the version record is serialized.
pub const VERSION_ATTR: &str = "_version";

/// Classification of one declared attribute.
///
/// Reference kinds carry the class name of the far side; the registry turns
/// that into tables and foreign-key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// Stored in a column of the declaring class's table.
    Plain(ScalarType),
    /// Back-pointer to the owning entity. Never serialized into rows.
    ParentRef { target: &'static str },
    /// Owned child collection, persisted in the child's tables.
    ChildRef { target: &'static str },
    /// Many-to-many association through an intermediate table.
    MultiRef { target: &'static str },
    /// Weak single reference stored as a foreign-key column.
    ImmutableRef { target: &'static str },
    /// Weak many-to-many association through an intermediate table.
    ImmutableMultiRef { target: &'static str },
    /// Optimistic-concurrency version record (builtin pseudo-attribute).
    Version,
}

impl AttrKind {
    /// Far-side class for reference kinds.
    pub fn target(&self) -> Option<&'static str> {
        match self {
            Self::ParentRef { target }
            | Self::ChildRef { target }
            | Self::MultiRef { target }
            | Self::ImmutableRef { target }
            | Self::ImmutableMultiRef { target } => Some(target),
            Self::Plain(_) | Self::Version => None,
        }
    }
}

/// One declared attribute of an entity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDescriptor {
    pub name: &'static str,
    pub kind: AttrKind,
}

/// Table-layout strategy of an inheritance chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// One table per class level, joined by shared id.
    ClassTable,
    /// One full table per concrete class, no joins.
    LeafTable,
}

/// Statically declared metadata for one entity class.
#[derive(Debug, PartialEq, Eq)]
pub struct EntityDef {
    /// Canonical class name, used for registry lookups and diagnostics.
    pub class_name: &'static str,
    /// Table declared by this class level.
    pub table: &'static str,
    /// Superclass link; `None` marks the persistence root.
    pub parent: Option<&'static EntityDef>,
    /// Layout strategy; consulted on the chain root.
    pub strategy: MappingKind,
    /// Whether leaf-table rows of this class carry a `_version_id` column.
    pub needs_version: bool,
    /// Updates on immutable classes fail.
    pub immutable: bool,
    /// Attributes declared by this class level only.
    pub attributes: &'static [AttrDescriptor],
}

impl EntityDef {
    /// Chain from this class up to the persistence root, self first.
    pub fn superclass_list(&'static self) -> Vec<&'static EntityDef> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Root of this class's inheritance chain.
    pub fn inheritance_root(&'static self) -> &'static EntityDef {
        let mut current = self;
        while let Some(parent) = current.parent {
            current = parent;
        }
        current
    }

    /// Strategy declared on the chain root.
    pub fn strategy(&'static self) -> MappingKind {
        self.inheritance_root().strategy
    }

    /// All attributes of the chain, most specific class first.
    pub fn chain_attributes(&'static self) -> Vec<&'static AttrDescriptor> {
        self.superclass_list()
            .into_iter()
            .flat_map(|def| def.attributes.iter())
            .collect()
    }

    /// Looks an attribute up anywhere in the chain.
    pub fn attribute(&'static self, name: &str) -> Option<&'static AttrDescriptor> {
        self.chain_attributes()
            .into_iter()
            .find(|attr| attr.name == name)
    }

    /// The chain's parent-reference attribute, if this is a child class.
    pub fn parent_ref(&'static self) -> Option<&'static AttrDescriptor> {
        self.chain_attributes()
            .into_iter()
            .find(|attr| matches!(attr.kind, AttrKind::ParentRef { .. }))
    }

    pub fn has_parent_ref(&'static self) -> bool {
        self.parent_ref().is_some()
    }

    /// Child-collection attributes of the chain.
    pub fn child_refs(&'static self) -> Vec<&'static AttrDescriptor> {
        self.chain_attributes()
            .into_iter()
            .filter(|attr| matches!(attr.kind, AttrKind::ChildRef { .. }))
            .collect()
    }

    /// Multi-reference attributes of the chain, mutable and immutable.
    pub fn multi_refs(&'static self) -> Vec<&'static AttrDescriptor> {
        self.chain_attributes()
            .into_iter()
            .filter(|attr| {
                matches!(
                    attr.kind,
                    AttrKind::MultiRef { .. } | AttrKind::ImmutableMultiRef { .. }
                )
            })
            .collect()
    }

    /// Single immutable-reference attributes of the chain.
    pub fn immutable_refs(&'static self) -> Vec<&'static AttrDescriptor> {
        self.chain_attributes()
            .into_iter()
            .filter(|attr| matches!(attr.kind, AttrKind::ImmutableRef { .. }))
            .collect()
    }

    /// Table answering for this class in intermediate-table naming: the
    /// chain root's table under class-table layout, the class's own table
    /// under leaf-table layout.
    pub fn intermediate_naming_table(&'static self) -> &'static str {
        match self.strategy() {
            MappingKind::ClassTable => self.inheritance_root().table,
            MappingKind::LeafTable => self.table,
        }
    }
}

pub type MetaResult<T> = Result<T, MetaError>;

/// Metadata lookup failures.
#[derive(Debug)]
pub enum MetaError {
    UnknownClass(String),
    UnknownTable(String),
    UnknownAttribute { class: &'static str, attr: String },
}

impl Display for MetaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownClass(name) => write!(f, "unknown entity class `{name}`"),
            Self::UnknownTable(name) => write!(f, "no entity class registered for table `{name}`"),
            Self::UnknownAttribute { class, attr } => {
                write!(f, "class `{class}` declares no attribute `{attr}`")
            }
        }
    }
}

impl Error for MetaError {}

/// Type-metadata provider: resolves class names, type tags, and row-shape
/// naming for every registered entity class.
#[derive(Debug, Default)]
pub struct MetaRegistry {
    by_class: HashMap<&'static str, &'static EntityDef>,
    by_table: HashMap<&'static str, &'static EntityDef>,
}

impl MetaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class and every superclass of its chain.
    pub fn register(&mut self, def: &'static EntityDef) {
        for class in def.superclass_list() {
            self.by_class.insert(class.class_name, class);
            self.by_table.insert(class.table, class);
        }
    }

    /// Convenience builder used by setup code.
    pub fn with(mut self, def: &'static EntityDef) -> Self {
        self.register(def);
        self
    }

    pub fn class_named(&self, name: &str) -> MetaResult<&'static EntityDef> {
        self.by_class
            .get(name)
            .copied()
            .ok_or_else(|| MetaError::UnknownClass(name.to_string()))
    }

    /// Resolves a stored `_type` tag back to its class.
    pub fn class_for_table(&self, table: &str) -> MetaResult<&'static EntityDef> {
        self.by_table
            .get(table)
            .copied()
            .ok_or_else(|| MetaError::UnknownTable(table.to_string()))
    }

    /// Foreign-key column name for a reference to `target_class`.
    pub fn reference_column(&self, target_class: &str) -> MetaResult<String> {
        let target = self.class_named(target_class)?;
        Ok(naming::foreign_key(target.intermediate_naming_table()))
    }

    /// Intermediate-table descriptor for a multi-reference attribute:
    /// `(table, owner_fk_column, dependent_fk_column)`.
    pub fn intermediate_descriptor(
        &self,
        owner: &'static EntityDef,
        attr: &'static str,
        target_class: &str,
    ) -> MetaResult<(String, String, String)> {
        let dependent = self.class_named(target_class)?;
        let owner_table = owner.intermediate_naming_table();
        let table = naming::intermediate_table(owner_table, attr);
        let owner_column = naming::foreign_key(owner_table);
        let dependent_column = naming::foreign_key(dependent.intermediate_naming_table());
        Ok((table, owner_column, dependent_column))
    }
}
