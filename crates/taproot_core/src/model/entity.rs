//! Entity graph: dynamic records over static metadata.
//!
//! # Responsibility
//! - Hold attribute values, owned children, and associations for one entity.
//! - Provide the graph-walk accessors used by serializer, mapper, and finder.
//!
//! # Invariants
//! - An entity's shape is fixed by its `EntityDef`; setting an undeclared
//!   attribute is an error, not an insertion.
//! - Cloning preserves the instance id: a clone is a snapshot of the same
//!   logical object, which is what unit-of-work identity tracks.
//! - Child back-pointers are kept as references, never as owned parents, so
//!   the owned tree stays acyclic.

use crate::model::descriptor::{AttrDescriptor, AttrKind, EntityDef};
use crate::model::value::AttrValue;
use crate::model::version::Version;
use crate::repo::finder::{Finder, FinderResult};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EntityResult<T> = Result<T, EntityError>;

/// Misuse of an entity's declared shape.
#[derive(Debug)]
pub enum EntityError {
    UnknownAttribute { class: &'static str, attr: String },
    KindMismatch {
        class: &'static str,
        attr: &'static str,
        expected: &'static str,
    },
    ForeignChild {
        class: &'static str,
        attr: &'static str,
        child_class: &'static str,
    },
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAttribute { class, attr } => {
                write!(f, "class `{class}` declares no attribute `{attr}`")
            }
            Self::KindMismatch {
                class,
                attr,
                expected,
            } => write!(f, "attribute `{class}.{attr}` is not a {expected}"),
            Self::ForeignChild {
                class,
                attr,
                child_class,
            } => write!(
                f,
                "`{child_class}` is not an accepted child class for `{class}.{attr}`"
            ),
        }
    }
}

impl Error for EntityError {}

/// Weak relation to another aggregate root.
///
/// Holds only id and type until resolved; resolution is idempotent and
/// caches the loaded target on the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    class_name: &'static str,
    id: Option<i64>,
    target_instance: Option<Uuid>,
    resolved: Option<Box<Entity>>,
}

impl Reference {
    /// Unresolved reference by id and class.
    pub fn lazy(class_name: &'static str, id: i64) -> Self {
        Self {
            class_name,
            id: Some(id),
            target_instance: None,
            resolved: None,
        }
    }

    /// Reference to an in-memory entity, capturing its instance identity.
    /// The id may still be absent when the target is unpersisted.
    pub fn for_entity(entity: &Entity) -> Self {
        Self {
            class_name: entity.def().class_name,
            id: entity.id(),
            target_instance: Some(entity.instance_id()),
            resolved: None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    /// Instance identity of the in-memory target, when known.
    pub fn target_instance(&self) -> Option<Uuid> {
        self.target_instance
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Cached target, when already resolved.
    pub fn resolved(&self) -> Option<&Entity> {
        self.resolved.as_deref()
    }

    /// Loads the target through the finder, caching it on first call.
    pub fn resolve(&mut self, finder: &Finder<'_>) -> FinderResult<Option<&Entity>> {
        if self.resolved.is_none() {
            let Some(id) = self.id else {
                return Ok(None);
            };
            let def = finder.meta().class_named(self.class_name)?;
            if let Some(entity) = finder.fetch_by_id(def, id)? {
                self.resolved = Some(Box::new(entity));
            }
        }
        Ok(self.resolved.as_deref())
    }
}

/// Storage slot for one declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar(AttrValue),
    Reference(Option<Reference>),
    Children(Vec<Entity>),
    References(Vec<Reference>),
}

/// One domain object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    def: &'static EntityDef,
    instance_id: Uuid,
    id: Option<i64>,
    active: bool,
    version: Option<Version>,
    fields: BTreeMap<&'static str, Field>,
}

impl Entity {
    /// Fresh unpersisted entity with default-initialized attributes.
    pub fn new(def: &'static EntityDef) -> Self {
        let mut fields = BTreeMap::new();
        for attr in def.chain_attributes() {
            let slot = match attr.kind {
                AttrKind::Plain(_) => Field::Scalar(AttrValue::Null),
                AttrKind::ParentRef { .. } | AttrKind::ImmutableRef { .. } => {
                    Field::Reference(None)
                }
                AttrKind::ChildRef { .. } => Field::Children(Vec::new()),
                AttrKind::MultiRef { .. } | AttrKind::ImmutableMultiRef { .. } => {
                    Field::References(Vec::new())
                }
                AttrKind::Version => continue,
            };
            fields.insert(attr.name, slot);
        }
        Self {
            def,
            instance_id: Uuid::new_v4(),
            id: None,
            active: true,
            version: None,
            fields,
        }
    }

    pub fn def(&self) -> &'static EntityDef {
        self.def
    }

    pub fn class_name(&self) -> &'static str {
        self.def.class_name
    }

    /// Process-unique identity of this logical object, shared by snapshots.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    /// Raw field slot, for serialization walks.
    pub fn field(&self, attr: &str) -> Option<&Field> {
        self.fields.get(attr)
    }

    fn descriptor(&self, attr: &str) -> EntityResult<&'static AttrDescriptor> {
        self.def
            .attribute(attr)
            .ok_or_else(|| EntityError::UnknownAttribute {
                class: self.def.class_name,
                attr: attr.to_string(),
            })
    }

    pub fn scalar(&self, attr: &str) -> Option<&AttrValue> {
        match self.fields.get(attr) {
            Some(Field::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    pub fn set(&mut self, attr: &str, value: impl Into<AttrValue>) -> EntityResult<()> {
        let descriptor = self.descriptor(attr)?;
        match descriptor.kind {
            AttrKind::Plain(_) => {
                self.fields.insert(descriptor.name, Field::Scalar(value.into()));
                Ok(())
            }
            _ => Err(EntityError::KindMismatch {
                class: self.def.class_name,
                attr: descriptor.name,
                expected: "plain attribute",
            }),
        }
    }

    /// Single reference slot (parent or immutable reference).
    pub fn reference(&self, attr: &str) -> Option<&Reference> {
        match self.fields.get(attr) {
            Some(Field::Reference(value)) => value.as_ref(),
            _ => None,
        }
    }

    pub fn set_reference(&mut self, attr: &str, reference: Option<Reference>) -> EntityResult<()> {
        let descriptor = self.descriptor(attr)?;
        match descriptor.kind {
            AttrKind::ParentRef { .. } | AttrKind::ImmutableRef { .. } => {
                self.fields
                    .insert(descriptor.name, Field::Reference(reference));
                Ok(())
            }
            _ => Err(EntityError::KindMismatch {
                class: self.def.class_name,
                attr: descriptor.name,
                expected: "single reference",
            }),
        }
    }

    /// Mutable access to a single reference slot, e.g. for resolution.
    pub fn reference_mut(&mut self, attr: &str) -> Option<&mut Reference> {
        match self.fields.get_mut(attr) {
            Some(Field::Reference(value)) => value.as_mut(),
            _ => None,
        }
    }

    pub fn children(&self, attr: &str) -> &[Entity] {
        match self.fields.get(attr) {
            Some(Field::Children(children)) => children,
            _ => &[],
        }
    }

    /// Links an owned child, wiring its parent back-pointer to this entity.
    pub fn add_child(&mut self, attr: &str, mut child: Entity) -> EntityResult<()> {
        let descriptor = self.descriptor(attr)?;
        let AttrKind::ChildRef { target } = descriptor.kind else {
            return Err(EntityError::KindMismatch {
                class: self.def.class_name,
                attr: descriptor.name,
                expected: "child collection",
            });
        };
        let accepted = child
            .def()
            .superclass_list()
            .iter()
            .any(|class| class.class_name == target);
        if !accepted {
            return Err(EntityError::ForeignChild {
                class: self.def.class_name,
                attr: descriptor.name,
                child_class: child.def().class_name,
            });
        }

        let back_pointer = Reference::for_entity(self);
        if let Some(parent_attr) = child.def().parent_ref() {
            child
                .fields
                .insert(parent_attr.name, Field::Reference(Some(back_pointer)));
        }
        match self.fields.get_mut(descriptor.name) {
            Some(Field::Children(children)) => {
                children.push(child);
                Ok(())
            }
            _ => unreachable!("child slot shape is fixed at construction"),
        }
    }

    /// Finds an owned child anywhere in this entity's collections by
    /// identity equivalence (class + id).
    pub fn find_child(&self, class_name: &str, id: i64) -> Option<&Entity> {
        for attr in self.def.child_refs() {
            for child in self.children(attr.name) {
                if child.class_name() == class_name && child.id() == Some(id) {
                    return Some(child);
                }
            }
        }
        None
    }

    pub fn references(&self, attr: &str) -> &[Reference] {
        match self.fields.get(attr) {
            Some(Field::References(references)) => references,
            _ => &[],
        }
    }

    /// Mutable access to a multi-reference collection, e.g. for resolution.
    pub fn references_mut(&mut self, attr: &str) -> Option<&mut Vec<Reference>> {
        match self.fields.get_mut(attr) {
            Some(Field::References(references)) => Some(references),
            _ => None,
        }
    }

    /// Mutable access to one owned child by position.
    pub fn child_mut(&mut self, attr: &str, index: usize) -> Option<&mut Entity> {
        match self.fields.get_mut(attr) {
            Some(Field::Children(children)) => children.get_mut(index),
            _ => None,
        }
    }

    /// Unlinks an owned child by identity equivalence. Returns whether a
    /// child was removed.
    pub fn remove_child(&mut self, attr: &str, class_name: &str, id: i64) -> EntityResult<bool> {
        let descriptor = self.descriptor(attr)?;
        match self.fields.get_mut(descriptor.name) {
            Some(Field::Children(children)) => {
                let before = children.len();
                children.retain(|child| {
                    !(child.class_name() == class_name && child.id() == Some(id))
                });
                Ok(children.len() != before)
            }
            _ => Err(EntityError::KindMismatch {
                class: self.def.class_name,
                attr: descriptor.name,
                expected: "child collection",
            }),
        }
    }

    /// Drops a multi-reference by target id. Returns whether one was removed.
    pub fn remove_reference(&mut self, attr: &str, id: i64) -> EntityResult<bool> {
        let descriptor = self.descriptor(attr)?;
        match self.fields.get_mut(descriptor.name) {
            Some(Field::References(references)) => {
                let before = references.len();
                references.retain(|reference| reference.id() != Some(id));
                Ok(references.len() != before)
            }
            _ => Err(EntityError::KindMismatch {
                class: self.def.class_name,
                attr: descriptor.name,
                expected: "multi-reference collection",
            }),
        }
    }

    /// Appends a multi-reference in insertion order.
    pub fn add_reference(&mut self, attr: &str, reference: Reference) -> EntityResult<()> {
        let descriptor = self.descriptor(attr)?;
        match descriptor.kind {
            AttrKind::MultiRef { .. } | AttrKind::ImmutableMultiRef { .. } => {
                match self.fields.get_mut(descriptor.name) {
                    Some(Field::References(references)) => {
                        references.push(reference);
                        Ok(())
                    }
                    _ => unreachable!("multi-reference slot shape is fixed at construction"),
                }
            }
            _ => Err(EntityError::KindMismatch {
                class: self.def.class_name,
                attr: descriptor.name,
                expected: "multi-reference collection",
            }),
        }
    }
}
