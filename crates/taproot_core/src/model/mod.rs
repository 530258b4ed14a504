//! Domain model: values, metadata, entities, versions, naming.

pub mod descriptor;
pub mod entity;
pub mod naming;
pub mod value;
pub mod version;

pub use descriptor::{
    AttrDescriptor, AttrKind, EntityDef, MappingKind, MetaError, MetaRegistry, MetaResult,
};
pub use entity::{Entity, EntityError, EntityResult, Field, Reference};
pub use value::{AttrValue, Row, ScalarType};
pub use version::Version;
