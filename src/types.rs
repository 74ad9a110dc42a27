use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Node or relationship id, as assigned by the store.
pub type EntityId = u64;
/// Stable id assigned to an index at creation time.
pub type IndexId = u64;
pub type LabelId = u32;
pub type RelationshipTypeId = u32;
pub type PropertyKeyId = u32;

/// What kind of entity a schema descriptor targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Label(LabelId),
    RelationshipType(RelationshipTypeId),
}

/// Identifies *what* is indexed: a label (or relationship type) plus one or
/// more property keys. The order of the keys defines the value slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    entity: EntityKind,
    property_keys: SmallVec<[PropertyKeyId; 4]>,
}

impl SchemaDescriptor {
    pub fn for_label(label: LabelId, property_keys: &[PropertyKeyId]) -> Self {
        Self {
            entity: EntityKind::Label(label),
            property_keys: SmallVec::from_slice(property_keys),
        }
    }

    pub fn for_relationship_type(rel_type: RelationshipTypeId, property_keys: &[PropertyKeyId]) -> Self {
        Self {
            entity: EntityKind::RelationshipType(rel_type),
            property_keys: SmallVec::from_slice(property_keys),
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn property_keys(&self) -> &[PropertyKeyId] {
        &self.property_keys
    }

    /// Single-property schemas only: the one indexed key.
    pub fn property_key(&self) -> Option<PropertyKeyId> {
        match self.property_keys.as_slice() {
            [key] => Some(*key),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        self.property_keys.len()
    }

    pub fn is_composite(&self) -> bool {
        self.property_keys.len() > 1
    }

    /// Position of `key` among the indexed keys.
    pub fn slot_of(&self, key: PropertyKeyId) -> Option<usize> {
        self.property_keys.iter().position(|k| *k == key)
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            EntityKind::Label(id) => write!(f, ":label[{id}]")?,
            EntityKind::RelationshipType(id) => write!(f, "-[type[{id}]]-")?,
        }
        let keys: Vec<String> = self.property_keys.iter().map(|k| k.to_string()).collect();
        write!(f, "({})", keys.join(", "))
    }
}

/// Uniqueness flavour of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    NonUnique,
    Unique,
}

/// A schema descriptor together with its uniqueness flavour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    schema: SchemaDescriptor,
    kind: IndexKind,
}

impl IndexDescriptor {
    pub fn non_unique(schema: SchemaDescriptor) -> Self {
        Self { schema, kind: IndexKind::NonUnique }
    }

    pub fn unique(schema: SchemaDescriptor) -> Self {
        Self { schema, kind: IndexKind::Unique }
    }

    /// Shortcut for a non-unique label index.
    pub fn for_label(label: LabelId, property_keys: &[PropertyKeyId]) -> Self {
        Self::non_unique(SchemaDescriptor::for_label(label, property_keys))
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_unique(&self) -> bool {
        self.kind == IndexKind::Unique
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IndexKind::NonUnique => write!(f, "Index{}", self.schema),
            IndexKind::Unique => write!(f, "UniqueIndex{}", self.schema),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_resolution() {
        let schema = SchemaDescriptor::for_label(3, &[10, 20]);
        assert_eq!(schema.slot_of(10), Some(0));
        assert_eq!(schema.slot_of(20), Some(1));
        assert_eq!(schema.slot_of(30), None);
        assert!(schema.is_composite());
        assert_eq!(schema.property_key(), None);
    }

    #[test]
    fn test_display() {
        let index = IndexDescriptor::for_label(1, &[2]);
        assert_eq!(index.to_string(), "Index:label[1](2)");
        let rel = IndexDescriptor::unique(SchemaDescriptor::for_relationship_type(4, &[5, 6]));
        assert_eq!(rel.to_string(), "UniqueIndex-[type[4]]-(5, 6)");
    }
}
