//! Index entry updates and the property lookup collaborator.

use crate::error::{IndexError, Result};
use crate::types::{EntityId, PropertyKeyId, SchemaDescriptor};
use crate::value::{Value, ValueTuple};
use smallvec::smallvec;

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Add(ValueTuple),
    Change { before: ValueTuple, after: ValueTuple },
    Remove(ValueTuple),
    /// Only the key is known; the current values must be looked up.
    Touched,
}

/// One change to one logical index, produced by the commit pipeline or by
/// a population scan.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntryUpdate {
    pub entity_id: EntityId,
    pub schema: SchemaDescriptor,
    pub kind: UpdateKind,
}

impl IndexEntryUpdate {
    pub fn add(entity_id: EntityId, schema: &SchemaDescriptor, value: impl Into<Value>) -> Self {
        Self::add_tuple(entity_id, schema, smallvec![value.into()])
    }

    pub fn add_tuple(entity_id: EntityId, schema: &SchemaDescriptor, values: ValueTuple) -> Self {
        Self { entity_id, schema: schema.clone(), kind: UpdateKind::Add(values) }
    }

    pub fn change(
        entity_id: EntityId,
        schema: &SchemaDescriptor,
        before: impl Into<Value>,
        after: impl Into<Value>,
    ) -> Self {
        Self::change_tuple(entity_id, schema, smallvec![before.into()], smallvec![after.into()])
    }

    pub fn change_tuple(
        entity_id: EntityId,
        schema: &SchemaDescriptor,
        before: ValueTuple,
        after: ValueTuple,
    ) -> Self {
        Self { entity_id, schema: schema.clone(), kind: UpdateKind::Change { before, after } }
    }

    pub fn remove(entity_id: EntityId, schema: &SchemaDescriptor, value: impl Into<Value>) -> Self {
        Self::remove_tuple(entity_id, schema, smallvec![value.into()])
    }

    pub fn remove_tuple(entity_id: EntityId, schema: &SchemaDescriptor, values: ValueTuple) -> Self {
        Self { entity_id, schema: schema.clone(), kind: UpdateKind::Remove(values) }
    }

    /// Key-only update: the entity's indexed properties changed.
    pub fn touched(entity_id: EntityId, schema: &SchemaDescriptor) -> Self {
        Self { entity_id, schema: schema.clone(), kind: UpdateKind::Touched }
    }

    pub fn is_add(&self) -> bool {
        matches!(self.kind, UpdateKind::Add(_))
    }

    /// Values the entity holds after the update, if carried.
    pub fn values_after(&self) -> Option<&ValueTuple> {
        match &self.kind {
            UpdateKind::Add(values) | UpdateKind::Change { after: values, .. } => Some(values),
            UpdateKind::Remove(_) | UpdateKind::Touched => None,
        }
    }

    /// Values the entity held before the update, if carried.
    pub fn values_before(&self) -> Option<&ValueTuple> {
        match &self.kind {
            UpdateKind::Remove(values) | UpdateKind::Change { before: values, .. } => Some(values),
            UpdateKind::Add(_) | UpdateKind::Touched => None,
        }
    }

    /// Reject updates addressed to another schema or carrying the wrong
    /// number of values.
    pub fn validate_for(&self, schema: &SchemaDescriptor) -> Result<()> {
        if &self.schema != schema {
            return Err(IndexError::SchemaMismatch {
                expected: schema.to_string(),
                actual: self.schema.to_string(),
            });
        }
        let arity = schema.arity();
        let wrong = |values: &ValueTuple| values.len() != arity;
        let bad_arity = match &self.kind {
            UpdateKind::Add(v) | UpdateKind::Remove(v) => wrong(v),
            UpdateKind::Change { before, after } => wrong(before) || wrong(after),
            UpdateKind::Touched => false,
        };
        if bad_arity {
            return Err(IndexError::InvalidUpdate(format!(
                "entity {} carries the wrong number of values for {}",
                self.entity_id, schema
            )));
        }
        Ok(())
    }
}

/// Resolves the current value of an entity's property. Used by populating
/// updaters for key-only updates.
pub trait PropertyAccessor: Send + Sync {
    fn property_value(&self, entity: EntityId, key: PropertyKeyId) -> Option<Value>;

    /// All values of `schema` for `entity`, or `None` if any is missing.
    fn values_for(&self, entity: EntityId, schema: &SchemaDescriptor) -> Option<ValueTuple> {
        schema
            .property_keys()
            .iter()
            .map(|key| self.property_value(entity, *key))
            .collect()
    }
}

impl<F> PropertyAccessor for F
where
    F: Fn(EntityId, PropertyKeyId) -> Option<Value> + Send + Sync,
{
    fn property_value(&self, entity: EntityId, key: PropertyKeyId) -> Option<Value> {
        self(entity, key)
    }
}
