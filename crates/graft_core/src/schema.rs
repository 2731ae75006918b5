//! Schema catalog: the engine's view of record types.
//!
//! The traversal never hardcodes a domain. Everything it knows about a type
//! (its fields, which of them are references, which child relationships hang
//! off it) comes from a [`SchemaOracle`]. Descriptors are fetched on demand
//! and never cached by the engine, so a catalog backed by a live metadata
//! service behaves the same as the static one shipped here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{GraftError, Result};

/// Scalar shape of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    DateTime,
    /// An identity string pointing at another record (many-to-one).
    Reference,
}

/// One field of a record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,

    /// Target type for reference fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reference_target: Option<String>,

    /// Auto-generated or computed fields. Never exported, never written.
    #[serde(default)]
    pub read_only: bool,
}

impl FieldDescriptor {
    /// A writable scalar field.
    pub fn scalar(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            reference_target: None,
            read_only: false,
        }
    }

    /// A writable reference field pointing at `target`.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference,
            reference_target: Some(target.into()),
            read_only: false,
        }
    }

    /// Mark the field auto-generated/computed.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference)
    }
}

/// The inverse one-to-many edge: records of `child_type` point back at the
/// parent through `foreign_key_field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildRelationship {
    pub child_type: String,
    pub foreign_key_field: String,

    /// Children deleted with the parent; part of the parent aggregate.
    #[serde(default)]
    pub cascade: bool,
}

/// Immutable description of one record type, supplied by the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub children: Vec<ChildRelationship>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: append a field.
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Builder: append a child relationship.
    pub fn with_child(
        mut self,
        child_type: impl Into<String>,
        foreign_key_field: impl Into<String>,
        cascade: bool,
    ) -> Self {
        self.children.push(ChildRelationship {
            child_type: child_type.into(),
            foreign_key_field: foreign_key_field.into(),
            cascade,
        });
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All reference fields, in declaration order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_reference())
    }
}

/// Metadata source the traversal consults for every visited type.
#[async_trait]
pub trait SchemaOracle: Send + Sync {
    /// Describe `name`, or fail with [`GraftError::UnknownType`].
    async fn describe_type(&self, name: &str) -> Result<TypeDescriptor>;
}

/// In-memory schema catalog built up front by the caller.
///
/// The shippable [`SchemaOracle`] implementation; tests and embedded callers
/// register their types programmatically.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    types: HashMap<String, TypeDescriptor>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a type, replacing any earlier definition.
    pub fn define_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.insert(descriptor.name.clone(), descriptor);
        self
    }
}

#[async_trait]
impl SchemaOracle for StaticCatalog {
    async fn describe_type(&self, name: &str) -> Result<TypeDescriptor> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| GraftError::unknown_type(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_descriptor() -> TypeDescriptor {
        TypeDescriptor::new("order")
            .with_field(FieldDescriptor::scalar("name", FieldKind::Text))
            .with_field(FieldDescriptor::reference("customer_id", "customer"))
            .with_field(FieldDescriptor::scalar("total", FieldKind::Number).read_only())
            .with_child("line_item", "order_id", true)
    }

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = StaticCatalog::new().define_type(order_descriptor());

        let descriptor = catalog.describe_type("order").await.unwrap();
        assert_eq!(descriptor.name, "order");
        assert!(descriptor.field("customer_id").unwrap().is_reference());
        assert!(descriptor.field("total").unwrap().read_only);
        assert_eq!(descriptor.children[0].child_type, "line_item");
    }

    #[tokio::test]
    async fn test_unknown_type_is_an_error() {
        let catalog = StaticCatalog::new();
        let err = catalog.describe_type("invoice").await.unwrap_err();
        assert!(matches!(err, GraftError::UnknownType { name } if name == "invoice"));
    }
}
