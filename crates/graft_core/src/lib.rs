//! Graft — portable subgraph export/import for typed record stores.
//!
//! Export bundles an anchor set plus everything reachable from it through
//! declared relationships into one portable JSON document; import replays
//! that document into a target store, regenerating identities and repairing
//! cross-references as it goes.
//!
//! The schema catalog ([`schema::SchemaOracle`]) and the record store
//! ([`store::RecordStore`]) are external collaborators behind traits; the
//! crate ships a static catalog and an in-memory store so the engine runs
//! end to end out of the box.

pub mod bundle;
pub mod error;
pub mod id;
pub mod policy;
pub mod rehydrate;
pub mod schema;
pub mod store;
pub mod walker;

pub use bundle::{Bundle, BundleDocument, DOCUMENT_VERSION, ExportStats, Record, RecordGroup};
pub use error::{GraftError, Result};
pub use id::RecordId;
pub use policy::{FieldRef, TraversalPolicy};
pub use rehydrate::{Rehydrator, ResolutionCallback, UnresolvedReference};
pub use schema::{
    ChildRelationship, FieldDescriptor, FieldKind, SchemaOracle, StaticCatalog, TypeDescriptor,
};
pub use store::{MemoryStore, RecordStore};
pub use walker::GraphWalker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        Bundle, BundleDocument, FieldDescriptor, FieldKind, FieldRef, GraftError, GraphWalker,
        MemoryStore, Record, RecordGroup, RecordId, RecordStore, Rehydrator, Result, SchemaOracle,
        StaticCatalog, TraversalPolicy, TypeDescriptor, UnresolvedReference,
    };
}
