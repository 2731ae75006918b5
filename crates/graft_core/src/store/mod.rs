//! Record store seam.
//!
//! The engine never talks to a concrete database; it reads and writes through
//! [`RecordStore`]. Every call is awaited strictly in traversal/commit order,
//! so a backend may assume no interleaving from this layer.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::bundle::Record;
use crate::error::Result;
use crate::id::RecordId;

mod memory;
pub use memory::MemoryStore;

/// Query and batch-insert primitives over one typed table.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch records of `kind` whose `filter_field` value is one of `ids`,
    /// projected to `fields`. A `filter_field` of `None` filters on the
    /// identity itself. Results must be deterministically ordered: by the
    /// `order_by` field's value when given, with the identity as tiebreaker.
    async fn query(
        &self,
        kind: &str,
        fields: &[String],
        filter_field: Option<&str>,
        ids: &BTreeSet<RecordId>,
        order_by: Option<&str>,
    ) -> Result<Vec<Record>>;

    /// Insert `records` as a single unit, assigning each a fresh identity.
    /// Returns the new identities in input order.
    async fn insert_batch(&self, kind: &str, records: Vec<Record>) -> Result<Vec<RecordId>>;
}
