//! Export traversal: walks the anchor subgraph into an ordered bundle.
//!
//! The walk order is the whole contract. For each visited type, followed
//! references are walked and appended to the bundle *before* the type's own
//! records, and cascade children after them. Any record's referenced
//! ancestors therefore occupy earlier bundle positions, which is exactly the
//! dependency order the rehydrator commits in.

use futures::future::BoxFuture;
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::bundle::{Bundle, BundleDocument};
use crate::error::{GraftError, Result};
use crate::id::RecordId;
use crate::policy::TraversalPolicy;
use crate::schema::{SchemaOracle, TypeDescriptor};
use crate::store::RecordStore;

/// Reference hops beyond this depth are silently cut off.
const MAX_OUTWARD_DEPTH: u8 = 3;
/// Child hops beyond this depth are silently cut off.
const MAX_INWARD_DEPTH: u8 = 3;

/// Secondary sort key requested from the store for reproducible output.
const STABLE_ORDER_FIELD: &str = "name";

pub struct GraphWalker<'a> {
    store: &'a dyn RecordStore,
    oracle: &'a dyn SchemaOracle,
}

impl<'a> GraphWalker<'a> {
    pub fn new(store: &'a dyn RecordStore, oracle: &'a dyn SchemaOracle) -> Self {
        Self { store, oracle }
    }

    /// Export entry point: bundle everything reachable from `anchor_ids`
    /// under `policy` into a portable document.
    ///
    /// The policy defaults to the auto-derived policy for the anchor kind
    /// when omitted. Fails on an empty anchor set or one mixing kinds;
    /// export only reads, so nothing is partially written on failure.
    pub async fn serialize(
        &self,
        anchor_ids: &[RecordId],
        policy: Option<&TraversalPolicy>,
    ) -> Result<BundleDocument> {
        let Some(first) = anchor_ids.first() else {
            return Err(GraftError::EmptyAnchorSet);
        };
        let root_kind = first.kind().to_string();
        if let Some(stray) = anchor_ids.iter().find(|id| id.kind() != root_kind) {
            return Err(GraftError::MixedAnchorKinds {
                expected: root_kind,
                found: stray.kind().to_string(),
            });
        }

        let derived;
        let policy = match policy {
            Some(policy) => policy,
            None => {
                derived = TraversalPolicy::auto_derive(self.oracle, &root_kind).await?;
                &derived
            }
        };

        let ids: BTreeSet<RecordId> = anchor_ids.iter().cloned().collect();
        let mut bundle = Bundle::new();
        self.walk(ids, &root_kind, None, Some(policy), 0, 0, &mut bundle)
            .await?;

        let stats = bundle.stats();
        debug!(
            root = %root_kind,
            groups = stats.group_count,
            records = stats.record_count,
            "export complete"
        );
        Ok(bundle.into_document(root_kind))
    }

    /// One traversal step: fetch, walk references, append self, then
    /// children.
    #[allow(clippy::too_many_arguments)]
    fn walk<'b>(
        &'b self,
        ids: BTreeSet<RecordId>,
        kind: &'b str,
        query_field: Option<&'b str>,
        policy: Option<&'b TraversalPolicy>,
        outward_depth: u8,
        inward_depth: u8,
        bundle: &'b mut Bundle,
    ) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            let policy = policy.ok_or(GraftError::MissingPolicy)?;
            if outward_depth > MAX_OUTWARD_DEPTH || inward_depth > MAX_INWARD_DEPTH {
                debug!(kind, outward_depth, inward_depth, "depth cutoff");
                return Ok(());
            }
            if ids.is_empty() {
                return Ok(());
            }

            let descriptor = self.oracle.describe_type(kind).await?;
            let projection = projected_fields(&descriptor, policy);
            let records = self
                .store
                .query(
                    kind,
                    &projection,
                    query_field,
                    &ids,
                    Some(STABLE_ORDER_FIELD),
                )
                .await?;
            if records.is_empty() {
                trace!(kind, "no records matched, nothing to bundle");
                return Ok(());
            }

            // Referenced ancestors land in the bundle before this group.
            for field in descriptor.reference_fields() {
                if !policy.follows(kind, &field.name) {
                    continue;
                }
                let Some(target) = field.reference_target.as_deref() else {
                    continue;
                };
                let targets: BTreeSet<RecordId> = records
                    .iter()
                    .filter_map(|record| record.reference(&field.name))
                    .collect();
                if targets.is_empty() {
                    continue;
                }
                bundle.note_dependency(kind, target);
                self.walk(
                    targets,
                    target,
                    None,
                    Some(policy),
                    outward_depth + 1,
                    inward_depth,
                    bundle,
                )
                .await?;
            }

            let own_ids: BTreeSet<RecordId> =
                records.iter().filter_map(|record| record.id.clone()).collect();
            bundle.append(kind, records);

            // Descendants last, keyed off the records just captured.
            for child in &descriptor.children {
                if !policy.follows_child(&child.child_type, &child.foreign_key_field) {
                    continue;
                }
                // Children carry the parent's identity in their foreign key.
                bundle.note_dependency(&child.child_type, kind);
                self.walk(
                    own_ids.clone(),
                    &child.child_type,
                    Some(&child.foreign_key_field),
                    Some(policy),
                    outward_depth,
                    inward_depth + 1,
                    bundle,
                )
                .await?;
            }

            Ok(())
        })
    }
}

/// Field projection for one type: writable, non-omitted fields, with
/// reference fields kept only when followed in either direction. Sorted so
/// the export is reproducible.
fn projected_fields(descriptor: &TypeDescriptor, policy: &TraversalPolicy) -> Vec<String> {
    let mut fields: Vec<String> = descriptor
        .fields
        .iter()
        .filter(|f| !f.read_only)
        .filter(|f| !policy.omits(&descriptor.name, &f.name))
        .filter(|f| {
            !f.is_reference()
                || policy.follows(&descriptor.name, &f.name)
                || policy.follows_child(&descriptor.name, &f.name)
        })
        .map(|f| f.name.clone())
        .collect();
    fields.sort();
    fields
}
