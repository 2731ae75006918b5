//! Import: identity regeneration and reference repair.
//!
//! The rehydrator consumes a bundle document group by group, in stored order.
//! Each record is committed as a working copy with its original identity
//! stripped; one remap table, scoped to the single import call, translates
//! old identities to store-assigned ones. Reference fields whose target has
//! no remap entry yet are surfaced to an optional per-group callback, and
//! whatever the callback leaves unfixed commits as null rather than failing
//! the import.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::bundle::{BundleDocument, Record};
use crate::error::Result;
use crate::id::RecordId;
use crate::schema::SchemaOracle;
use crate::store::RecordStore;

/// Reference fields of one working copy that had no remap entry when the
/// group was rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// Index into the group's working copies.
    pub record_index: usize,
    /// The reference fields still pointing at unmapped identities.
    pub fields: BTreeSet<String>,
}

/// Per-group hook invoked before commit when a group has unresolved
/// references. Receives the group's kind, mutable access to all working
/// copies, and the unresolved field sets; the callback may patch the
/// affected fields in place (e.g. substitute a default).
pub type ResolutionCallback<'a> = dyn FnMut(&str, &mut [Record], &[UnresolvedReference]) + Send + 'a;

pub struct Rehydrator<'a> {
    store: &'a dyn RecordStore,
    oracle: &'a dyn SchemaOracle,
}

impl<'a> Rehydrator<'a> {
    pub fn new(store: &'a dyn RecordStore, oracle: &'a dyn SchemaOracle) -> Self {
        Self { store, oracle }
    }

    /// Import entry point: commit every group in stored order and return the
    /// newly assigned identities of the document's root group.
    ///
    /// Any store failure aborts the whole import; groups already committed
    /// stay committed unless the caller wrapped the operation in a
    /// transactional scope.
    pub async fn deserialize(
        &self,
        document: &BundleDocument,
        mut callback: Option<&mut ResolutionCallback<'_>>,
    ) -> Result<Vec<RecordId>> {
        let mut remap: HashMap<RecordId, RecordId> = HashMap::new();
        let mut root_ids: Vec<RecordId> = Vec::new();

        for group in &document.groups {
            let descriptor = self.oracle.describe_type(&group.kind).await?;
            let reference_fields: Vec<&str> = descriptor
                .reference_fields()
                .map(|f| f.name.as_str())
                .collect();

            let mut working: Vec<Record> = Vec::with_capacity(group.records.len());
            let mut originals: Vec<Option<RecordId>> = Vec::with_capacity(group.records.len());
            let mut unresolved: Vec<UnresolvedReference> = Vec::new();

            for (index, record) in group.records.iter().enumerate() {
                let mut copy = record.clone();
                originals.push(copy.id.take());

                let mut missing = BTreeSet::new();
                for field in &reference_fields {
                    let Some(old) = copy.reference(field) else {
                        continue;
                    };
                    match remap.get(&old) {
                        Some(new_id) => copy.set_reference(*field, new_id),
                        // Target not committed yet, or never bundled.
                        None => {
                            missing.insert((*field).to_string());
                        }
                    }
                }
                if !missing.is_empty() {
                    unresolved.push(UnresolvedReference {
                        record_index: index,
                        fields: missing,
                    });
                }
                working.push(copy);
            }

            if !unresolved.is_empty() {
                debug!(
                    kind = %group.kind,
                    records = unresolved.len(),
                    "group has unresolved references"
                );
                // Snapshot the stale values so we can tell whether the
                // callback repaired them.
                let stale: Vec<(usize, String, Option<Value>)> = unresolved
                    .iter()
                    .flat_map(|u| {
                        u.fields.iter().map(|field| {
                            (
                                u.record_index,
                                field.clone(),
                                working[u.record_index].get(field).cloned(),
                            )
                        })
                    })
                    .collect();

                if let Some(hook) = callback.as_deref_mut() {
                    hook(&group.kind, &mut working, &unresolved);
                }

                for (index, field, before) in stale {
                    if working[index].get(&field).cloned() == before {
                        warn!(
                            kind = %group.kind,
                            field = %field,
                            "unresolved reference committed as null"
                        );
                        working[index].fields.insert(field, Value::Null);
                    }
                }
            }

            let assigned = self.store.insert_batch(&group.kind, working).await?;
            for (original, new_id) in originals.into_iter().zip(&assigned) {
                if let Some(original) = original {
                    remap.insert(original, new_id.clone());
                }
            }
            if group.kind == document.root_type {
                root_ids.extend(assigned);
            }
        }

        debug!(
            root = %document.root_type,
            created = root_ids.len(),
            "import complete"
        );
        Ok(root_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Bundle, RecordGroup, DOCUMENT_VERSION};
    use crate::error::GraftError;
    use crate::schema::{FieldDescriptor, FieldKind, StaticCatalog, TypeDescriptor};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .define_type(
                TypeDescriptor::new("customer")
                    .with_field(FieldDescriptor::scalar("name", FieldKind::Text)),
            )
            .define_type(
                TypeDescriptor::new("order")
                    .with_field(FieldDescriptor::scalar("name", FieldKind::Text))
                    .with_field(FieldDescriptor::reference("customer_id", "customer")),
            )
    }

    fn record(id: &str) -> Record {
        Record::new(Some(RecordId::parse(id).unwrap()))
    }

    fn two_group_document() -> BundleDocument {
        let mut bundle = Bundle::new();
        bundle.append(
            "customer",
            vec![record("customer:a").with_field("name", Value::String("Acme".into()))],
        );
        bundle.append(
            "order",
            vec![
                record("order:1")
                    .with_field("name", Value::String("first".into()))
                    .with_field("customer_id", Value::String("customer:a".into())),
            ],
        );
        bundle.into_document("order")
    }

    #[tokio::test]
    async fn test_references_rewritten_through_remap_table() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let rehydrator = Rehydrator::new(&store, &catalog);

        let roots = rehydrator
            .deserialize(&two_group_document(), None)
            .await
            .unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].kind(), "order");

        let order = store.get(&roots[0]).unwrap();
        let rewritten = order.reference("customer_id").unwrap();
        // Fresh identity, not the exported one, and it exists in the store.
        assert_eq!(rewritten.kind(), "customer");
        assert_ne!(rewritten.to_string(), "customer:a");
        assert!(store.get(&rewritten).is_some());
    }

    #[tokio::test]
    async fn test_missing_target_group_degrades_to_null() {
        // Group B references group A's identities but A is absent.
        let document = BundleDocument {
            version: DOCUMENT_VERSION,
            exported_at: Utc::now(),
            root_type: "order".to_string(),
            groups: vec![RecordGroup {
                kind: "order".to_string(),
                records: vec![
                    record("order:1")
                        .with_field("name", Value::String("first".into()))
                        .with_field("customer_id", Value::String("customer:a".into())),
                ],
            }],
        };

        let store = MemoryStore::new();
        let catalog = catalog();
        let rehydrator = Rehydrator::new(&store, &catalog);

        let mut invocations: Vec<(String, Vec<UnresolvedReference>)> = Vec::new();
        let mut hook = |kind: &str, _records: &mut [Record], unresolved: &[UnresolvedReference]| {
            invocations.push((kind.to_string(), unresolved.to_vec()));
        };

        let roots = rehydrator
            .deserialize(&document, Some(&mut hook))
            .await
            .unwrap();

        // Callback fired exactly once, for the right group and field.
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, "order");
        assert_eq!(invocations[0].1.len(), 1);
        assert_eq!(invocations[0].1[0].record_index, 0);
        assert!(invocations[0].1[0].fields.contains("customer_id"));

        // The unfixed reference committed as null, not as the stale identity.
        let order = store.get(&roots[0]).unwrap();
        assert_eq!(order.get("customer_id"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_callback_substitution_is_committed() {
        let document = BundleDocument {
            version: DOCUMENT_VERSION,
            exported_at: Utc::now(),
            root_type: "order".to_string(),
            groups: vec![RecordGroup {
                kind: "order".to_string(),
                records: vec![
                    record("order:1")
                        .with_field("name", Value::String("first".into()))
                        .with_field("customer_id", Value::String("customer:gone".into())),
                ],
            }],
        };

        let store = MemoryStore::new();
        let catalog = catalog();
        let fallback = RecordId::parse("customer:house-account").unwrap();
        store.seed(fallback.clone(), Default::default());
        let rehydrator = Rehydrator::new(&store, &catalog);

        let mut hook = |_kind: &str, records: &mut [Record], unresolved: &[UnresolvedReference]| {
            for u in unresolved {
                for field in &u.fields {
                    records[u.record_index].set_reference(field.clone(), &fallback);
                }
            }
        };

        let roots = rehydrator
            .deserialize(&document, Some(&mut hook))
            .await
            .unwrap();

        let order = store.get(&roots[0]).unwrap();
        assert_eq!(order.reference("customer_id").unwrap(), fallback);
    }

    #[tokio::test]
    async fn test_root_ids_follow_the_root_type_tag() {
        // customer occupies position 0; the root group is order.
        let store = MemoryStore::new();
        let catalog = catalog();
        let rehydrator = Rehydrator::new(&store, &catalog);

        let roots = rehydrator
            .deserialize(&two_group_document(), None)
            .await
            .unwrap();
        assert!(roots.iter().all(|id| id.kind() == "order"));
        assert_eq!(store.count("customer"), 1);
        assert_eq!(store.count("order"), 1);
    }

    /// Delegates to an inner store but rejects inserts for one kind.
    struct FailingStore {
        inner: MemoryStore,
        fail_kind: &'static str,
    }

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn query(
            &self,
            kind: &str,
            fields: &[String],
            filter_field: Option<&str>,
            ids: &BTreeSet<RecordId>,
            order_by: Option<&str>,
        ) -> Result<Vec<Record>> {
            self.inner.query(kind, fields, filter_field, ids, order_by).await
        }

        async fn insert_batch(&self, kind: &str, records: Vec<Record>) -> Result<Vec<RecordId>> {
            if kind == self.fail_kind {
                return Err(GraftError::store_insert_failed(
                    kind,
                    std::io::Error::other("disk full"),
                ));
            }
            self.inner.insert_batch(kind, records).await
        }
    }

    #[tokio::test]
    async fn test_insert_failure_aborts_with_earlier_groups_committed() {
        let store = FailingStore {
            inner: MemoryStore::new(),
            fail_kind: "order",
        };
        let catalog = catalog();
        let rehydrator = Rehydrator::new(&store, &catalog);

        let err = rehydrator
            .deserialize(&two_group_document(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GraftError::StoreInsertFailed { kind, .. } if kind == "order"));

        // The customer group committed before the failure and stays; the
        // failed group wrote nothing. No rollback happens at this layer.
        assert_eq!(store.inner.count("customer"), 1);
        assert_eq!(store.inner.count("order"), 0);
    }

    #[tokio::test]
    async fn test_no_callback_still_imports() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let rehydrator = Rehydrator::new(&store, &catalog);

        let document = BundleDocument {
            version: DOCUMENT_VERSION,
            exported_at: Utc::now(),
            root_type: "customer".to_string(),
            groups: vec![RecordGroup {
                kind: "customer".to_string(),
                records: vec![record("customer:a")],
            }],
        };
        let roots = rehydrator.deserialize(&document, None).await.unwrap();
        assert_eq!(roots.len(), 1);
    }
}
