//! Bundle data model and the portable-document codec.
//!
//! A bundle is an ordered sequence of per-type record groups. Order is
//! load-bearing: the rehydrator commits groups in stored order, relying on
//! it as a dependency order. The walker appends referenced ancestors before
//! the records that point at them and notes each reference edge; freezing the
//! bundle into a document settles any group a re-visit pulled in late with a
//! stable topological pass over those edges. The codec itself is a pure
//! structural transform with no traversal logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::trace;

use crate::error::{GraftError, Result};
use crate::id::RecordId;

/// Current bundle document format version.
pub const DOCUMENT_VERSION: u32 = 1;

/// A single typed record: a flat field map, tagged with an identity once
/// fetched. Records not yet persisted carry no identity.
///
/// Serializes as one flat JSON object; the identity lives under the reserved
/// `_id` key. `null` field values and absent fields are distinct and both
/// survive the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<RecordId>,

    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(id: Option<RecordId>) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Builder: set a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Read `field` as a record identity, if it holds one.
    pub fn reference(&self, field: &str) -> Option<RecordId> {
        match self.fields.get(field) {
            Some(Value::String(s)) => RecordId::parse(s).ok(),
            _ => None,
        }
    }

    /// Point `field` at `target`.
    pub fn set_reference(&mut self, field: impl Into<String>, target: &RecordId) {
        self.fields
            .insert(field.into(), Value::String(target.to_string()));
    }
}

/// An ordered run of records sharing one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordGroup {
    pub kind: String,
    pub records: Vec<Record>,
}

impl RecordGroup {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Cheap counters over a bundle or document, surfaced for callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStats {
    pub group_count: usize,
    pub record_count: usize,
}

/// Ordered record groups plus a traversal-time index from kind to group
/// position and the reference edges noted between kinds. The index and edges
/// never leave the process; only the groups are serialized.
#[derive(Debug, Default)]
pub struct Bundle {
    groups: Vec<RecordGroup>,
    index: HashMap<String, usize>,
    seen: HashSet<RecordId>,
    /// (target kind, dependent kind) pairs.
    edges: BTreeSet<(String, String)>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records to the group for `kind`. First touch creates the group
    /// and fixes its position in bundle order; later touches merge into it.
    /// Records whose identity is already captured are not appended twice.
    pub fn append(&mut self, kind: &str, records: Vec<Record>) {
        let position = match self.index.get(kind) {
            Some(&position) => position,
            None => {
                let position = self.groups.len();
                trace!(kind, position, "new bundle group");
                self.groups.push(RecordGroup {
                    kind: kind.to_string(),
                    records: Vec::new(),
                });
                self.index.insert(kind.to_string(), position);
                position
            }
        };
        for record in records {
            if let Some(id) = &record.id {
                if !self.seen.insert(id.clone()) {
                    continue;
                }
            }
            self.groups[position].records.push(record);
        }
    }

    pub fn groups(&self) -> &[RecordGroup] {
        &self.groups
    }

    pub fn group(&self, kind: &str) -> Option<&RecordGroup> {
        self.index.get(kind).map(|&i| &self.groups[i])
    }

    /// Whether a record with this identity is already captured.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.seen.contains(id)
    }

    /// Note that records of `dependent` hold references into `target`, so
    /// `target`'s group must precede `dependent`'s in document order.
    /// Self-references carry no ordering constraint.
    pub fn note_dependency(&mut self, dependent: &str, target: &str) {
        if dependent != target {
            self.edges
                .insert((target.to_string(), dependent.to_string()));
        }
    }

    pub fn stats(&self) -> ExportStats {
        ExportStats {
            group_count: self.groups.len(),
            record_count: self.groups.iter().map(RecordGroup::len).sum(),
        }
    }

    /// Freeze the bundle into its portable document, tagging the root group
    /// explicitly so the importer never has to guess it from position.
    ///
    /// Groups come out with every noted reference target positioned before
    /// its dependents, first-touch order breaking ties. First-touch order
    /// alone is not enough: a type re-visited through a second traversal path
    /// can pick up targets whose own first touch came later.
    pub fn into_document(self, root_type: impl Into<String>) -> BundleDocument {
        let order = self.dependency_order();
        let mut slots: Vec<Option<RecordGroup>> = self.groups.into_iter().map(Some).collect();
        let groups = order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();
        BundleDocument {
            version: DOCUMENT_VERSION,
            exported_at: Utc::now(),
            root_type: root_type.into(),
            groups,
        }
    }

    /// Stable topological order over the noted edges: always emit the
    /// earliest first-touch group with no unplaced targets. If the remaining
    /// edges form a cycle, fall back to first-touch order for it.
    fn dependency_order(&self) -> Vec<usize> {
        let n = self.groups.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (target, dependent) in &self.edges {
            // Edges naming a kind that never produced a group are inert.
            let (Some(&t), Some(&d)) = (self.index.get(target), self.index.get(dependent))
            else {
                continue;
            };
            dependents[t].push(d);
            indegree[d] += 1;
        }

        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let ready = (0..n).find(|&i| !placed[i] && indegree[i] == 0);
            let Some(next) = ready.or_else(|| (0..n).find(|&i| !placed[i])) else {
                break;
            };
            placed[next] = true;
            for &d in &dependents[next] {
                indegree[d] = indegree[d].saturating_sub(1);
            }
            order.push(next);
        }
        order
    }

    /// Rebuild a bundle (with its transient index) from a document.
    pub fn from_document(document: BundleDocument) -> Self {
        let mut bundle = Self::new();
        for group in document.groups {
            bundle.append(&group.kind, group.records);
        }
        bundle
    }
}

/// The portable export document: one JSON object holding the ordered groups.
///
/// All relationships are flattened to identity strings inside the document;
/// nothing nests. They are resolved only at import time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,

    /// Kind of the group built from the original anchor set.
    pub root_type: String,

    pub groups: Vec<RecordGroup>,
}

impl BundleDocument {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(input: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(input)?;
        if document.version > DOCUMENT_VERSION {
            return Err(GraftError::DocumentVersionMismatch {
                found: document.version,
                supported: DOCUMENT_VERSION,
            });
        }
        Ok(document)
    }

    pub fn stats(&self) -> ExportStats {
        ExportStats {
            group_count: self.groups.len(),
            record_count: self.groups.iter().map(RecordGroup::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str) -> Record {
        Record::new(Some(RecordId::parse(id).unwrap()))
    }

    #[test]
    fn test_first_touch_fixes_group_position() {
        let mut bundle = Bundle::new();
        bundle.append("customer", vec![record("customer:a")]);
        bundle.append("order", vec![record("order:1")]);
        bundle.append("customer", vec![record("customer:b")]);

        let kinds: Vec<&str> = bundle.groups().iter().map(|g| g.kind.as_str()).collect();
        assert_eq!(kinds, vec!["customer", "order"]);
        assert_eq!(bundle.group("customer").unwrap().len(), 2);
    }

    #[test]
    fn test_append_deduplicates_by_identity() {
        let mut bundle = Bundle::new();
        bundle.append("order", vec![record("order:1"), record("order:1")]);
        bundle.append("order", vec![record("order:1"), record("order:2")]);

        assert_eq!(bundle.group("order").unwrap().len(), 2);
        assert!(bundle.contains(&RecordId::parse("order:1").unwrap()));
    }

    #[test]
    fn test_json_round_trip_preserves_order_and_nulls() {
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
                    .with_field("notes", Value::Null),
            ],
        );

        let document = bundle.into_document("order");
        let json = document.to_json().unwrap();
        let back = BundleDocument::from_json(&json).unwrap();

        assert_eq!(back, document);
        let order = &back.groups[1].records[0];
        // null survives; absent stays absent
        assert_eq!(order.get("notes"), Some(&Value::Null));
        assert_eq!(order.get("status"), None);
        assert_eq!(back.root_type, "order");
    }

    #[test]
    fn test_into_document_orders_targets_before_dependents() {
        // First touch put x ahead of y, but x's records reference y.
        let mut bundle = Bundle::new();
        bundle.append("x", vec![record("x:1")]);
        bundle.append("y", vec![record("y:1")]);
        bundle.append("a", vec![record("a:1")]);
        bundle.note_dependency("x", "y");
        bundle.note_dependency("a", "x");

        let document = bundle.into_document("a");
        let kinds: Vec<&str> = document.groups.iter().map(|g| g.kind.as_str()).collect();
        assert_eq!(kinds, vec!["y", "x", "a"]);
    }

    #[test]
    fn test_cyclic_dependencies_fall_back_to_first_touch_order() {
        let mut bundle = Bundle::new();
        bundle.append("a", vec![record("a:1")]);
        bundle.append("b", vec![record("b:1")]);
        bundle.note_dependency("a", "b");
        bundle.note_dependency("b", "a");
        // Self-references are inert as well.
        bundle.note_dependency("a", "a");

        let document = bundle.into_document("a");
        let kinds: Vec<&str> = document.groups.iter().map(|g| g.kind.as_str()).collect();
        assert_eq!(kinds, vec!["a", "b"]);
    }

    #[test]
    fn test_record_serializes_flat() {
        let r = record("order:1").with_field("name", Value::String("first".into()));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["_id"], "order:1");
        assert_eq!(json["name"], "first");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bundle = Bundle::new();
        bundle.append("order", vec![record("order:1")]);
        let mut document = bundle.into_document("order");
        document.version = DOCUMENT_VERSION + 1;

        let err = BundleDocument::from_json(&document.to_json().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            GraftError::DocumentVersionMismatch { found, .. } if found == DOCUMENT_VERSION + 1
        ));
    }
}
