//! Embedded in-memory record store.
//!
//! The shippable [`RecordStore`] backend: one table per kind, rows held in
//! insertion order behind a lock. Tests and demos seed it directly; imports
//! write into it like any other store.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::trace;

use super::RecordStore;
use crate::bundle::Record;
use crate::error::Result;
use crate::id::RecordId;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record under a caller-chosen identity.
    pub fn seed(&self, id: RecordId, fields: BTreeMap<String, Value>) {
        let kind = id.kind().to_string();
        self.tables
            .write()
            .entry(kind)
            .or_default()
            .push(Record {
                id: Some(id),
                fields,
            });
    }

    /// Number of rows stored under `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.tables.read().get(kind).map_or(0, Vec::len)
    }

    /// Fetch one row by identity.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.tables
            .read()
            .get(id.kind())?
            .iter()
            .find(|r| r.id.as_ref() == Some(id))
            .cloned()
    }
}

/// Sort key for deterministic ordering: string values compare as themselves,
/// everything else by its JSON rendering.
fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sort_key(record: &Record, order_by: Option<&str>) -> (String, String) {
    let primary = order_by
        .and_then(|field| record.fields.get(field))
        .map(value_key)
        .unwrap_or_default();
    let tiebreak = record
        .id
        .as_ref()
        .map(RecordId::to_string)
        .unwrap_or_default();
    (primary, tiebreak)
}

fn project(record: &Record, fields: &[String]) -> Record {
    Record {
        id: record.id.clone(),
        fields: record
            .fields
            .iter()
            .filter(|(name, _)| fields.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query(
        &self,
        kind: &str,
        fields: &[String],
        filter_field: Option<&str>,
        ids: &BTreeSet<RecordId>,
        order_by: Option<&str>,
    ) -> Result<Vec<Record>> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(kind) else {
            return Ok(Vec::new());
        };
        let wanted: BTreeSet<String> = ids.iter().map(RecordId::to_string).collect();

        let mut matched: Vec<&Record> = rows
            .iter()
            .filter(|record| match filter_field {
                None => record
                    .id
                    .as_ref()
                    .is_some_and(|id| wanted.contains(&id.to_string())),
                Some(field) => matches!(
                    record.fields.get(field),
                    Some(Value::String(s)) if wanted.contains(s)
                ),
            })
            .collect();
        // Order before projecting so the order_by field need not survive the
        // projection.
        matched.sort_by_key(|record| sort_key(record, order_by));

        trace!(kind, matched = matched.len(), "memory store query");
        Ok(matched
            .into_iter()
            .map(|record| project(record, fields))
            .collect())
    }

    async fn insert_batch(&self, kind: &str, records: Vec<Record>) -> Result<Vec<RecordId>> {
        let mut tables = self.tables.write();
        let rows = tables.entry(kind.to_string()).or_default();
        let mut assigned = Vec::with_capacity(records.len());
        for mut record in records {
            let id = RecordId::generate(kind);
            record.id = Some(id.clone());
            rows.push(record);
            assigned.push(id);
        }
        trace!(kind, inserted = assigned.len(), "memory store insert");
        Ok(assigned)
    }
}
