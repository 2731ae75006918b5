//! Traversal policy: which relationships an export follows.
//!
//! A policy holds three disjoint sets of qualified field names: outward
//! reference fields to follow, child foreign-key fields to follow inward, and
//! fields omitted from the export entirely. It is built once per operation,
//! either by hand or via [`TraversalPolicy::auto_derive`], and is not mutated
//! during traversal.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use tracing::{debug, trace};

use crate::error::Result;
use crate::schema::SchemaOracle;

/// Reference fields never auto-followed: ownership and audit bookkeeping that
/// would drag in unrelated subgraphs.
pub const SKIPPED_REFERENCE_FIELDS: &[&str] = &[
    "owner_id",
    "created_by_id",
    "last_modified_by_id",
    "record_type_id",
];

/// Child relationship types never auto-followed: system audit/share/feed
/// trails that are not part of any business aggregate.
pub const SKIPPED_CHILD_TYPES: &[&str] = &["audit_entry", "history_entry", "share", "feed_item"];

/// Auto-derive stops following plain references past this many hops.
const MAX_DERIVE_OUTWARD_DEPTH: u8 = 2;
/// Auto-derive stops descending into child relationships past this many hops.
const MAX_DERIVE_INWARD_DEPTH: u8 = 3;

/// A field qualified by the type that declares it, e.g. `order.customer_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub kind: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            field: field.into(),
        }
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.field)
    }
}

/// Mutable export configuration. Omission overrides following: omitting a
/// field evicts it from both follow sets, and following an omitted field is
/// a no-op until it is un-omitted. The omit set stays disjoint from both
/// follow sets at all times.
#[derive(Debug, Clone, Default)]
pub struct TraversalPolicy {
    follow_refs: BTreeSet<FieldRef>,
    follow_children: BTreeSet<FieldRef>,
    omitted: BTreeSet<FieldRef>,
}

impl TraversalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow an outward reference field. No-op while the field is omitted.
    pub fn follow(&mut self, field: FieldRef) -> &mut Self {
        if !self.omitted.contains(&field) {
            self.follow_refs.insert(field);
        }
        self
    }

    pub fn unfollow(&mut self, field: &FieldRef) -> &mut Self {
        self.follow_refs.remove(field);
        self
    }

    /// Follow a child relationship through its owning foreign-key field.
    /// No-op while the field is omitted.
    pub fn follow_child(&mut self, field: FieldRef) -> &mut Self {
        if !self.omitted.contains(&field) {
            self.follow_children.insert(field);
        }
        self
    }

    pub fn unfollow_child(&mut self, field: &FieldRef) -> &mut Self {
        self.follow_children.remove(field);
        self
    }

    /// Drop a field from the export entirely, evicting it from both follow
    /// sets.
    pub fn omit(&mut self, field: FieldRef) -> &mut Self {
        self.follow_refs.remove(&field);
        self.follow_children.remove(&field);
        self.omitted.insert(field);
        self
    }

    pub fn unomit(&mut self, field: &FieldRef) -> &mut Self {
        self.omitted.remove(field);
        self
    }

    pub fn follows(&self, kind: &str, field: &str) -> bool {
        self.follow_refs
            .contains(&FieldRef::new(kind, field))
    }

    pub fn follows_child(&self, kind: &str, field: &str) -> bool {
        self.follow_children
            .contains(&FieldRef::new(kind, field))
    }

    pub fn omits(&self, kind: &str, field: &str) -> bool {
        self.omitted.contains(&FieldRef::new(kind, field))
    }

    /// Derive a default policy from the schema, rooted at `root_type`.
    ///
    /// Cascade-owned children travel with their parent aggregate; plain
    /// references are pulled in as context but do not recurse into children
    /// of their own. See the module constants for the skip lists and depth
    /// caps. Cycles terminate via a visited-type set.
    pub async fn auto_derive(oracle: &dyn SchemaOracle, root_type: &str) -> Result<Self> {
        let mut policy = Self::new();
        let mut visited = BTreeSet::new();
        derive_into(oracle, root_type, 0, 0, true, &mut visited, &mut policy).await?;
        debug!(
            root = root_type,
            refs = policy.follow_refs.len(),
            children = policy.follow_children.len(),
            "derived traversal policy"
        );
        Ok(policy)
    }

    /// Bulk operation: atomically replace all three sets with the derived
    /// defaults for `root_type`.
    pub async fn replace_with_derived(
        &mut self,
        oracle: &dyn SchemaOracle,
        root_type: &str,
    ) -> Result<()> {
        *self = Self::auto_derive(oracle, root_type).await?;
        Ok(())
    }
}

fn derive_into<'a>(
    oracle: &'a dyn SchemaOracle,
    kind: &'a str,
    outward_depth: u8,
    inward_depth: u8,
    search_children: bool,
    visited: &'a mut BTreeSet<String>,
    policy: &'a mut TraversalPolicy,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        // Silent cutoffs, not errors.
        if outward_depth > MAX_DERIVE_OUTWARD_DEPTH || inward_depth > MAX_DERIVE_INWARD_DEPTH {
            trace!(kind, outward_depth, inward_depth, "derive depth cutoff");
            return Ok(());
        }
        // A type already visited is never re-expanded, however it is reached.
        if !visited.insert(kind.to_string()) {
            return Ok(());
        }

        let descriptor = oracle.describe_type(kind).await?;

        let mut child_targets: BTreeSet<&str> = BTreeSet::new();
        if search_children {
            for child in &descriptor.children {
                if child.foreign_key_field.is_empty() {
                    continue;
                }
                if SKIPPED_CHILD_TYPES.contains(&child.child_type.as_str()) {
                    continue;
                }
                // Only cascade-owned children are part of the aggregate.
                if !child.cascade {
                    continue;
                }
                child_targets.insert(child.child_type.as_str());
                policy
                    .follow_children
                    .insert(FieldRef::new(&child.child_type, &child.foreign_key_field));
                derive_into(
                    oracle,
                    &child.child_type,
                    outward_depth,
                    inward_depth + 1,
                    true,
                    visited,
                    policy,
                )
                .await?;
            }
        }

        for field in descriptor.reference_fields() {
            let Some(target) = field.reference_target.as_deref() else {
                continue;
            };
            // Already reached as an owned child of this type.
            if child_targets.contains(target) {
                continue;
            }
            if SKIPPED_REFERENCE_FIELDS.contains(&field.name.as_str()) {
                continue;
            }
            policy
                .follow_refs
                .insert(FieldRef::new(kind, &field.name));
            // Referenced-but-not-owned types do not pull in children of
            // their own.
            derive_into(
                oracle,
                target,
                outward_depth + 1,
                inward_depth,
                false,
                visited,
                policy,
            )
            .await?;
        }

        Ok(())
    })
}
