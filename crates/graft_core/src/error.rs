use miette::Diagnostic;
use thiserror::Error;

/// Everything that can halt an export or import.
///
/// Note what is *not* here: unresolved references and depth cutoffs. Both are
/// documented traversal behavior, surfaced through the resolution callback and
/// trace logs rather than as failures.
#[derive(Error, Diagnostic, Debug)]
pub enum GraftError {
    #[error("Anchor set is empty")]
    #[diagnostic(
        code(graft_core::empty_anchor_set),
        help("serialize requires at least one anchor identity to seed the traversal")
    )]
    EmptyAnchorSet,

    #[error("Anchor set mixes record kinds")]
    #[diagnostic(
        code(graft_core::mixed_anchor_kinds),
        help("All anchor identities must share one record kind; got '{found}' alongside '{expected}'")
    )]
    MixedAnchorKinds { expected: String, found: String },

    #[error("Traversal policy missing")]
    #[diagnostic(
        code(graft_core::missing_policy),
        help("The internal walk requires a policy; pass one or let serialize auto-derive it")
    )]
    MissingPolicy,

    #[error("Unknown record type '{name}'")]
    #[diagnostic(
        code(graft_core::unknown_type),
        help("Register the type with the schema catalog before exporting or importing it")
    )]
    UnknownType { name: String },

    #[error("Store query failed")]
    #[diagnostic(
        code(graft_core::store_query_failed),
        help("Query against '{kind}' was rejected by the record store")
    )]
    StoreQueryFailed {
        kind: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Store insert failed")]
    #[diagnostic(
        code(graft_core::store_insert_failed),
        help(
            "Batch insert into '{kind}' was rejected; the import aborts here and earlier groups stay committed unless the caller wrapped the operation in a transaction"
        )
    )]
    StoreInsertFailed {
        kind: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unsupported document version {found}")]
    #[diagnostic(
        code(graft_core::document_version_mismatch),
        help("This build reads bundle documents up to version {supported}")
    )]
    DocumentVersionMismatch { found: u32, supported: u32 },

    #[error("Serialization error")]
    #[diagnostic(
        code(graft_core::serialization_error),
        help("Failed to encode or decode the bundle document")
    )]
    SerializationError {
        #[source]
        cause: serde_json::Error,
    },

    #[error("Invalid record identity '{input}'")]
    #[diagnostic(
        code(graft_core::invalid_record_id),
        help("Identities must be in the form 'kind:key'")
    )]
    InvalidRecordId { input: String },
}

pub type Result<T> = std::result::Result<T, GraftError>;

// Helper constructors for errors that wrap external causes
impl GraftError {
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    pub fn store_query_failed(
        kind: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreQueryFailed {
            kind: kind.into(),
            cause: Box::new(cause),
        }
    }

    pub fn store_insert_failed(
        kind: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreInsertFailed {
            kind: kind.into(),
            cause: Box::new(cause),
        }
    }
}

impl From<serde_json::Error> for GraftError {
    fn from(cause: serde_json::Error) -> Self {
        Self::SerializationError { cause }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Report;

    #[test]
    fn test_unknown_type_report() {
        let error = GraftError::unknown_type("invoice");
        let report = Report::new(error);
        let output = format!("{:?}", report);
        assert!(output.contains("unknown_type"));
        assert!(output.contains("invoice"));
    }

    #[test]
    fn test_version_mismatch_report() {
        let error = GraftError::DocumentVersionMismatch {
            found: 9,
            supported: 1,
        };
        let report = Report::new(error);
        let output = format!("{:?}", report);
        assert!(output.contains("version 9"));
        assert!(output.contains("up to version 1"));
    }
}
