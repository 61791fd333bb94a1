// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applying change events to the search index.
//!
//! # Idempotency
//!
//! Both writes are keyed by `(namespace, doc_type, document id)`:
//!
//! - **Insert / Update**: the current document is fetched and PUT in full.
//! - **Delete**: a DELETE where "not found" counts as success.
//!
//! Replaying an event therefore leaves the index exactly as one application
//! did, which is what makes the at-least-once checkpoint safe.

mod http;

pub use http::HttpIndex;

use crate::error::SinkError;
use crate::event::{ChangeEvent, ChangeOp, Namespace};
use crate::metrics;
use crate::resolver::DocumentResolver;
use crate::BoxFuture;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

/// Internal identity field removed before indexing.
pub const ID_FIELD: &str = "_id";

/// Where a document lives in the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentAddress {
    pub namespace: String,
    pub doc_type: String,
    pub document_id: String,
}

impl DocumentAddress {
    pub fn new(namespace: &Namespace, doc_type: &str, document_id: &str) -> Self {
        Self {
            namespace: namespace.as_str().to_string(),
            doc_type: doc_type.to_string(),
            document_id: document_id.to_string(),
        }
    }

    /// Path segments in URL order. The document ID is a single segment even
    /// if it contains `/`.
    pub fn segments(&self) -> [&str; 3] {
        [&self.namespace, &self.doc_type, &self.document_id]
    }

    /// Whether every segment survives URL path normalization unchanged.
    pub fn is_addressable(&self) -> bool {
        self.segments().iter().all(|segment| is_path_segment(segment))
    }
}

/// Empty, `.` and `..` segments are dropped or resolved away by URL parsers
/// (including their `%2e` spellings), so they cannot name a document.
pub fn is_path_segment(segment: &str) -> bool {
    !matches!(segment, "" | "." | "..")
}

impl fmt::Display for DocumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.doc_type, self.document_id)
    }
}

/// Write side of the search index.
pub trait SearchIndex: Send + Sync {
    /// Store `body` at `address`, replacing whatever is there.
    fn replace<'a>(
        &'a self,
        address: &'a DocumentAddress,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Remove the document at `address`.
    ///
    /// Returns whether it existed. A missing document is not an error.
    fn delete<'a>(&'a self, address: &'a DocumentAddress) -> BoxFuture<'a, Result<bool, SinkError>>;
}

/// What applying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The document was written in full.
    Replaced,
    Deleted { existed: bool },
    /// Nothing was written: the document is gone from the source of truth,
    /// or its ID cannot be expressed as an index path.
    Skipped,
}

impl Applied {
    pub fn label(&self) -> &'static str {
        match self {
            Applied::Replaced => "replaced",
            Applied::Deleted { .. } => "deleted",
            Applied::Skipped => "skipped",
        }
    }
}

/// Turns change events into index writes.
pub struct IndexSink<I> {
    index: I,
    doc_type: String,
}

impl<I: SearchIndex> IndexSink<I> {
    pub fn new(index: I, doc_type: impl Into<String>) -> Self {
        Self {
            index,
            doc_type: doc_type.into(),
        }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Apply one event.
    pub async fn apply<R>(&self, event: &ChangeEvent, resolver: &R) -> Result<Applied, SinkError>
    where
        R: DocumentResolver + ?Sized,
    {
        let address = DocumentAddress::new(&event.namespace, &self.doc_type, event.document_id());
        if !address.is_addressable() {
            warn!(
                namespace = %event.namespace,
                document_id = %event.document_id(),
                position = %event.position,
                "Document ID cannot be used as an index path, skipping"
            );
            metrics::record_event_skipped(event.namespace.as_str(), "unaddressable");
            return Ok(Applied::Skipped);
        }

        match &event.op {
            ChangeOp::Delete { .. } => {
                let existed = self.index.delete(&address).await?;
                if !existed {
                    debug!(address = %address, "Delete of absent document");
                }
                info!(
                    namespace = %event.namespace,
                    op = "delete",
                    document_id = %event.document_id(),
                    position = %event.position,
                    "Removed from index"
                );
                Ok(Applied::Deleted { existed })
            }
            ChangeOp::Insert { document_id } | ChangeOp::Update { document_id } => {
                let Some(document) = resolver.fetch(&event.namespace, document_id).await? else {
                    debug!(
                        namespace = %event.namespace,
                        document_id = %document_id,
                        position = %event.position,
                        "Document no longer exists, skipping"
                    );
                    metrics::record_event_skipped(event.namespace.as_str(), "document_missing");
                    return Ok(Applied::Skipped);
                };

                let body = strip_identity(document, document_id)?;
                self.index.replace(&address, &body).await?;
                info!(
                    namespace = %event.namespace,
                    op = %event.kind(),
                    document_id = %document_id,
                    position = %event.position,
                    "Indexed document"
                );
                Ok(Applied::Replaced)
            }
        }
    }
}

/// Remove the identity field. The document must be a JSON object.
fn strip_identity(document: Value, document_id: &str) -> Result<Value, SinkError> {
    match document {
        Value::Object(mut fields) => {
            fields.remove(ID_FIELD);
            Ok(Value::Object(fields))
        }
        other => Err(SinkError::InvalidDocument(format!(
            "document {document_id} is a JSON {}, expected an object",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::position::LogPosition;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingIndex {
        docs: Mutex<HashMap<String, Value>>,
    }

    impl SearchIndex for RecordingIndex {
        fn replace<'a>(
            &'a self,
            address: &'a DocumentAddress,
            body: &'a Value,
        ) -> BoxFuture<'a, Result<(), SinkError>> {
            Box::pin(async move {
                self.docs.lock().unwrap().insert(address.to_string(), body.clone());
                Ok(())
            })
        }

        fn delete<'a>(
            &'a self,
            address: &'a DocumentAddress,
        ) -> BoxFuture<'a, Result<bool, SinkError>> {
            Box::pin(async move { Ok(self.docs.lock().unwrap().remove(&address.to_string()).is_some()) })
        }
    }

    struct FixedResolver(Option<Value>);

    impl DocumentResolver for FixedResolver {
        fn fetch<'a>(
            &'a self,
            _namespace: &'a Namespace,
            _id: &'a str,
        ) -> BoxFuture<'a, Result<Option<Value>, ResolveError>> {
            let doc = self.0.clone();
            Box::pin(async move { Ok(doc) })
        }
    }

    fn event(op: ChangeOp) -> ChangeEvent {
        ChangeEvent::new(Namespace::parse("db.users").unwrap(), op, LogPosition::new(10, 0))
    }

    #[test]
    fn test_address_display() {
        let ns = Namespace::parse("db.users").unwrap();
        let address = DocumentAddress::new(&ns, "default", "a/b");
        assert_eq!(address.to_string(), "db.users/default/a/b");
        assert_eq!(address.segments(), ["db.users", "default", "a/b"]);
    }

    #[tokio::test]
    async fn test_upsert_strips_identity_field() {
        let sink = IndexSink::new(RecordingIndex::default(), "default");
        let resolver = FixedResolver(Some(json!({"_id": "1", "name": "ada"})));

        let applied = sink
            .apply(&event(ChangeOp::Insert { document_id: "1".to_string() }), &resolver)
            .await
            .unwrap();

        assert_eq!(applied, Applied::Replaced);
        let docs = sink.index().docs.lock().unwrap();
        assert_eq!(docs.get("db.users/default/1"), Some(&json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_upsert_of_missing_document_is_skipped() {
        let sink = IndexSink::new(RecordingIndex::default(), "default");
        let applied = sink
            .apply(&event(ChangeOp::Update { document_id: "1".to_string() }), &FixedResolver(None))
            .await
            .unwrap();

        assert_eq!(applied, Applied::Skipped);
        assert!(sink.index().docs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_document_fails() {
        let sink = IndexSink::new(RecordingIndex::default(), "default");
        let err = sink
            .apply(
                &event(ChangeOp::Insert { document_id: "1".to_string() }),
                &FixedResolver(Some(json!([1, 2]))),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::InvalidDocument(_)));
        assert!(err.to_string().contains("array"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let sink = IndexSink::new(RecordingIndex::default(), "default");
        let resolver = FixedResolver(Some(json!({"name": "ada"})));
        sink.apply(&event(ChangeOp::Insert { document_id: "1".to_string() }), &resolver)
            .await
            .unwrap();

        let delete = event(ChangeOp::Delete { document_id: "1".to_string() });
        assert_eq!(
            sink.apply(&delete, &resolver).await.unwrap(),
            Applied::Deleted { existed: true }
        );
        assert_eq!(
            sink.apply(&delete, &resolver).await.unwrap(),
            Applied::Deleted { existed: false }
        );
    }

    #[test]
    fn test_applied_labels() {
        assert_eq!(Applied::Replaced.label(), "replaced");
        assert_eq!(Applied::Deleted { existed: false }.label(), "deleted");
        assert_eq!(Applied::Skipped.label(), "skipped");
    }
}
