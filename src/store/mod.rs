//! Durable document store boundary.
//!
//! The runtime talks to its storage backend through [`DocumentStore`], a
//! document-oriented contract with merge writes, atomic increments, and
//! atomic array-union appends. Real backends live outside this crate;
//! [`MemoryStore`] is provided for tests and embedders without one.

mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryStore;

/// A stored document: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Partial-update operation applied to a single document field.
///
/// Field paths use dotted notation (`"statistics.messages_sent"`) and create
/// intermediate objects as needed.
#[derive(Debug, Clone)]
pub enum FieldOp {
    /// Replace the field with the given value.
    Set(Value),
    /// Atomically add to a numeric field, treating a missing field as zero.
    Increment(i64),
    /// Atomically append values to an array field, skipping values already
    /// present (set-union semantics, so identical re-deliveries are no-ops).
    ArrayUnion(Vec<Value>),
}

/// Document-oriented durable storage collaborator.
///
/// Ids are `collection/doc` paths, e.g. `"guilds/123"` or
/// `"metrics/2026-08-28"`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id. `None` if it does not exist.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Write a document. With `merge` the document is deep-merged into any
    /// existing one; without it the existing document is replaced.
    async fn set(&self, id: &str, doc: Document, merge: bool) -> Result<()>;

    /// Apply partial field updates to a document, creating it if absent.
    async fn update(&self, id: &str, ops: Vec<(String, FieldOp)>) -> Result<()>;

    /// List documents in `collection` whose doc id is within `[from, to]`,
    /// ordered by id. Used for date-bucketed range reads.
    async fn list_range(&self, collection: &str, from: &str, to: &str)
    -> Result<Vec<(String, Document)>>;
}
