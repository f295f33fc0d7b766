//! In-memory document store.
//!
//! Honors the same merge, increment, and array-union semantics expected of a
//! real backend, so tests exercise the runtime against faithful behavior.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;

use super::{Document, DocumentStore, FieldOp};

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn set(&self, id: &str, doc: Document, merge: bool) -> Result<()> {
        let mut docs = self.docs.write();
        match docs.get_mut(id) {
            Some(existing) if merge => deep_merge(existing, doc),
            _ => {
                docs.insert(id.to_string(), doc);
            }
        }
        Ok(())
    }

    async fn update(&self, id: &str, ops: Vec<(String, FieldOp)>) -> Result<()> {
        let mut docs = self.docs.write();
        let doc = docs.entry(id.to_string()).or_default();

        for (path, op) in ops {
            apply_op(doc, &path, op);
        }

        Ok(())
    }

    async fn list_range(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<(String, Document)>> {
        let prefix = format!("{collection}/");
        let start = format!("{prefix}{from}");
        let end = format!("{prefix}{to}");

        let docs = self.docs.read();
        Ok(docs
            .range(start..=end)
            .filter(|(id, _)| id.starts_with(&prefix))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }
}

/// Deep-merge `incoming` into `target`: nested objects merge recursively,
/// everything else is replaced.
fn deep_merge(target: &mut Document, incoming: Document) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(new)) => {
                deep_merge(existing, new);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply a single field op at a dotted path, creating intermediate objects.
fn apply_op(doc: &mut Document, path: &str, op: FieldOp) {
    let mut current = doc;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            apply_leaf(current, segment, op);
            return;
        }

        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));

        // A non-object in the middle of the path is overwritten.
        if !next.is_object() {
            *next = Value::Object(Document::new());
        }

        match next.as_object_mut() {
            Some(obj) => current = obj,
            None => return,
        }
    }
}

fn apply_leaf(doc: &mut Document, field: &str, op: FieldOp) {
    match op {
        FieldOp::Set(value) => {
            doc.insert(field.to_string(), value);
        }
        FieldOp::Increment(amount) => {
            let current = doc.get(field).and_then(Value::as_i64).unwrap_or(0);
            doc.insert(field.to_string(), Value::from(current + amount));
        }
        FieldOp::ArrayUnion(values) => {
            let entry = doc
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));

            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }

            if let Some(array) = entry.as_array_mut() {
                for value in values {
                    if !array.contains(&value) {
                        array.push(value);
                    }
                }
            }
        }
    }
}
