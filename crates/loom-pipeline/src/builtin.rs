//! Built-in in-process activities.
//!
//! Registered under the [`LOCAL_SERVICE`] service by [`handlers`].

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::catalog::ActivityKey;
use crate::dispatch::{ActivityResult, HandlerTable};
use crate::error::ActivityError;
use crate::loader::LOCAL_SERVICE;

/// Word-window chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub words_per_chunk: usize,
    /// Words shared by consecutive chunks. Clamped below `words_per_chunk`.
    pub overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            words_per_chunk: 200,
            overlap: 20,
        }
    }
}

/// Handler table with every built-in activity.
pub fn handlers() -> HandlerTable {
    let mut table = HandlerTable::new();
    table.insert_fn(ActivityKey::new(LOCAL_SERVICE, "chunk_documents"), |input| async move {
        chunk_documents(&input, ChunkOptions::default())
    });
    table.insert_fn(ActivityKey::new(LOCAL_SERVICE, "format_context"), |input| async move {
        format_context(&input)
    });
    table.insert_fn(ActivityKey::new(LOCAL_SERVICE, "echo"), |input| async move { echo(input) });
    table
}

/// Split `{"documents": [{id, text, metadata}]}` into overlapping word windows.
///
/// Each chunk gets a fresh UUID and inherits the document metadata, extended
/// with `original_doc_id`, `chunk_index` and `total_chunks`.
pub fn chunk_documents(input: &Value, options: ChunkOptions) -> ActivityResult {
    let documents = document_list(input)?;
    let size = options.words_per_chunk.max(1);
    let stride = size - options.overlap.min(size - 1);

    let mut chunks = Vec::new();
    for (index, doc) in documents.iter().enumerate() {
        let Value::Object(doc) = doc else {
            return Err(ActivityError::Permanent(format!(
                "document {index} is not an object"
            )));
        };
        let text = doc.get("text").and_then(Value::as_str).unwrap_or_default();
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let starts: Vec<usize> = (0..words.len())
            .step_by(stride)
            .take_while(|&start| start == 0 || start + options.overlap.min(size - 1) < words.len())
            .collect();
        let total = starts.len();
        let base_meta = doc
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let doc_id = doc.get("id").cloned().unwrap_or(Value::Null);

        for (chunk_index, start) in starts.into_iter().enumerate() {
            let end = (start + size).min(words.len());
            let mut metadata: Map<String, Value> = base_meta.clone();
            metadata.insert("original_doc_id".into(), doc_id.clone());
            metadata.insert("chunk_index".into(), json!(chunk_index));
            metadata.insert("total_chunks".into(), json!(total));
            chunks.push(json!({
                "id": Uuid::new_v4().to_string(),
                "text": words[start..end].join(" "),
                "metadata": metadata,
            }));
        }
    }

    Ok(json!({ "chunks": chunks }))
}

/// Join document texts into a numbered context block: `{"context": "..."}`.
pub fn format_context(input: &Value) -> ActivityResult {
    let documents = document_list(input)?;
    let sections: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let text = doc
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| match doc {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            match doc
                .get("metadata")
                .and_then(|m| m.get("source"))
                .and_then(Value::as_str)
            {
                Some(source) => format!("[{}] ({source}) {text}", i + 1),
                None => format!("[{}] {text}", i + 1),
            }
        })
        .collect();

    Ok(json!({
        "context": sections.join("\n\n"),
        "document_count": documents.len(),
    }))
}

/// Return the input unchanged.
pub fn echo(input: Value) -> ActivityResult {
    Ok(input)
}

fn document_list(input: &Value) -> Result<&Vec<Value>, ActivityError> {
    let list = match input {
        Value::Object(map) => map.get("documents").unwrap_or(&Value::Null),
        other => other,
    };
    list.as_array().ok_or_else(|| {
        ActivityError::Permanent("expected a list of documents under 'documents'".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_chunk_single_short_document() {
        let input = json!({"documents": [{
            "id": "doc1",
            "text": "This is a test document. It should be chunked appropriately.",
            "metadata": {"source": "test", "author": "test_user"}
        }]});
        let out = chunk_documents(&input, ChunkOptions::default()).unwrap();
        let chunks = out["chunks"].as_array().unwrap();
        assert_eq!(chunks.len(), 1);

        let chunk = &chunks[0];
        assert!(Uuid::parse_str(chunk["id"].as_str().unwrap()).is_ok());
        let meta = &chunk["metadata"];
        assert_eq!(meta["source"], "test");
        assert_eq!(meta["author"], "test_user");
        assert_eq!(meta["original_doc_id"], "doc1");
        assert_eq!(meta["chunk_index"], 0);
        assert_eq!(meta["total_chunks"], 1);
    }

    #[test]
    fn test_chunk_windows_overlap() {
        let input = json!([{ "id": "d", "text": words(25) }]);
        let options = ChunkOptions {
            words_per_chunk: 10,
            overlap: 2,
        };
        let out = chunk_documents(&input, options).unwrap();
        let chunks = out["chunks"].as_array().unwrap();
        // Starts at 0, 8, 16.
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1]["text"].as_str().unwrap().starts_with("w8 w9"));
        assert!(chunks[2]["text"].as_str().unwrap().ends_with("w24"));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c["metadata"]["chunk_index"], i);
            assert_eq!(c["metadata"]["total_chunks"], 3);
        }
    }

    #[test]
    fn test_chunk_exact_window_has_no_trailing_overlap_chunk() {
        let input = json!([{ "id": "d", "text": words(10) }]);
        let options = ChunkOptions {
            words_per_chunk: 10,
            overlap: 2,
        };
        let out = chunk_documents(&input, options).unwrap();
        assert_eq!(out["chunks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_chunk_skips_empty_and_rejects_non_objects() {
        let empty = json!({"documents": [{"id": "e", "text": "   "}]});
        let out = chunk_documents(&empty, ChunkOptions::default()).unwrap();
        assert!(out["chunks"].as_array().unwrap().is_empty());

        let bad = json!({"documents": ["plain"]});
        assert!(matches!(
            chunk_documents(&bad, ChunkOptions::default()),
            Err(ActivityError::Permanent(_))
        ));
        assert!(chunk_documents(&json!({"x": 1}), ChunkOptions::default()).is_err());
    }

    #[test]
    fn test_format_context() {
        let input = json!({"documents": [
            {"text": "alpha", "metadata": {"source": "a.txt"}},
            {"text": "beta"},
        ]});
        let out = format_context(&input).unwrap();
        assert_eq!(out["context"], "[1] (a.txt) alpha\n\n[2] beta");
        assert_eq!(out["document_count"], 2);
    }

    #[tokio::test]
    async fn test_handler_table() {
        let table = handlers();
        assert_eq!(table.len(), 3);
        let out = table
            .invoke(&ActivityKey::new(LOCAL_SERVICE, "echo"), json!({"k": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"k": 1}));
    }
}
