//! Named transforms between activity output and input shapes.
//!
//! A transform is a pure function from one step's output payload to the next
//! step's input payload. The [`TransformRegistry`] holds every known transform
//! and answers two questions:
//!
//! - **resolve**: which transform reshapes output shape `A` into input shape `B`?
//! - **apply**: run a transform by name against a payload.
//!
//! # Resolution rules
//!
//! 1. `A == B` resolves to the identity transform (`passthrough`).
//! 2. A transform whose source accepts `A` and whose target is exactly `B` is an
//!    exact match. Exact matches win.
//! 3. Otherwise a transform whose source accepts `A` and whose target is a
//!    shape-set containing `B` is accepted.
//!
//! If more than one candidate survives at the winning level the resolver fails
//! with [`PipelineError::AmbiguousTransform`]; callers must name the transform
//! explicitly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::{PipelineError, Result};
use crate::shape::{ShapePattern, ShapeTag};

/// Name of the identity transform.
pub const PASSTHROUGH: &str = "passthrough";

/// Signature of a caller-supplied transform.
pub type TransformFn =
    Arc<dyn Fn(&Value, &TransformContext<'_>) -> std::result::Result<Value, String> + Send + Sync>;

/// Run-scoped inputs every transform may consult.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// The payload the run was started with.
    pub workflow_input: &'a Value,
    /// Collection used when neither the payload nor the run input names one.
    pub default_collection: &'a str,
    /// Result count used when a query does not specify `top_k`.
    pub default_top_k: u64,
}

/// The operation a transform performs.
#[derive(Clone)]
pub enum TransformOp {
    /// Prior output unchanged.
    Passthrough,
    /// Normalise loose document payloads into `{"documents": [...]}`.
    Documents,
    /// Attach a collection name to a chunk list: `{"chunks": [...], "collection": ".."}`.
    ChunksWithCollection,
    /// Normalise a query into `{"query", "collection", "top_k"}`.
    QueryWithCollection,
    /// Pull the document list out of a search result.
    ExtractDocuments,
    /// Caller-supplied function.
    Custom(TransformFn),
}

impl TransformOp {
    /// Look up a built-in operation by its declarative name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "passthrough" => Some(TransformOp::Passthrough),
            "documents" => Some(TransformOp::Documents),
            "chunks_with_collection" | "chunked_docs_with_collection" => {
                Some(TransformOp::ChunksWithCollection)
            }
            "query_with_collection" => Some(TransformOp::QueryWithCollection),
            "extract_documents" => Some(TransformOp::ExtractDocuments),
            _ => None,
        }
    }

    fn run(&self, data: &Value, ctx: &TransformContext<'_>) -> std::result::Result<Value, String> {
        match self {
            TransformOp::Passthrough => Ok(data.clone()),
            TransformOp::Documents => Ok(json!({ "documents": normalize_documents(data) })),
            TransformOp::ChunksWithCollection => chunks_with_collection(data, ctx),
            TransformOp::QueryWithCollection => Ok(normalize_query(data, ctx)),
            TransformOp::ExtractDocuments => extract_documents(data),
            TransformOp::Custom(f) => f(data, ctx),
        }
    }
}

impl fmt::Debug for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformOp::Passthrough => "Passthrough",
            TransformOp::Documents => "Documents",
            TransformOp::ChunksWithCollection => "ChunksWithCollection",
            TransformOp::QueryWithCollection => "QueryWithCollection",
            TransformOp::ExtractDocuments => "ExtractDocuments",
            TransformOp::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// A named transform with its declared shapes.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub name: String,
    /// Shapes the transform accepts.
    pub source: ShapePattern,
    /// Shape (or shape-set) the transform produces.
    pub target: ShapePattern,
    pub op: TransformOp,
}

impl TransformSpec {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<ShapePattern>,
        target: impl Into<ShapePattern>,
        op: TransformOp,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            op,
        }
    }

    /// The identity transform.
    pub fn passthrough() -> Self {
        Self::new(
            PASSTHROUGH,
            ShapePattern::Any,
            ShapePattern::Any,
            TransformOp::Passthrough,
        )
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.op, TransformOp::Passthrough)
    }

    /// Whether the transform can produce `shape`, exactly or as a set member.
    pub fn produces(&self, shape: &ShapeTag) -> bool {
        self.target.matches(shape)
    }

    /// Apply the transform to a payload.
    pub fn apply(&self, data: &Value, ctx: &TransformContext<'_>) -> Result<Value> {
        self.op
            .run(data, ctx)
            .map_err(|message| PipelineError::TransformFailed {
                name: self.name.clone(),
                message,
            })
    }
}

/// Registry of transforms, always containing the identity transform.
#[derive(Debug, Clone)]
pub struct TransformRegistry {
    identity: TransformSpec,
    transforms: Vec<TransformSpec>,
    index: HashMap<String, usize>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    /// Registry holding only the identity transform.
    pub fn new() -> Self {
        Self {
            identity: TransformSpec::passthrough(),
            transforms: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry with the built-in RAG transforms registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins = [
            TransformSpec::new(
                "documents",
                ShapePattern::one_of(["document", "document_list"]),
                "documents",
                TransformOp::Documents,
            ),
            TransformSpec::new(
                "chunked_docs_with_collection",
                ShapePattern::one_of(["chunks", "documents"]),
                ShapePattern::one_of(["chunks+collection", "documents+collection"]),
                TransformOp::ChunksWithCollection,
            ),
            TransformSpec::new(
                "query_with_collection",
                ShapePattern::one_of(["query", "text"]),
                "query+collection",
                TransformOp::QueryWithCollection,
            ),
            TransformSpec::new(
                "extract_documents",
                "search_results",
                "documents",
                TransformOp::ExtractDocuments,
            ),
        ];
        for spec in builtins {
            debug_assert!(
                spec.name != PASSTHROUGH && !registry.index.contains_key(&spec.name),
                "duplicate built-in transform '{}'",
                spec.name
            );
            registry.insert(spec);
        }
        registry
    }

    /// Register a transform. Fails if the name is taken (including `passthrough`).
    pub fn register(&mut self, spec: TransformSpec) -> Result<()> {
        if spec.name == PASSTHROUGH || self.index.contains_key(&spec.name) {
            return Err(PipelineError::DuplicateTransform(spec.name));
        }
        self.insert(spec);
        Ok(())
    }

    fn insert(&mut self, spec: TransformSpec) {
        self.index.insert(spec.name.clone(), self.transforms.len());
        self.transforms.push(spec);
    }

    /// Look up a transform by name.
    pub fn get(&self, name: &str) -> Result<&TransformSpec> {
        if name == PASSTHROUGH {
            return Ok(&self.identity);
        }
        self.index
            .get(name)
            .map(|&i| &self.transforms[i])
            .ok_or_else(|| PipelineError::UnknownTransform(name.to_string()))
    }

    /// The identity transform.
    pub fn identity(&self) -> &TransformSpec {
        &self.identity
    }

    /// Registered transforms (excluding the identity) in registration order.
    pub fn all(&self) -> impl Iterator<Item = &TransformSpec> + Clone + '_ {
        self.transforms.iter()
    }

    /// Find the transform that reshapes `output` into `input`.
    ///
    /// Returns `Ok(None)` when nothing matches and
    /// [`PipelineError::AmbiguousTransform`] when several do.
    pub fn resolve(&self, output: &ShapeTag, input: &ShapeTag) -> Result<Option<&TransformSpec>> {
        if output == input {
            return Ok(Some(&self.identity));
        }

        let accepting = || self.transforms.iter().filter(|t| t.source.matches(output));

        let exact: Vec<&TransformSpec> = accepting().filter(|t| t.target.is_exactly(input)).collect();
        if !exact.is_empty() {
            return pick_one(exact, output, input);
        }

        let members: Vec<&TransformSpec> = accepting()
            .filter(|t| !t.target.is_exactly(input) && t.target.matches(input))
            .collect();
        if members.is_empty() {
            return Ok(None);
        }
        pick_one(members, output, input)
    }

    /// Apply a transform by name; `None` means the identity.
    pub fn apply(
        &self,
        name: Option<&str>,
        data: &Value,
        ctx: &TransformContext<'_>,
    ) -> Result<Value> {
        match name {
            Some(name) => self.get(name)?.apply(data, ctx),
            None => Ok(data.clone()),
        }
    }
}

fn pick_one<'a>(
    candidates: Vec<&'a TransformSpec>,
    output: &ShapeTag,
    input: &ShapeTag,
) -> Result<Option<&'a TransformSpec>> {
    if let [only] = candidates.as_slice() {
        return Ok(Some(*only));
    }
    Err(PipelineError::AmbiguousTransform {
        from: output.clone(),
        to: input.clone(),
        candidates: candidates.iter().map(|t| t.name.clone()).collect(),
    })
}

// ---------------------------------------------------------------------------
// Built-in operations
// ---------------------------------------------------------------------------

fn normalize_documents(data: &Value) -> Value {
    match data {
        Value::Null => Value::Array(Vec::new()),
        Value::Object(map) => map
            .get("retrieved_documents")
            .or_else(|| map.get("documents"))
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![data.clone()])),
        Value::Array(_) => data.clone(),
        other => Value::Array(vec![other.clone()]),
    }
}

fn chunks_with_collection(
    data: &Value,
    ctx: &TransformContext<'_>,
) -> std::result::Result<Value, String> {
    let collection = ctx
        .workflow_input
        .get("collection")
        .and_then(Value::as_str)
        .unwrap_or(ctx.default_collection);

    let mut chunks = match data {
        Value::Object(map) => map
            .get("chunks")
            .or_else(|| map.get("documents"))
            .ok_or_else(|| "payload has neither 'chunks' nor 'documents'".to_string())?,
        other => other,
    };

    // Unwrap singly-nested lists: [[a, b]] -> [a, b]
    while let Value::Array(items) = chunks {
        match items.as_slice() {
            [inner @ Value::Array(_)] => chunks = inner,
            _ => break,
        }
    }

    if !chunks.is_array() {
        return Err(format!("expected a list of chunks, got {}", type_name(chunks)));
    }

    Ok(json!({ "chunks": chunks, "collection": collection }))
}

fn normalize_query(data: &Value, ctx: &TransformContext<'_>) -> Value {
    let mut collection = ctx.default_collection.to_string();
    let mut top_k = ctx.default_top_k;

    let query = match data {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.first().map(value_to_string).unwrap_or_default(),
        Value::Object(map) => {
            if let Some(c) = map.get("collection").and_then(Value::as_str) {
                collection = c.to_string();
            }
            if let Some(k) = map.get("top_k").and_then(Value::as_u64) {
                top_k = k;
            }
            map.get("query").map(value_to_string).unwrap_or_default()
        }
        other => other.to_string(),
    };

    json!({ "query": query, "collection": collection, "top_k": top_k })
}

fn extract_documents(data: &Value) -> std::result::Result<Value, String> {
    let docs = match data {
        Value::Object(map) => ["retrieved_documents", "documents", "results"]
            .iter()
            .find_map(|k| map.get(*k))
            .cloned()
            .ok_or_else(|| "search result has no document list".to_string())?,
        Value::Array(_) => data.clone(),
        other => return Err(format!("expected a search result, got {}", type_name(other))),
    };
    Ok(json!({ "documents": docs }))
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
