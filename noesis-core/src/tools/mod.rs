//! Tool system
//!
//! Tools are named, schema-typed async callables. Handlers report failures
//! as structured [`ToolError`] values which the tool-use loop feeds back to
//! the oracle, so a failing tool never aborts a run.
//!
//! # Example
//!
//! ```rust,no_run
//! use noesis_core::tools::{FnTool, ToolError, ToolExecutionContext, ToolMetadata, ToolSchema, Toolbox};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! let search = FnTool::from_fn(
//!     ToolMetadata::new("search", "Search papers by keyword"),
//!     ToolSchema::new(json!({
//!         "type": "object",
//!         "properties": {"query": {"type": "string"}},
//!         "required": ["query"]
//!     })),
//!     |args: Value, _ctx: ToolExecutionContext| async move {
//!         let query = args["query"].as_str().ok_or_else(|| ToolError::validation("query"))?;
//!         Ok::<_, ToolError>(json!({ "hits": [query] }))
//!     },
//! );
//!
//! let toolbox = Toolbox::new().with(Arc::new(search)).unwrap();
//! ```

mod result;
mod tool;
mod toolbox;

pub use result::{ToolError, ToolErrorKind, ToolProvenance, ToolResult, ToolResultEnvelope};
pub use tool::{
    args_hash, stamp_provenance, FnHandler, HandlerTool, Tool, ToolExecutionContext, ToolHandler,
    ToolMetadata, ToolSchema,
};
pub use toolbox::Toolbox;

/// Tool built from an async closure
pub type FnTool<F> = HandlerTool<FnHandler<F>>;
