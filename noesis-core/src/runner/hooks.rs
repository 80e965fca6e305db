//! Progress hooks for the tool-use loop
//!
//! Hooks observe a run as it happens: intermediate oracle text, each tool
//! request, and each tool outcome. They fire synchronously and cannot veto.
//! A panicking hook is caught and logged; the run carries on. This needs
//! `panic = "unwind"`, so the workspace release profile keeps the default.

use super::ToolInvocationRecord;
use crate::llm::ToolCall;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{info, warn};

/// Observer of a tool-use run
pub trait ProgressHooks: Send + Sync {
    /// Text produced by the oracle, intermediate or final
    fn on_text(&self, _text: &str) {}

    /// A tool request about to be dispatched
    fn on_tool_call(&self, _call: &ToolCall) {}

    /// The outcome of a dispatched tool request
    fn on_tool_result(&self, _record: &ToolInvocationRecord) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ProgressHooks for NoopHooks {}

/// Hooks that report progress through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

impl ProgressHooks for LoggingHooks {
    fn on_text(&self, text: &str) {
        info!(chars = text.chars().count(), "Oracle text");
    }

    fn on_tool_call(&self, call: &ToolCall) {
        info!(tool = %call.name, request_id = %call.id, "Tool requested");
    }

    fn on_tool_result(&self, record: &ToolInvocationRecord) {
        info!(
            tool = %record.tool,
            request_id = %record.request_id,
            success = record.is_success(),
            duration_ms = record.provenance.as_ref().map(|p| p.duration_ms),
            args_hash = record.provenance.as_ref().map(|p| p.args_hash.as_str()),
            "Tool finished"
        );
    }
}

/// Run a hook, swallowing any panic it raises
pub(crate) fn fire(hook: &'static str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        warn!(hook, panic = %panic_message(&*panic), "Progress hook panicked; continuing");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_fire_swallows_panic() {
        let ran_after = AtomicBool::new(false);
        fire("on_text", || panic!("hook exploded"));
        fire("on_text", || ran_after.store(true, Ordering::SeqCst));
        assert!(ran_after.load(Ordering::SeqCst));
    }

    #[test]
    fn test_release_profile_unwinds() {
        let manifest = include_str!("../../../Cargo.toml");
        let aborts = manifest
            .lines()
            .map(|line| line.replace(' ', ""))
            .any(|line| line.starts_with("panic=") && line.contains("abort"));
        assert!(!aborts, "hooks rely on unwinding to contain panics");
    }

    #[test]
    fn test_panic_message() {
        let panic = catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*panic), "boom 1");
    }
}
