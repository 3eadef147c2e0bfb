//! Trace Context Propagation
//!
//! Carries the trace id and request id for one unit of work. The context is
//! stored task-locally so log records pick it up without every call site
//! threading ids by hand; pipeline code still receives the context explicitly
//! so child events can copy the parent's ids.

use std::fmt;

/// Correlation ids for one inbound request or one queued event.
///
/// Both ids are 32-character lowercase hex strings. A fresh context generates
/// both; a child context keeps the trace id and mints a new request id only
/// when crossing a request boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub request_id: String,
}

impl TraceContext {
    /// Generate a brand new context with fresh trace and request ids.
    pub fn new() -> Self {
        Self {
            trace_id: generate_id(),
            request_id: generate_id(),
        }
    }

    /// Build a context from an existing trace id (e.g. an inbound
    /// `X-Trace-ID` header), generating a fresh request id.
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            request_id: generate_id(),
        }
    }

    /// Build a context carrying both ids verbatim (event propagation: child
    /// events copy the parent's trace and request ids).
    pub fn inherited(trace_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            request_id: request_id.into(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace={} request={}", self.trace_id, self.request_id)
    }
}

/// Generate a 32-character lowercase hex id (UUID4 without hyphens).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Check that a header value looks like one of our ids.
pub fn is_valid_id(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

tokio::task_local! {
    static CURRENT: TraceContext;
}

/// Run a future with `ctx` installed as the task-local trace context.
///
/// Log records emitted inside the future carry the context's ids. Spawned
/// tasks do NOT inherit the context automatically; wrap their futures in
/// `scope` again with a clone.
pub async fn scope<F>(ctx: TraceContext, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT.scope(ctx, fut).await
}

/// Get a copy of the current task-local trace context, if one is installed.
pub fn current() -> Option<TraceContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_32_hex() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(is_valid_id(&id));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_id_validation_rejects_bad_values() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("abc"));
        assert!(!is_valid_id(&"g".repeat(32))); // not hex
        assert!(is_valid_id(&"a1".repeat(16)));
    }

    #[test]
    fn test_with_trace_id_preserves_trace() {
        let ctx = TraceContext::with_trace_id("cafe".repeat(8));
        assert_eq!(ctx.trace_id, "cafe".repeat(8));
        assert_ne!(ctx.request_id, ctx.trace_id);
    }

    #[test]
    fn test_inherited_copies_both_ids() {
        let parent = TraceContext::new();
        let child = TraceContext::inherited(parent.trace_id.clone(), parent.request_id.clone());
        assert_eq!(child, parent);
    }

    #[tokio::test]
    async fn test_scope_installs_context() {
        assert!(current().is_none());

        let ctx = TraceContext::new();
        let expected = ctx.clone();
        scope(ctx, async move {
            let seen = current().expect("context should be installed");
            assert_eq!(seen, expected);
        })
        .await;

        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_outer() {
        let outer = TraceContext::new();
        let inner = TraceContext::new();
        let inner_clone = inner.clone();
        let outer_clone = outer.clone();

        scope(outer, async move {
            scope(inner, async move {
                assert_eq!(current().unwrap(), inner_clone);
            })
            .await;
            assert_eq!(current().unwrap(), outer_clone);
        })
        .await;
    }
}
