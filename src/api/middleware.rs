//! Trace middleware
//!
//! Reads `X-Trace-ID` from the inbound request (preserving distributed
//! traces) or generates a fresh one, always generates a new request id,
//! installs both as the task-local trace context for the handler, and echoes
//! them on the response.

use crate::core::trace::{self, TraceContext};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

pub const TRACE_HEADER: &str = "X-Trace-ID";
pub const REQUEST_HEADER: &str = "X-Request-ID";

pub async fn trace_middleware(request: Request, next: Next) -> Response {
    let incoming_trace = request
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| trace::is_valid_id(v))
        .map(|v| v.to_string());

    let ctx = match incoming_trace {
        Some(trace_id) => TraceContext::with_trace_id(trace_id),
        None => TraceContext::new(),
    };
    let trace_id = ctx.trace_id.clone();
    let request_id = ctx.request_id.clone();

    let mut response = trace::scope(ctx, next.run(request)).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        headers.insert(TRACE_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_HEADER, value);
    }
    response
}
