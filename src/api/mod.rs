//! Admin HTTP surface
//!
//! Thin axum layer over the plugin manager: the plugin control operations
//! plus a health view. Trace ids propagate in and out through the middleware.

pub(crate) mod error;
pub(crate) mod middleware;
pub(crate) mod plugins;
pub(crate) mod router;

pub use error::ApiError;
pub use router::{build_router, serve, ApiState};
