//! Manifest & Semver Library
//!
//! Pure parsing and validation: semver versions, constraint expressions, and
//! the `plugin.yaml` manifest contract. No I/O beyond the file loader helper;
//! constraint evaluation is deterministic.

pub(crate) mod schema;
pub(crate) mod semver;

pub use schema::{
    Entrypoint, ManifestConfig, ManifestDependencies, ManifestError, ManifestHealth,
    ManifestHooks, ManifestResources, PluginKind, PluginManifest, SchemaViolation,
    MAX_MANIFEST_BYTES, SUPPORTED_API_VERSION,
};
pub use semver::{satisfies, ConstraintOp, ParseError, Version, VersionConstraint};
