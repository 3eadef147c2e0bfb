//! Plugin Discovery
//!
//! Recursive scan of a plugin root for `plugin.yaml` manifests. A manifest
//! that fails schema validation is logged and skipped; the rest of the scan
//! continues. Discovery never touches plugin code, it only reads manifests.

use crate::manifest::{ManifestError, PluginManifest};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = "plugin.yaml";

/// A manifest that parsed and validated.
#[derive(Debug)]
pub struct DiscoveredPlugin {
    pub manifest_path: PathBuf,
    pub manifest: PluginManifest,
}

/// Outcome of one discovery scan.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub plugins: Vec<DiscoveredPlugin>,
    pub failures: Vec<(PathBuf, ManifestError)>,
}

impl DiscoveryReport {
    pub fn manifest_paths(&self) -> Vec<PathBuf> {
        self.plugins.iter().map(|p| p.manifest_path.clone()).collect()
    }
}

/// Scan `root` recursively for plugin manifests.
///
/// Returns an empty report when the root does not exist; a missing plugin
/// directory is a normal deployment state, not an error.
pub fn discover(root: &Path) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    if !root.exists() {
        log::warn!("Plugin directory does not exist: {}", root.display());
        return report;
    }
    if !root.is_dir() {
        log::error!("Plugin path is not a directory: {}", root.display());
        return report;
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read directory {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut children: Vec<PathBuf> = Vec::new();
        for entry in entries.flatten() {
            children.push(entry.path());
        }
        // Deterministic scan order regardless of filesystem
        children.sort();

        for path in children {
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE_NAME) {
                match PluginManifest::load(&path) {
                    Ok(manifest) => {
                        log::debug!(
                            "Discovered plugin '{}' v{} at {}",
                            manifest.id,
                            manifest.version,
                            path.display()
                        );
                        report.plugins.push(DiscoveredPlugin {
                            manifest_path: path,
                            manifest,
                        });
                    }
                    Err(error) => {
                        log::error!("Invalid manifest at {}: {}", path.display(), error);
                        report.failures.push((path, error));
                    }
                }
            }
        }
    }

    // Stack-based walk yields no particular global order; normalise by id
    report.plugins.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));

    log::info!(
        "Discovery complete: {} valid plugins, {} invalid manifests",
        report.plugins.len(),
        report.failures.len()
    );
    report
}
