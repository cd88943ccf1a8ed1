//! Pre-bundled dependency manifest.
//!
//! A pre-bundler writes one ESM file per dependency into
//! `node_modules/.kiln/` plus `_metadata.json` mapping each bare specifier
//! to its file:
//!
//! ```json
//! {"react": "react.js", "react-dom/client": "react-dom_client.js"}
//! ```
//!
//! Files are served at `/@kiln-deps/<file>`. A missing or unreadable
//! manifest just means nothing is pre-bundled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// URL prefix for pre-bundled files.
pub const DEPS_PREFIX: &str = "/@kiln-deps/";

/// Directory under the project root holding pre-bundled files.
#[must_use]
pub fn deps_dir(root: &Path) -> PathBuf {
    root.join("node_modules").join(".kiln")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepsManifest {
    entries: HashMap<String, String>,
}

impl DepsManifest {
    #[must_use]
    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Read the manifest for the project at `root`.
    pub async fn load(root: &Path) -> Self {
        let path = deps_dir(root).join("_metadata.json");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no pre-bundled dependencies");
                return Self::default();
            }
        };
        match serde_json::from_str::<HashMap<String, String>>(&text) {
            Ok(entries) => {
                debug!(count = entries.len(), "loaded pre-bundled dependency manifest");
                Self { entries }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed dependency manifest");
                Self::default()
            }
        }
    }

    /// Served URL for a bare specifier, without cache-busting.
    #[must_use]
    pub fn url_for(&self, specifier: &str) -> Option<String> {
        self.entries
            .get(specifier)
            .map(|file| format!("{DEPS_PREFIX}{file}"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
