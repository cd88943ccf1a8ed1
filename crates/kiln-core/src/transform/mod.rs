//! Universal transformer: routes a source file to its framework adapter.
//!
//! Adapter failures never reach the caller. They are logged and the file is
//! retried through the vanilla adapter; only a vanilla failure is returned.
//! Results are cached per (path, source length, framework) in dev mode.

pub mod adapter;
pub mod cache;
pub mod jsx;
pub mod vanilla;
pub mod vue;

pub use adapter::{Adapter, AdapterContext, AdapterError, AdapterInput, FrameworkAdapter};
pub use cache::{CacheKey, CacheStats, CacheTicket, TransformCache};

use crate::compiler::{code_frame, Capabilities};
use base64::Engine;
use crate::framework::{FrameworkTag, PackageVersions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Input to one transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    pub file_path: PathBuf,
    pub source: String,
    pub framework: FrameworkTag,
    pub dev: bool,
    /// Cache ticket taken before `source` was read. Without one the
    /// transformer takes its own when the transform starts.
    pub ticket: Option<CacheTicket>,
}

impl TransformRequest {
    #[must_use]
    pub fn new(
        file_path: impl Into<PathBuf>,
        source: impl Into<String>,
        framework: FrameworkTag,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            source: source.into(),
            framework,
            dev: true,
            ticket: None,
        }
    }

    #[must_use]
    pub fn with_ticket(mut self, ticket: CacheTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey {
            source_len: self.source.len(),
            framework: self.framework,
        }
    }
}

/// Output of one transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    /// Executable module text.
    pub code: String,
    pub source_map: Option<String>,
    /// Runtime modules the output imports on top of the source's own imports.
    pub dependencies: Vec<String>,
}

/// Put `line` above `code`, moving an inlined source map down one line with
/// it. A map that fails to decode is left as is.
#[must_use]
pub fn prepend_line(code: &str, line: &str) -> String {
    let shifted = code.rfind(vanilla::INLINE_MAP_PREFIX).and_then(|at| {
        let start = at + vanilla::INLINE_MAP_PREFIX.len();
        let end = code[start..]
            .find(['\n', '\r'])
            .map_or(code.len(), |n| start + n);
        let map = shift_map_down(&code[start..end])?;
        Some(format!("{}{map}{}", &code[..start], &code[end..]))
    });
    format!("{line}\n{}", shifted.as_deref().unwrap_or(code))
}

/// Base64 source map with an empty first generated line added.
fn shift_map_down(encoded: &str) -> Option<String> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut map: serde_json::Value = serde_json::from_slice(&engine.decode(encoded).ok()?).ok()?;
    let mappings = map.get_mut("mappings")?;
    let shifted = format!(";{}", mappings.as_str()?);
    *mappings = serde_json::Value::String(shifted);
    Some(engine.encode(serde_json::to_vec(&map).ok()?))
}

/// A file that not even the vanilla adapter could handle.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
    pub file: PathBuf,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Source excerpt around the failure.
    pub frame: Option<String>,
}

impl TransformError {
    fn from_adapter(error: AdapterError, file: &Path, source: &str) -> Self {
        let location = match &error {
            AdapterError::Compile(compile) => compile
                .primary_location()
                .and_then(|d| d.line.map(|line| (line, d.column.unwrap_or(1)))),
            _ => None,
        };
        let message = match &error {
            AdapterError::Compile(compile) => compile.message.clone(),
            other => other.to_string(),
        };
        Self {
            message,
            file: file.to_path_buf(),
            line: location.map(|(line, _)| line),
            column: location.map(|(_, column)| column),
            frame: location.map(|(line, column)| code_frame(source, line, column)),
        }
    }

    /// Stack-style trace pointing at the failure.
    #[must_use]
    pub fn stack(&self) -> String {
        match (self.line, self.column) {
            (Some(line), Some(column)) => format!(
                "{}\n    at {}:{line}:{column}",
                self.message,
                self.file.display()
            ),
            _ => format!("{}\n    at {}", self.message, self.file.display()),
        }
    }
}

/// Routes transforms to framework adapters and caches the results.
///
/// One transformer belongs to one dev instance; a restart builds a new one,
/// so no cache outlives the instance that filled it.
pub struct UniversalTransformer {
    routes: HashMap<FrameworkTag, Adapter>,
    versions: Arc<PackageVersions>,
    cache: TransformCache,
}

impl UniversalTransformer {
    /// Build a transformer for the project at `root`, probing which
    /// compilers this build carries.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_capabilities(
            Arc::new(PackageVersions::new(root)),
            Capabilities::probe(),
        )
    }

    #[must_use]
    pub fn with_capabilities(versions: Arc<PackageVersions>, capabilities: Capabilities) -> Self {
        let routes = FrameworkTag::ALL
            .into_iter()
            .map(|tag| {
                if Adapter::is_degraded(tag, capabilities) {
                    debug!(framework = %tag, "no native compiler for framework; using vanilla");
                }
                (tag, Adapter::for_framework(tag, capabilities))
            })
            .collect();
        Self {
            routes,
            versions,
            cache: TransformCache::new(),
        }
    }

    /// Adapter that requests for `tag` are routed to.
    #[must_use]
    pub fn adapter_for(&self, tag: FrameworkTag) -> Adapter {
        self.routes
            .get(&tag)
            .copied()
            .unwrap_or(Adapter::Vanilla(vanilla::VanillaAdapter))
    }

    pub fn versions(&self) -> &Arc<PackageVersions> {
        &self.versions
    }

    /// Transform one file.
    pub async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<Arc<TransformResult>, TransformError> {
        let path = request.file_path.as_path();
        let key = request.cache_key();

        let ticket = if request.dev {
            if let Some(hit) = self.cache.get(path, key) {
                return Ok(hit);
            }
            Some(request.ticket.unwrap_or_else(|| self.cache.ticket(path)))
        } else {
            None
        };

        let cx = AdapterContext {
            versions: &self.versions,
        };
        let input = AdapterInput {
            path,
            source: &request.source,
            dev: request.dev,
        };

        let adapter = self.adapter_for(request.framework);
        let outcome = match adapter.transform(&cx, &input).await {
            Ok(result) => Ok(result),
            Err(error) if !adapter.is_vanilla() => {
                warn!(
                    path = %path.display(),
                    framework = %request.framework,
                    adapter = adapter.name(),
                    error = %error,
                    "adapter failed, falling back to vanilla"
                );
                vanilla::VanillaAdapter.transform(&cx, &input).await
            }
            Err(error) => Err(error),
        };

        let result = Arc::new(
            outcome.map_err(|e| TransformError::from_adapter(e, path, &request.source))?,
        );

        if let Some(ticket) = ticket {
            if !self.cache.insert(path, key, ticket, Arc::clone(&result)) {
                debug!(path = %path.display(), "discarding transform of superseded content");
            }
        }
        Ok(result)
    }

    /// Ticket for a transform of `path` whose source is about to be read.
    /// Take it before reading so an eviction that lands in between keeps the
    /// result out of the cache.
    #[must_use]
    pub fn cache_ticket(&self, path: &Path) -> CacheTicket {
        self.cache.ticket(path)
    }

    /// Evict cached output for `path`, or for every file.
    pub fn clear_cache(&self, path: Option<&Path>) {
        self.cache.clear(path);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
