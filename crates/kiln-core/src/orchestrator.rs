//! Turns a file edit into cache invalidation and queued live updates.

use crate::graph::DependencyGraph;
use crate::hmr::{HmrThrottle, UpdateKind};
use crate::transform::UniversalTransformer;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Progress of a single change through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStage {
    Received,
    Invalidated,
    Rebuilt,
    CacheCleared,
    Classified,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub timestamp: SystemTime,
}

impl FileChangeEvent {
    #[must_use]
    pub fn now(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timestamp: SystemTime::now(),
        }
    }
}

pub struct ChangeOrchestrator {
    root: PathBuf,
    graph: Arc<dyn DependencyGraph>,
    transformer: Arc<UniversalTransformer>,
    throttle: HmrThrottle,
}

impl ChangeOrchestrator {
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        graph: Arc<dyn DependencyGraph>,
        transformer: Arc<UniversalTransformer>,
        throttle: HmrThrottle,
    ) -> Self {
        Self {
            root: root.into(),
            graph,
            transformer,
            throttle,
        }
    }

    /// Process one edit. Every affected file's transform cache entry is
    /// gone by the time this returns; the matching updates are queued on
    /// the throttle. Returns the affected set, origin first.
    pub async fn on_change(&self, event: FileChangeEvent) -> Vec<PathBuf> {
        let path = event.path;
        trace!(path = %path.display(), stage = ?ChangeStage::Received, "file change");

        self.graph.invalidate(&path);
        trace!(path = %path.display(), stage = ?ChangeStage::Invalidated, "file change");

        let affected = match self.graph.rebuild(&path).await {
            Ok(affected) if !affected.is_empty() => affected,
            Ok(_) => vec![path.clone()],
            Err(e) => {
                warn!(path = %path.display(), error = %e, "graph rebuild failed, updating the file alone");
                vec![path.clone()]
            }
        };
        trace!(path = %path.display(), affected = affected.len(), stage = ?ChangeStage::Rebuilt, "file change");

        for file in &affected {
            self.transformer.clear_cache(Some(file));
            trace!(path = %file.display(), stage = ?ChangeStage::CacheCleared, "file change");

            let kind = UpdateKind::for_path(file);
            trace!(path = %file.display(), ?kind, stage = ?ChangeStage::Classified, "file change");

            self.throttle.queue_update(self.url_path(file), kind);
            trace!(path = %file.display(), stage = ?ChangeStage::Queued, "file change");
        }

        debug!(path = %path.display(), affected = affected.len(), "change queued");
        affected
    }

    /// Root-relative URL path with a leading `/` and forward slashes.
    /// Files outside the root keep their full path.
    #[must_use]
    pub fn url_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }
}
