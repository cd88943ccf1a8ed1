//! Module dependency graph.
//!
//! The pipeline ingests every script it serves, which records the file's
//! imports. When a file changes, the orchestrator asks the graph for the
//! file plus everything that transitively imports it.

use crate::pipeline::rewrite::{extract_specifiers, is_path_specifier};
use crate::pipeline::ALTERNATE_EXTENSIONS;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait DependencyGraph: Send + Sync {
    /// Record the imports `source`, the text just read from `path`, makes.
    async fn ingest(&self, path: &Path, source: &str);

    /// Forget `path`'s imports. Edges from its importers are kept.
    fn invalidate(&self, path: &Path);

    /// Refresh `path` and return it followed by its transitive importers.
    async fn rebuild(&self, path: &Path) -> Result<Vec<PathBuf>, GraphError>;
}

#[derive(Debug, Default)]
struct Edges {
    /// File to the files it imports.
    imports: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// File to the files importing it.
    importers: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl Edges {
    fn drop_imports(&mut self, path: &Path) {
        if let Some(old) = self.imports.remove(path) {
            for dep in old {
                if let Some(set) = self.importers.get_mut(&dep) {
                    set.remove(path);
                }
            }
        }
    }

    fn set_imports(&mut self, path: &Path, deps: BTreeSet<PathBuf>) {
        self.drop_imports(path);
        for dep in &deps {
            self.importers
                .entry(dep.clone())
                .or_default()
                .insert(path.to_path_buf());
        }
        self.imports.insert(path.to_path_buf(), deps);
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

/// Graph built from the import statements of served files.
#[derive(Debug)]
pub struct ImportGraph {
    root: PathBuf,
    edges: RwLock<Edges>,
}

impl ImportGraph {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            edges: RwLock::new(Edges::default()),
        }
    }

    /// Files `path` was last seen importing.
    #[must_use]
    pub fn imports_of(&self, path: &Path) -> Vec<PathBuf> {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .imports
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Read `path` from disk and record its imports.
    pub async fn ingest_file(&self, path: &Path) -> Result<(), GraphError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| GraphError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        self.ingest(path, &source).await;
        Ok(())
    }

    /// File a relative or root-absolute specifier points at, if it exists.
    async fn resolve(&self, importer: &Path, specifier: &str) -> Option<PathBuf> {
        let clean = specifier.split(['?', '#']).next().unwrap_or(specifier);
        let base = if let Some(rooted) = clean.strip_prefix('/') {
            self.root.join(rooted)
        } else {
            importer.parent()?.join(clean)
        };
        let base = normalize(&base);

        if is_file(&base).await {
            return Some(base);
        }
        for ext in ALTERNATE_EXTENSIONS {
            let mut candidate = base.clone().into_os_string();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            if is_file(&candidate).await {
                return Some(candidate);
            }
        }
        for ext in ALTERNATE_EXTENSIONS {
            let candidate = base.join(format!("index{ext}"));
            if is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

#[async_trait]
impl DependencyGraph for ImportGraph {
    async fn ingest(&self, path: &Path, source: &str) {
        let mut deps = BTreeSet::new();
        for specifier in extract_specifiers(source) {
            if !is_path_specifier(&specifier) {
                continue;
            }
            if let Some(dep) = self.resolve(path, &specifier).await {
                deps.insert(dep);
            }
        }
        trace!(path = %path.display(), imports = deps.len(), "ingested module");

        self.edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_imports(path, deps);
    }

    fn invalidate(&self, path: &Path) {
        self.edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drop_imports(path);
    }

    async fn rebuild(&self, path: &Path) -> Result<Vec<PathBuf>, GraphError> {
        if is_file(path).await {
            self.ingest_file(path).await?;
        }

        let edges = self.edges.read().unwrap_or_else(PoisonError::into_inner);
        let mut affected = vec![path.to_path_buf()];
        let mut seen: HashSet<PathBuf> = HashSet::from([path.to_path_buf()]);
        let mut queue: VecDeque<PathBuf> = VecDeque::from([path.to_path_buf()]);

        while let Some(current) = queue.pop_front() {
            let Some(importers) = edges.importers.get(&current) else {
                continue;
            };
            for importer in importers {
                if seen.insert(importer.clone()) {
                    affected.push(importer.clone());
                    queue.push_back(importer.clone());
                }
            }
        }
        Ok(affected)
    }
}
