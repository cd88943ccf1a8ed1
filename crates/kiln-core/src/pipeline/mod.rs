//! Module request pipeline: URL path in, servable bytes out.
//!
//! ```text
//! GET /src/App.tsx
//!   → resolve (project root, public/, alternate extensions, index files)
//!   → graph ingest (records imports)
//!   → plugin chain
//!   → universal transformer
//!   → import rewrite
//!   → application/javascript
//! ```
//!
//! Reserved prefixes are answered before the filesystem is consulted:
//! `/@kiln/*` (generated modules), `/@kiln-deps/*` (pre-bundled
//! dependencies) and `/node_modules/*` (the package store).

pub mod deps;
pub mod plugin;
pub mod rewrite;
pub mod virtual_modules;

pub use deps::DepsManifest;
pub use plugin::{PluginChain, PluginError, SourcePlugin};
pub use rewrite::ImportRewriter;
pub use virtual_modules::VirtualModule;

use crate::config::SharedSettings;
use crate::framework::FrameworkTag;
use crate::graph::DependencyGraph;
use crate::hmr::{ErrorPayload, HmrMessage, HmrThrottle};
use crate::transform::{prepend_line, TransformError, TransformRequest, UniversalTransformer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Extensions tried, in order, when a request path has no exact match.
pub const ALTERNATE_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs", ".vue", ".svelte"];

const JAVASCRIPT: &str = "application/javascript";

/// How a file is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Script,
    Stylesheet,
    Json,
    Html,
    Other,
}

impl FileKind {
    #[must_use]
    pub fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "mts" | "cts" | "vue" | "svelte"
            | "astro" => Self::Script,
            "css" | "scss" | "sass" | "less" | "styl" | "stylus" => Self::Stylesheet,
            "json" => Self::Json,
            "html" | "htm" => Self::Html,
            _ => Self::Other,
        }
    }
}

/// A parsed GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    /// URL path without query string.
    pub path: String,
    /// The query carried an `import` marker.
    pub import: bool,
}

impl ModuleRequest {
    /// Build a request from a URL path and optional raw query string. A
    /// query left on `path` is split off and merged with `query`.
    #[must_use]
    pub fn parse(path: &str, query: Option<&str>) -> Self {
        let (path, inline_query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        let import = inline_query
            .into_iter()
            .chain(query)
            .flat_map(|q| q.split('&'))
            .any(|pair| pair == "import" || pair.starts_with("import="));
        Self {
            path: if path.is_empty() { "/" } else { path }.to_string(),
            import,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl ModuleResponse {
    #[must_use]
    pub fn ok(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn javascript(code: impl Into<Vec<u8>>) -> Self {
        Self::ok(JAVASCRIPT, code)
    }

    #[must_use]
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: message.into().into_bytes(),
        }
    }

    /// Body as text, lossily decoded.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("{source}")]
    Plugin {
        path: PathBuf,
        #[source]
        source: PluginError,
    },
}

impl PipelineError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Transform(_) | Self::Plugin { .. } => 500,
        }
    }

    /// Overlay message for failures worth showing in the browser.
    #[must_use]
    pub fn to_hmr_error(&self) -> Option<HmrMessage> {
        match self {
            Self::NotFound(_) => None,
            Self::Transform(e) => Some(HmrMessage::Error(ErrorPayload {
                message: e.message.clone(),
                stack: e.stack(),
                filename: Some(e.file.display().to_string()),
                frame: e.frame.clone(),
            })),
            Self::Plugin { path, source } => Some(HmrMessage::Error(ErrorPayload {
                message: source.to_string(),
                stack: format!("{source}\n    at {}", path.display()),
                filename: Some(path.display().to_string()),
                frame: None,
            })),
        }
    }
}

/// Where a request path led.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    Index,
    Virtual(VirtualModule),
    Package(PathBuf),
    Project(PathBuf),
    Public(PathBuf),
}

/// Everything a pipeline is assembled from.
pub struct PipelineParts {
    /// Canonical project root.
    pub root: PathBuf,
    pub framework: FrameworkTag,
    pub transformer: Arc<UniversalTransformer>,
    pub graph: Arc<dyn DependencyGraph>,
    pub plugins: PluginChain,
    pub rewriter: ImportRewriter,
    pub throttle: HmrThrottle,
    pub settings: SharedSettings,
}

pub struct ModulePipeline {
    root: PathBuf,
    public_dir: PathBuf,
    framework: FrameworkTag,
    transformer: Arc<UniversalTransformer>,
    graph: Arc<dyn DependencyGraph>,
    plugins: PluginChain,
    rewriter: ImportRewriter,
    throttle: HmrThrottle,
    settings: SharedSettings,
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// `path` after resolving symlinks, if it stays under `base`.
async fn contained(base: &Path, path: PathBuf) -> Option<PathBuf> {
    let real = tokio::fs::canonicalize(&path).await.ok()?;
    let base = tokio::fs::canonicalize(base)
        .await
        .map_or_else(|_| base.to_path_buf(), |b| dunce::simplified(&b).to_path_buf());
    dunce::simplified(&real).starts_with(&base).then_some(path)
}

fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

#[derive(Debug, Default, Deserialize)]
struct PackageEntry {
    module: Option<String>,
    main: Option<String>,
}

impl ModulePipeline {
    #[must_use]
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            public_dir: parts.root.join("public"),
            root: parts.root,
            framework: parts.framework,
            transformer: parts.transformer,
            graph: parts.graph,
            plugins: parts.plugins,
            rewriter: parts.rewriter,
            throttle: parts.throttle,
            settings: parts.settings,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn framework(&self) -> FrameworkTag {
        self.framework
    }

    #[must_use]
    pub fn transformer(&self) -> &Arc<UniversalTransformer> {
        &self.transformer
    }

    #[must_use]
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Serve a request, turning failures into error responses. Diagnostic
    /// failures are also broadcast to connected browsers.
    pub async fn respond(&self, request: &ModuleRequest) -> ModuleResponse {
        match self.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(message) = e.to_hmr_error() {
                    error!(path = %request.path, error = %e, "module failed");
                    self.throttle.broadcast(message);
                } else {
                    debug!(path = %request.path, "not found");
                }
                ModuleResponse::error(e.status(), e.to_string())
            }
        }
    }

    pub async fn handle(&self, request: &ModuleRequest) -> Result<ModuleResponse, PipelineError> {
        match self.resolve(&request.path).await? {
            Resolved::Index => self.serve_index().await,
            Resolved::Virtual(module) => Ok(ModuleResponse::javascript(
                module.render(&self.settings.snapshot(), &self.rewriter),
            )),
            Resolved::Package(path) => self.serve_package_file(&path, request).await,
            Resolved::Public(path) => {
                let bytes = read_bytes(&path, &request.path).await?;
                Ok(ModuleResponse::ok(content_type_for(&path), bytes))
            }
            Resolved::Project(path) => self.serve_project_file(&path, request).await,
        }
    }

    async fn resolve(&self, url_path: &str) -> Result<Resolved, PipelineError> {
        let not_found = || PipelineError::NotFound(url_path.to_string());
        if url_path.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(not_found());
        }
        if url_path == "/" || url_path == "/index.html" {
            return Ok(Resolved::Index);
        }
        if let Some(module) = VirtualModule::from_path(url_path) {
            return Ok(Resolved::Virtual(module));
        }
        if let Some(file) = url_path.strip_prefix(deps::DEPS_PREFIX) {
            let dir = deps::deps_dir(&self.root);
            let path = dir.join(file);
            if is_file(&path).await {
                if let Some(path) = contained(&dir, path).await {
                    return Ok(Resolved::Package(path));
                }
            }
            return Err(not_found());
        }
        if let Some(specifier) = url_path.strip_prefix("/node_modules/") {
            return self
                .resolve_store(specifier)
                .await
                .map(Resolved::Package)
                .ok_or_else(not_found);
        }

        let rel = url_path.trim_start_matches('/');
        if let Some(path) = Self::lookup(&self.root, rel).await {
            return Ok(Resolved::Project(path));
        }
        if let Some(path) = Self::lookup(&self.public_dir, rel).await {
            return Ok(Resolved::Public(path));
        }
        Err(not_found())
    }

    /// Exact file, then alternate extensions, then `index.*` inside a
    /// directory.
    async fn lookup(base: &Path, rel: &str) -> Option<PathBuf> {
        let candidate = base.join(rel);
        let found = if is_file(&candidate).await {
            Some(candidate)
        } else {
            let mut found = None;
            for ext in ALTERNATE_EXTENSIONS {
                let with_ext = with_suffix(&candidate, ext);
                if is_file(&with_ext).await {
                    found = Some(with_ext);
                    break;
                }
            }
            if found.is_none() && !rel.is_empty() && is_dir(&candidate).await {
                for ext in ALTERNATE_EXTENSIONS {
                    let index = candidate.join(format!("index{ext}"));
                    if is_file(&index).await {
                        found = Some(index);
                        break;
                    }
                }
            }
            found
        }?;
        contained(base, found).await
    }

    /// Package store lookup: file, file + `.js`, or a package directory via
    /// its `package.json` entry (`module`, then `main`, then `index.js`).
    async fn resolve_store(&self, specifier: &str) -> Option<PathBuf> {
        let store = self.root.join("node_modules");
        let base = store.join(specifier);

        let found = if is_file(&base).await {
            Some(base)
        } else if is_file(&with_suffix(&base, ".js")).await {
            Some(with_suffix(&base, ".js"))
        } else if is_dir(&base).await {
            let manifest = tokio::fs::read_to_string(base.join("package.json"))
                .await
                .ok()
                .and_then(|text| serde_json::from_str::<PackageEntry>(&text).ok())
                .unwrap_or_default();
            let entry = manifest
                .module
                .or(manifest.main)
                .unwrap_or_else(|| "index.js".to_string());
            let entry = base.join(entry.trim_start_matches("./"));
            if is_file(&entry).await {
                Some(entry)
            } else if is_file(&with_suffix(&entry, ".js")).await {
                Some(with_suffix(&entry, ".js"))
            } else if is_file(&entry.join("index.js")).await {
                Some(entry.join("index.js"))
            } else {
                None
            }
        } else {
            None
        }?;
        contained(&store, found).await
    }

    async fn serve_index(&self) -> Result<ModuleResponse, PipelineError> {
        for candidate in [self.root.join("index.html"), self.public_dir.join("index.html")] {
            if let Ok(html) = tokio::fs::read_to_string(&candidate).await {
                return Ok(ModuleResponse::ok(
                    "text/html",
                    virtual_modules::inject_client(&html),
                ));
            }
        }
        let entry = self.settings.snapshot().entry;
        Ok(ModuleResponse::ok(
            "text/html",
            virtual_modules::index_template(&entry),
        ))
    }

    async fn serve_project_file(
        &self,
        path: &Path,
        request: &ModuleRequest,
    ) -> Result<ModuleResponse, PipelineError> {
        match FileKind::of(path) {
            FileKind::Script => self.serve_script(path, request).await,
            FileKind::Stylesheet => {
                let raw = read_text(path, &request.path).await?;
                let css = self.run_plugins(raw, path)?;
                Ok(stylesheet_response(&css, request))
            }
            FileKind::Json => {
                let raw = read_text(path, &request.path).await?;
                Ok(json_response(raw, request))
            }
            FileKind::Html => {
                let html = read_text(path, &request.path).await?;
                Ok(ModuleResponse::ok(
                    "text/html",
                    virtual_modules::inject_client(&html),
                ))
            }
            FileKind::Other if request.import => Ok(ModuleResponse::javascript(format!(
                "export default {};\n",
                js_string(&request.path)
            ))),
            FileKind::Other => {
                let bytes = read_bytes(path, &request.path).await?;
                Ok(ModuleResponse::ok(content_type_for(path), bytes))
            }
        }
    }

    async fn serve_script(
        &self,
        path: &Path,
        request: &ModuleRequest,
    ) -> Result<ModuleResponse, PipelineError> {
        // Taken before the read: an edit that clears the cache after this
        // point keeps the old text's output from being stored.
        let ticket = self.transformer.cache_ticket(path);
        let source = read_text(path, &request.path).await?;
        self.graph.ingest(path, &source).await;
        let source = self.run_plugins(source, path)?;

        let transformed = self
            .transformer
            .transform(&TransformRequest::new(path, source, self.framework).with_ticket(ticket))
            .await?;
        let code = self.rewriter.rewrite(&transformed.code);
        Ok(ModuleResponse::javascript(prepend_line(
            &code,
            &format!("import \"{}\";", virtual_modules::ENV_URL),
        )))
    }

    async fn serve_package_file(
        &self,
        path: &Path,
        request: &ModuleRequest,
    ) -> Result<ModuleResponse, PipelineError> {
        match FileKind::of(path) {
            FileKind::Script => {
                let code = read_text(path, &request.path).await?;
                Ok(ModuleResponse::javascript(self.rewriter.rewrite_bare(&code)))
            }
            FileKind::Stylesheet => {
                let css = read_text(path, &request.path).await?;
                Ok(stylesheet_response(&css, request))
            }
            FileKind::Json => {
                let raw = read_text(path, &request.path).await?;
                Ok(json_response(raw, request))
            }
            _ => {
                let bytes = read_bytes(path, &request.path).await?;
                Ok(ModuleResponse::ok(content_type_for(path), bytes))
            }
        }
    }

    fn run_plugins(&self, code: String, path: &Path) -> Result<String, PipelineError> {
        self.plugins
            .transform(code, path)
            .map_err(|source| PipelineError::Plugin {
                path: path.to_path_buf(),
                source,
            })
    }
}

async fn read_text(path: &Path, url_path: &str) -> Result<String, PipelineError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|_| PipelineError::NotFound(url_path.to_string()))
}

async fn read_bytes(path: &Path, url_path: &str) -> Result<Vec<u8>, PipelineError> {
    tokio::fs::read(path)
        .await
        .map_err(|_| PipelineError::NotFound(url_path.to_string()))
}

fn content_type_for(path: &Path) -> String {
    match FileKind::of(path) {
        FileKind::Script => JAVASCRIPT.to_string(),
        FileKind::Stylesheet => "text/css".to_string(),
        FileKind::Json => "application/json".to_string(),
        FileKind::Html => "text/html".to_string(),
        FileKind::Other => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Stylesheet as CSS, or as a module that installs it when imported.
fn stylesheet_response(css: &str, request: &ModuleRequest) -> ModuleResponse {
    if !request.import {
        return ModuleResponse::ok("text/css", css);
    }
    let id = js_string(&request.path);
    let text = js_string(css);
    ModuleResponse::javascript(format!(
        "const css = {text};\nlet style = document.querySelector('style[data-kiln-css=' + JSON.stringify({id}) + ']');\nif (!style) {{\n  style = document.createElement('style');\n  style.setAttribute('data-kiln-css', {id});\n  document.head.appendChild(style);\n}}\nstyle.textContent = css;\nexport default css;\n"
    ))
}

fn json_response(raw: String, request: &ModuleRequest) -> ModuleResponse {
    if request.import {
        ModuleResponse::javascript(format!("export default {};\n", raw.trim_end()))
    } else {
        ModuleResponse::ok("application/json", raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Capabilities;
    use crate::config::RuntimeSettings;
    use crate::framework::PackageVersions;
    use crate::graph::ImportGraph;
    use crate::hmr::ThrottleConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        graph: Arc<ImportGraph>,
        throttle: HmrThrottle,
        settings: SharedSettings,
        events: mpsc::Receiver<String>,
        pipeline: ModulePipeline,
    }

    impl Fixture {
        async fn new(files: &[(&str, &str)]) -> Self {
            Self::with_framework(files, FrameworkTag::Vanilla).await
        }

        async fn with_framework(files: &[(&str, &str)], framework: FrameworkTag) -> Self {
            Self::build(files, framework, Vec::new()).await
        }

        async fn build(
            files: &[(&str, &str)],
            framework: FrameworkTag,
            extra_plugins: Vec<Box<dyn SourcePlugin>>,
        ) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dunce::canonicalize(dir.path()).unwrap();
            for (rel, content) in files {
                let path = root.join(rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, content).unwrap();
            }

            let (throttle, _task) = HmrThrottle::spawn(ThrottleConfig::default());
            let (tx, events) = mpsc::channel(16);
            throttle.register_client(tx);

            let settings = SharedSettings::new(RuntimeSettings {
                entry: "src/main.ts".to_string(),
                mode: "development".to_string(),
                ..RuntimeSettings::default()
            });
            let graph = Arc::new(ImportGraph::new(&root));
            let transformer = Arc::new(UniversalTransformer::with_capabilities(
                Arc::new(PackageVersions::new(&root)),
                Capabilities::probe(),
            ));
            let deps = DepsManifest::load(&root).await;
            let mut plugins = PluginChain::builtin(&[], &settings);
            for plugin in extra_plugins {
                plugins.add(plugin);
            }
            let pipeline = ModulePipeline::new(PipelineParts {
                root: root.clone(),
                framework,
                transformer,
                graph: graph.clone(),
                plugins,
                rewriter: ImportRewriter::new(Arc::new(deps), "tok"),
                throttle: throttle.clone(),
                settings: settings.clone(),
            });
            Self {
                _dir: dir,
                root,
                graph,
                throttle,
                settings,
                events,
                pipeline,
            }
        }

        async fn get(&self, url: &str) -> ModuleResponse {
            self.pipeline.respond(&ModuleRequest::parse(url, None)).await
        }

        /// Next broadcast after `connected`, fenced by a sentinel so a
        /// missing broadcast shows up as the sentinel.
        async fn next_broadcast(&mut self) -> HmrMessage {
            self.throttle.broadcast(HmrMessage::Restarting);
            loop {
                let text = self.events.recv().await.expect("throttle running");
                let message: HmrMessage = serde_json::from_str(&text).unwrap();
                if message != HmrMessage::Connected {
                    return message;
                }
            }
        }
    }

    /// Rewrites the file and evicts it while a request sits between its
    /// read and its transform, once.
    struct EditMidRequest {
        replacement: &'static str,
        transformer: Arc<OnceLock<Arc<UniversalTransformer>>>,
        done: AtomicBool,
    }

    impl SourcePlugin for EditMidRequest {
        fn name(&self) -> &'static str {
            "edit-mid-request"
        }

        fn transform(&self, _code: &str, path: &Path) -> Result<Option<String>, PluginError> {
            if !self.done.swap(true, Ordering::SeqCst) {
                std::fs::write(path, self.replacement).unwrap();
                if let Some(transformer) = self.transformer.get() {
                    transformer.clear_cache(Some(path));
                }
            }
            Ok(None)
        }
    }

    const MAIN: &str = "import { x } from './util';\nimport React from 'react';\nconst n: number = x;\nexport default n;\n";

    #[test]
    fn test_request_parse() {
        assert!(ModuleRequest::parse("/a.css", Some("import")).import);
        assert!(ModuleRequest::parse("/a.css?t=1&import", None).import);
        assert!(!ModuleRequest::parse("/a.css", Some("important=1")).import);
        let request = ModuleRequest::parse("/a.css?import", None);
        assert_eq!(request.path, "/a.css");
        assert_eq!(ModuleRequest::parse("", None).path, "/");
    }

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::of(Path::new("a/App.TSX")), FileKind::Script);
        assert_eq!(FileKind::of(Path::new("a.vue")), FileKind::Script);
        assert_eq!(FileKind::of(Path::new("a.less")), FileKind::Stylesheet);
        assert_eq!(FileKind::of(Path::new("a.json")), FileKind::Json);
        assert_eq!(FileKind::of(Path::new("a.png")), FileKind::Other);
    }

    #[tokio::test]
    async fn test_script_is_transformed_and_rewritten() {
        let fx = Fixture::new(&[
            ("src/main.ts", MAIN),
            ("src/util.ts", "export const x: number = 1;\n"),
        ])
        .await;

        let response = fx.get("/src/main.ts").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/javascript");
        let body = response.text();
        assert!(body.starts_with("import \"/@kiln/env\";"));
        assert!(body.contains("/node_modules/react"));
        assert!(body.contains("./util"));
        assert!(!body.contains(": number"));

        let main = fx.root.join("src/main.ts");
        assert_eq!(fx.graph.imports_of(&main), vec![fx.root.join("src/util.ts")]);
    }

    #[tokio::test]
    async fn test_repeat_request_is_a_cache_hit() {
        let fx = Fixture::with_framework(
            &[("src/App.tsx", "export const App = (n: number) => n;\n")],
            FrameworkTag::React,
        )
        .await;

        let first = fx.get("/src/App.tsx").await;
        let second = fx.get("/src/App.tsx").await;
        assert_eq!(first.status, 200);
        assert_eq!(first.body, second.body);
        assert!(!first.text().contains(": number"));

        let stats = fx.pipeline.transformer().cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_edit_during_request_is_not_served_from_cache() {
        let slot = Arc::new(OnceLock::new());
        let plugin = EditMidRequest {
            replacement: "export const v = 2;\n",
            transformer: slot.clone(),
            done: AtomicBool::new(false),
        };
        let fx = Fixture::build(
            &[("src/v.js", "export const v = 1;\n")],
            FrameworkTag::Vanilla,
            vec![Box::new(plugin)],
        )
        .await;
        assert!(slot.set(fx.pipeline.transformer().clone()).is_ok());

        // Same length before and after, so only the ticket tells them apart.
        assert!(fx.get("/src/v.js").await.text().contains("v = 1"));
        assert!(fx.get("/src/v.js").await.text().contains("v = 2"));
    }

    #[tokio::test]
    async fn test_env_import_gets_its_own_line() {
        let fx = Fixture::new(&[("src/a.js", "export const a = 1;\n")]).await;
        let body = fx.get("/src/a.js").await.text();
        assert!(body.starts_with("import \"/@kiln/env\";\nexport const a"));
    }

    #[tokio::test]
    async fn test_failing_adapter_still_serves() {
        let source = "<template><p>never closed";
        let fx = Fixture::with_framework(&[("src/Broken.vue", source)], FrameworkTag::Vue).await;

        let response = fx.get("/src/Broken.vue").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/javascript");
        assert!(response.text().ends_with(source));
    }

    #[tokio::test]
    async fn test_alternate_extensions_and_index_files() {
        let fx = Fixture::new(&[
            ("src/util.ts", "export const x = 1;\n"),
            ("src/components/index.jsx", "export const Button = 1;\n"),
        ])
        .await;

        assert_eq!(fx.get("/src/util").await.status, 200);
        let response = fx.get("/src/components").await;
        assert_eq!(response.status, 200);
        assert!(response.text().contains("Button"));
    }

    #[tokio::test]
    async fn test_stylesheet_wrapper_carries_exact_text() {
        let css = "body { content: \"a\\\"b\"; }\n";
        let fx = Fixture::new(&[("src/a.css", css)]).await;

        let raw = fx.get("/src/a.css").await;
        assert_eq!(raw.content_type, "text/css");
        assert_eq!(raw.text(), css);

        let module = fx.get("/src/a.css?import").await;
        assert_eq!(module.content_type, "application/javascript");
        let body = module.text();
        assert!(body.contains(&format!("const css = {};", serde_json::to_string(css).unwrap())));
        assert!(body.contains("document.createElement('style')"));
        assert!(body.contains("document.head.appendChild(style)"));
        assert!(body.contains("export default css;"));
    }

    #[tokio::test]
    async fn test_json_and_assets() {
        let fx = Fixture::new(&[
            ("src/data.json", "{\"a\": 1}\n"),
            ("src/logo.png", "\u{89}PNG"),
            ("public/robots.txt", "User-agent: *\n"),
        ])
        .await;

        assert_eq!(fx.get("/src/data.json").await.content_type, "application/json");
        assert_eq!(
            fx.get("/src/data.json?import").await.text(),
            "export default {\"a\": 1};\n"
        );
        assert_eq!(
            fx.get("/src/logo.png?import").await.text(),
            "export default \"/src/logo.png\";\n"
        );
        assert_eq!(fx.get("/src/logo.png").await.content_type, "image/png");

        let robots = fx.get("/robots.txt").await;
        assert_eq!(robots.status, 200);
        assert_eq!(robots.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_traversal_and_missing_are_quiet_404s() {
        let mut fx = Fixture::new(&[("src/main.ts", MAIN)]).await;

        assert_eq!(fx.get("/../secret").await.status, 404);
        assert_eq!(fx.get("/src/../../etc/passwd").await.status, 404);
        assert_eq!(fx.get("/src/missing.ts").await.status, 404);
        assert_eq!(fx.next_broadcast().await, HmrMessage::Restarting);
    }

    #[tokio::test]
    async fn test_plugin_failure_is_500_and_broadcast() {
        let mut fx = Fixture::new(&[("src/main.ts", MAIN)]).await;
        let mut settings = fx.settings.snapshot();
        settings
            .define
            .insert("__X__".to_string(), "a\nb".to_string());
        fx.settings.replace(settings);

        let response = fx.get("/src/main.ts").await;
        assert_eq!(response.status, 500);
        assert!(response.text().contains("[define]"));

        let HmrMessage::Error(payload) = fx.next_broadcast().await else {
            panic!("expected error broadcast");
        };
        assert!(payload.filename.unwrap().ends_with("main.ts"));

        // The server keeps serving other files.
        fx.settings.replace(RuntimeSettings::default());
        assert_eq!(fx.get("/src/main.ts").await.status, 200);
    }

    #[cfg(feature = "swc")]
    #[tokio::test]
    async fn test_syntax_error_is_500_with_frame() {
        let mut fx = Fixture::new(&[(
            "src/App.tsx",
            "export const App = () => {\n  return <div>;\n};\n",
        )])
        .await;

        assert_eq!(fx.get("/src/App.tsx").await.status, 500);
        let HmrMessage::Error(payload) = fx.next_broadcast().await else {
            panic!("expected error broadcast");
        };
        assert!(payload.frame.is_some());
        assert!(payload.stack.contains("App.tsx"));
    }

    #[tokio::test]
    async fn test_virtual_endpoints() {
        let fx = Fixture::new(&[]).await;

        assert!(fx.get("/@kiln/client").await.text().contains("/__kiln_hmr"));
        assert!(fx
            .get("/@kiln/error-overlay.js")
            .await
            .text()
            .contains("showErrorOverlay"));
        assert!(fx
            .get("/@kiln/react-dom-client")
            .await
            .text()
            .contains("export const createRoot"));
        assert!(fx.get("/@kiln/env").await.text().contains("g.process.env"));
    }

    #[tokio::test]
    async fn test_index_page() {
        let fx = Fixture::new(&[]).await;
        let page = fx.get("/").await;
        assert_eq!(page.content_type, "text/html");
        assert!(page.text().contains("src=\"/src/main.ts\""));
        assert!(page.text().contains("/@kiln/client"));

        let fx = Fixture::new(&[("index.html", "<html><head></head><body>mine</body></html>")]).await;
        let page = fx.get("/").await.text();
        assert!(page.contains("mine"));
        assert!(page.contains("/@kiln/client"));
    }

    #[tokio::test]
    async fn test_package_store() {
        let fx = Fixture::new(&[
            ("node_modules/lib/package.json", "{\"module\": \"./esm/index.js\"}"),
            (
                "node_modules/lib/esm/index.js",
                "import dep from 'dep';\nexport * from './x.js';\n",
            ),
            ("node_modules/lib/esm/x.js", "export const x = 1;\n"),
        ])
        .await;

        let entry = fx.get("/node_modules/lib").await;
        assert_eq!(entry.status, 200);
        let body = entry.text();
        assert!(body.contains("from '/node_modules/dep';"));
        assert!(body.contains("from './x.js';"));

        assert_eq!(fx.get("/node_modules/lib/esm/x").await.status, 200);
        assert_eq!(fx.get("/node_modules/nope").await.status, 404);
    }

    #[tokio::test]
    async fn test_prebundled_dependencies() {
        let fx = Fixture::new(&[
            ("node_modules/.kiln/_metadata.json", "{\"react\": \"react.js\"}"),
            ("node_modules/.kiln/react.js", "export default {};\n"),
            ("src/main.js", "import React from 'react';\n"),
        ])
        .await;

        assert_eq!(fx.get("/@kiln-deps/react.js").await.status, 200);
        assert!(fx
            .get("/src/main.js")
            .await
            .text()
            .contains("/@kiln-deps/react.js?v=tok"));
        assert!(fx
            .get("/@kiln/react")
            .await
            .text()
            .contains("/@kiln-deps/react.js?v=tok"));
    }
}
