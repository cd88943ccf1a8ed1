//! One running dev server: listener, throttle, pipeline and project watcher.

use crate::error::ServerError;
use crate::proxy::ProxyTable;
use crate::routes::{self, AppState};
use crate::watcher::ProjectWatcher;
use kiln_core::config::{RuntimeSettings, SharedSettings};
use kiln_core::framework::detect_framework;
use kiln_core::hmr::HmrMessage;
use kiln_core::pipeline::{DepsManifest, ImportRewriter, PipelineParts, PluginChain};
use kiln_core::{
    ChangeOrchestrator, FileChangeEvent, FrameworkTag, HmrThrottle, ImportGraph, KilnConfig,
    ModulePipeline, UniversalTransformer,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a graceful HTTP shutdown may take before the server task is
/// aborted.
pub const SERVER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the watcher-to-orchestrator channel.
const CHANGE_QUEUE: usize = 256;

pub struct DevInstance {
    config: KilnConfig,
    root: PathBuf,
    addr: SocketAddr,
    framework: FrameworkTag,
    throttle: HmrThrottle,
    throttle_task: JoinHandle<()>,
    settings: SharedSettings,
    transformer: Arc<UniversalTransformer>,
    shutdown_tx: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
    change_task: JoinHandle<()>,
    watcher: ProjectWatcher,
}

impl std::fmt::Debug for DevInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevInstance")
            .field("root", &self.root)
            .field("addr", &self.addr)
            .field("framework", &self.framework)
            .finish_non_exhaustive()
    }
}

impl DevInstance {
    /// Build the pipeline for `config`, bind the listener and start
    /// watching the project.
    pub async fn start(config: KilnConfig) -> Result<Self, ServerError> {
        let root = dunce::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        let framework = match config.framework_tag() {
            Some(tag) => tag,
            None => detect_framework(&root).await,
        };
        debug!(root = %root.display(), framework = %framework, "starting instance");

        let transformer = Arc::new(UniversalTransformer::new(&root));
        let graph = Arc::new(ImportGraph::new(&root));
        let (throttle, throttle_task) = HmrThrottle::spawn(config.hmr.throttle_config());
        let settings = SharedSettings::new(RuntimeSettings::from_config(&config));
        let deps = DepsManifest::load(&root).await;
        if !deps.is_empty() {
            info!(count = deps.len(), "using pre-bundled dependencies");
        }

        let pipeline = Arc::new(ModulePipeline::new(PipelineParts {
            root: root.clone(),
            framework,
            transformer: transformer.clone(),
            graph: graph.clone(),
            plugins: PluginChain::builtin(&config.plugins, &settings),
            rewriter: ImportRewriter::new(Arc::new(deps), cache_token()),
            throttle: throttle.clone(),
            settings: settings.clone(),
        }));

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;

        let proxy = ProxyTable::new(&config.proxy)?;
        if !proxy.is_empty() {
            info!(prefixes = ?config.proxy.keys().collect::<Vec<_>>(), "proxying");
        }
        let app = routes::router(AppState {
            pipeline,
            throttle: throttle.clone(),
            proxy: Arc::new(proxy),
            headers: Arc::new(routes::response_headers(&config.headers)),
            cors: config.cors,
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let (change_tx, mut change_rx) = mpsc::channel::<PathBuf>(CHANGE_QUEUE);
        let watcher = ProjectWatcher::start(&root, change_tx)?;
        let orchestrator =
            ChangeOrchestrator::new(root.clone(), graph, transformer.clone(), throttle.clone());
        let change_task = tokio::spawn(async move {
            while let Some(path) = change_rx.recv().await {
                let affected = orchestrator.on_change(FileChangeEvent::now(&path)).await;
                info!(
                    path = %orchestrator.url_path(&path),
                    affected = affected.len(),
                    "file changed"
                );
            }
        });

        info!(url = %format!("http://{addr}"), framework = %framework, "dev server listening");
        Ok(Self {
            config,
            root,
            addr,
            framework,
            throttle,
            throttle_task,
            settings,
            transformer,
            shutdown_tx,
            server,
            change_task,
            watcher,
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Browser-facing URL. A wildcard bind is reported as `localhost`.
    #[must_use]
    pub fn url(&self) -> String {
        if self.addr.ip().is_unspecified() || self.config.host == "localhost" {
            format!("http://localhost:{}", self.addr.port())
        } else {
            format!("http://{}", self.addr)
        }
    }

    #[must_use]
    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    #[must_use]
    pub fn framework(&self) -> FrameworkTag {
        self.framework
    }

    #[must_use]
    pub fn throttle(&self) -> &HmrThrottle {
        &self.throttle
    }

    /// Swap a hot-applicable config into the running instance. Cached
    /// transforms are dropped since `define` and env values are baked in.
    pub fn apply_hot(&mut self, config: KilnConfig) {
        self.settings.replace(RuntimeSettings::from_config(&config));
        self.transformer.clear_cache(None);
        self.throttle.broadcast(HmrMessage::FullReload { path: None });
        self.config = config;
    }

    /// Stop accepting connections, close every HMR socket, wait for the
    /// server task and drop the project watcher.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let Self {
            throttle,
            throttle_task,
            shutdown_tx,
            mut server,
            change_task,
            watcher,
            addr,
            ..
        } = self;

        let _ = shutdown_tx.send(());
        throttle.shutdown().await;

        let served = match tokio::time::timeout(SERVER_CLOSE_TIMEOUT, &mut server).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ServerError::Serve(e.to_string())),
            Ok(Err(e)) => Err(ServerError::Serve(e.to_string())),
            Err(_) => {
                warn!(%addr, timeout = ?SERVER_CLOSE_TIMEOUT, "graceful shutdown timed out, aborting");
                server.abort();
                Ok(())
            }
        };

        drop(watcher);
        change_task.abort();
        let _ = throttle_task.await;
        debug!(%addr, "instance stopped");
        served
    }
}

/// Cache-busting token appended to pre-bundled dependency URLs. Fixed for
/// the lifetime of one instance.
fn cache_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    format!("{millis:x}")
}
