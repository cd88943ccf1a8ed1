//! Restart supervisor.
//!
//! ```text
//! Starting → Running ─┬─ hot config change → Running
//!                     ├─ restart-class change → Restarting → Stopped → Starting
//!                     └─ shutdown → Stopped
//! ```
//!
//! An instance is fully torn down before the next one binds. When a
//! restarted instance fails to start, the last config that served is
//! brought back; if that fails too the supervisor idles in `Stopped` until
//! the config changes again.

use crate::error::ServerError;
use crate::instance::DevInstance;
use crate::watcher::ConfigWatcher;
use kiln_core::config::Overrides;
use kiln_core::{ConfigChange, HmrMessage, KilnConfig};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Time given to browsers to receive `restarting` before sockets close.
pub const RESTART_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Restarting,
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Project root; config and env files are looked up here.
    pub root: PathBuf,
    /// Explicit config file, relative to `root` unless absolute.
    pub config_path: Option<PathBuf>,
    /// Command-line overrides, re-applied on every reload.
    pub overrides: Overrides,
}

pub struct Supervisor {
    options: SupervisorOptions,
    lifecycle: watch::Sender<Lifecycle>,
    addr: watch::Sender<Option<std::net::SocketAddr>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            lifecycle: watch::channel(Lifecycle::Stopped).0,
            addr: watch::channel(None).0,
        }
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Observe the address of the running instance.
    #[must_use]
    pub fn address(&self) -> watch::Receiver<Option<std::net::SocketAddr>> {
        self.addr.subscribe()
    }

    fn set(&self, state: Lifecycle) {
        debug!(?state, "lifecycle");
        self.lifecycle.send_replace(state);
    }

    async fn load(&self) -> Result<KilnConfig, ServerError> {
        Ok(KilnConfig::load(
            &self.options.root,
            self.options.config_path.as_deref(),
            &self.options.overrides,
        )
        .await?)
    }

    fn watch_config(
        &self,
        config: &KilnConfig,
        tx: mpsc::Sender<()>,
    ) -> Result<ConfigWatcher, ServerError> {
        let files = config.watched_files(&self.options.root, self.options.config_path.as_deref());
        ConfigWatcher::start(&files, tx)
    }

    /// Block until the loaded config differs from `current`. `None` means
    /// `shutdown` resolved first.
    async fn wait_for_config_change<F: Future<Output = ()>>(
        &self,
        current: &KilnConfig,
        shutdown: &mut Pin<&mut F>,
    ) -> Result<Option<KilnConfig>, ServerError> {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let _watcher = self.watch_config(current, tx)?;
        loop {
            tokio::select! {
                () = shutdown.as_mut() => return Ok(None),
                Some(()) = rx.recv() => match self.load().await {
                    Ok(new) if new != *current => return Ok(Some(new)),
                    Ok(_) => debug!("config inputs touched, no change"),
                    Err(e) => warn!(error = %e, "config reload failed"),
                },
            }
        }
    }

    /// Serve until `shutdown` resolves. Returns `Err` when the initial
    /// config cannot be loaded, the first instance cannot start, or a
    /// teardown fails; the caller decides whether to exit.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tokio::pin!(shutdown);
        let mut config = self.load().await?;
        let mut last_good: Option<KilnConfig> = None;
        let mut first_start = true;

        loop {
            self.set(Lifecycle::Starting);
            let mut instance = match DevInstance::start(config.clone()).await {
                Ok(instance) => instance,
                Err(e) => {
                    self.set(Lifecycle::Stopped);
                    let Some(good) = last_good.clone() else {
                        return Err(e);
                    };
                    if good != config {
                        error!(error = %e, "server failed to start with the new config, restoring the previous one");
                        config = good;
                        continue;
                    }
                    error!(error = %e, "server failed to start, waiting for a config change");
                    match self.wait_for_config_change(&config, &mut shutdown).await? {
                        Some(new) => {
                            config = new;
                            continue;
                        }
                        None => {
                            info!("shutting down");
                            return Ok(());
                        }
                    }
                }
            };
            last_good = Some(config.clone());
            self.addr.send_replace(Some(instance.addr()));
            if first_start && config.open {
                if let Err(e) = open_browser(&instance.url()) {
                    warn!(error = %e, "failed to open browser");
                }
            }
            first_start = false;

            let (config_tx, mut config_rx) = mpsc::channel::<()>(1);
            let mut watched_mode = config.mode.clone();
            let mut config_watcher = match self.watch_config(&config, config_tx.clone()) {
                Ok(watcher) => watcher,
                Err(e) => {
                    self.teardown(instance).await?;
                    return Err(e);
                }
            };
            self.set(Lifecycle::Running);

            let next = loop {
                tokio::select! {
                    () = &mut shutdown => break None,
                    Some(()) = config_rx.recv() => {
                        let new = match self.load().await {
                            Ok(new) => new,
                            Err(e) => {
                                warn!(error = %e, "config reload failed, keeping current config");
                                continue;
                            }
                        };
                        match KilnConfig::classify(&config, &new) {
                            ConfigChange::Unchanged => debug!("config inputs touched, no change"),
                            ConfigChange::Hot => {
                                info!("config changed, applying without restart");
                                config = new.clone();
                                instance.apply_hot(new);
                                if config.mode != watched_mode {
                                    match self.watch_config(&config, config_tx.clone()) {
                                        Ok(watcher) => {
                                            config_watcher = watcher;
                                            watched_mode = config.mode.clone();
                                        }
                                        Err(e) => warn!(error = %e, "failed to watch env files for new mode"),
                                    }
                                }
                            }
                            ConfigChange::Restart => break Some(new),
                        }
                    }
                }
            };
            drop(config_watcher);

            match next {
                Some(new) => {
                    info!("config changed, restarting server");
                    self.set(Lifecycle::Restarting);
                    instance.throttle().broadcast(HmrMessage::Restarting);
                    tokio::time::sleep(RESTART_GRACE).await;
                    self.teardown(instance).await?;
                    config = new;
                }
                None => {
                    info!("shutting down");
                    return self.teardown(instance).await;
                }
            }
        }
    }

    async fn teardown(&self, instance: DevInstance) -> Result<(), ServerError> {
        let addr = instance.addr();
        let result = instance.shutdown().await;
        self.addr.send_replace(None);
        self.set(Lifecycle::Stopped);
        if let Err(e) = &result {
            error!(%addr, error = %e, "instance teardown failed");
        }
        result
    }
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}
