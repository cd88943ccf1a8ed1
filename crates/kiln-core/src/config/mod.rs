//! Dev server configuration.
//!
//! Loaded from `kiln.config.json` in the project root (or an explicit path)
//! plus the mode's `.env` files. Unknown keys are ignored.
//!
//! ```json
//! {
//!   "port": 3000,
//!   "framework": "react",
//!   "proxy": { "/api": "http://localhost:8080" },
//!   "headers": { "Cross-Origin-Opener-Policy": "same-origin" },
//!   "define": { "__APP_VERSION__": "\"1.2.0\"" },
//!   "hmr": { "debounceMs": 30, "maxWaitMs": 200 }
//! }
//! ```

pub mod env;

use crate::framework::FrameworkTag;
use crate::hmr::ThrottleConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default config file name.
pub const CONFIG_FILE: &str = "kiln.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Live-update timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HmrOptions {
    pub debounce_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for HmrOptions {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            debounce_ms: defaults.debounce.as_millis() as u64,
            max_wait_ms: defaults.max_wait.as_millis() as u64,
        }
    }
}

impl HmrOptions {
    #[must_use]
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KilnConfig {
    /// Project root. Relative paths are resolved against the directory the
    /// config was loaded from.
    pub root: PathBuf,
    /// Entry module referenced by the generated index page.
    pub entry: String,
    pub mode: String,
    pub port: u16,
    pub host: String,
    pub open: bool,
    /// Framework name; detected from `package.json` when absent.
    pub framework: Option<String>,
    pub plugins: Vec<String>,
    /// Path prefix to upstream origin. Matching requests are forwarded with
    /// their full path and query.
    pub proxy: BTreeMap<String, String>,
    /// Extra headers set on every HTTP response.
    pub headers: BTreeMap<String, String>,
    /// Answer cross-origin requests permissively.
    pub cors: bool,
    /// Identifier to replacement text, applied to served scripts.
    pub define: BTreeMap<String, String>,
    /// Config-file variables merged with the mode's `.env` files.
    pub env: BTreeMap<String, String>,
    pub hmr: HmrOptions,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            entry: "src/main.tsx".to_string(),
            mode: "development".to_string(),
            port: 5173,
            host: "localhost".to_string(),
            open: false,
            framework: None,
            plugins: Vec::new(),
            proxy: BTreeMap::new(),
            headers: BTreeMap::new(),
            cors: true,
            define: BTreeMap::new(),
            env: BTreeMap::new(),
            hmr: HmrOptions::default(),
        }
    }
}

/// Values from the command line. They win over the config file and are
/// re-applied every time the config is reloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: bool,
    pub framework: Option<String>,
    pub mode: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut KilnConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if self.open {
            config.open = true;
        }
        if let Some(framework) = &self.framework {
            config.framework = Some(framework.clone());
        }
        if let Some(mode) = &self.mode {
            config.mode.clone_from(mode);
        }
    }
}

/// Outcome of comparing two loaded configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Unchanged,
    /// Applied to the running instance.
    Hot,
    /// Needs a new instance.
    Restart,
}

impl KilnConfig {
    /// Config file `load` reads for `root`.
    #[must_use]
    pub fn config_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => root.join(p),
            None => root.join(CONFIG_FILE),
        }
    }

    /// Load the config for the project in `root`.
    ///
    /// A missing default config file yields defaults; a missing explicit one
    /// is an error. Overrides are applied before env files are read, so a
    /// `--mode` flag picks the matching `.env.<mode>` files. Env files are
    /// read from the resolved project root, which the config may move.
    pub async fn load(
        root: &Path,
        explicit: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let path = Self::config_path(root, explicit);
        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str::<Self>(&text)
                .map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if explicit.is_some() {
                    return Err(ConfigError::NotFound { path });
                }
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        config.root = if config.root.as_os_str().is_empty() {
            root.to_path_buf()
        } else if config.root.is_absolute() {
            config.root.clone()
        } else {
            root.join(&config.root)
        };
        overrides.apply(&mut config);

        let file_env = env::load_env_files(&config.root, &config.mode).await;
        config.env.extend(file_env);
        Ok(config)
    }

    /// Framework forced by config, if any.
    #[must_use]
    pub fn framework_tag(&self) -> Option<FrameworkTag> {
        self.framework.as_deref().map(FrameworkTag::parse_lenient)
    }

    /// Files whose change may alter this config: the config file found from
    /// `root`, plus the mode's env files under the resolved project root.
    #[must_use]
    pub fn watched_files(&self, root: &Path, explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut files = vec![Self::config_path(root, explicit)];
        files.extend(env::env_files(&self.root, &self.mode));
        files
    }

    /// Decide how a running instance absorbs the move from `old` to `new`.
    #[must_use]
    pub fn classify(old: &Self, new: &Self) -> ConfigChange {
        if old == new {
            return ConfigChange::Unchanged;
        }
        let needs_restart = old.port != new.port
            || old.host != new.host
            || old.plugins != new.plugins
            || old.proxy != new.proxy
            || old.headers != new.headers
            || old.cors != new.cors
            || old.root != new.root
            || old.framework != new.framework
            || old.hmr != new.hmr;
        if needs_restart {
            ConfigChange::Restart
        } else {
            ConfigChange::Hot
        }
    }
}

/// Settings a running instance reads per request. Swapped in place by a
/// hot config change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub entry: String,
    pub mode: String,
    /// Public environment (`NODE_ENV` plus prefixed keys).
    pub env: BTreeMap<String, String>,
    pub define: BTreeMap<String, String>,
}

impl RuntimeSettings {
    #[must_use]
    pub fn from_config(config: &KilnConfig) -> Self {
        Self {
            entry: config.entry.clone(),
            mode: config.mode.clone(),
            env: env::public_env(&config.env),
            define: config.define.clone(),
        }
    }
}

/// Shared handle to the live [`RuntimeSettings`].
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<RwLock<RuntimeSettings>>);

impl SharedSettings {
    #[must_use]
    pub fn new(settings: RuntimeSettings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    /// Copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSettings {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn replace(&self, settings: RuntimeSettings) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = KilnConfig::load(dir.path(), None, &Overrides::default())
            .await
            .unwrap();
        assert_eq!(config.port, 5173);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.root, dir.path());
        assert_eq!(config.hmr.throttle_config(), ThrottleConfig::default());
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = KilnConfig::load(
            dir.path(),
            Some(Path::new("custom.json")),
            &Overrides::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_parse_and_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"port": 3000, "framework": "vue", "define": {"__V__": "1"}, "unknown": true}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(".env.test"), "KILN_FLAG=on\n").unwrap();

        let overrides = Overrides {
            port: Some(4000),
            mode: Some("test".to_string()),
            ..Overrides::default()
        };
        let config = KilnConfig::load(dir.path(), None, &overrides).await.unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.framework_tag(), Some(FrameworkTag::Vue));
        assert_eq!(config.define["__V__"], "1");
        assert_eq!(config.env["KILN_FLAG"], "on");
    }

    #[tokio::test]
    async fn test_invalid_json_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ port: ").unwrap();
        let err = KilnConfig::load(dir.path(), None, &Overrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_classify() {
        let base = KilnConfig::default();
        assert_eq!(KilnConfig::classify(&base, &base), ConfigChange::Unchanged);

        let mut hot = base.clone();
        hot.define.insert("__A__".to_string(), "1".to_string());
        hot.env.insert("KILN_X".to_string(), "y".to_string());
        hot.open = true;
        assert_eq!(KilnConfig::classify(&base, &hot), ConfigChange::Hot);

        let changes: [fn(&mut KilnConfig); 8] = [
            |c: &mut KilnConfig| c.port = 9999,
            |c: &mut KilnConfig| c.host = "0.0.0.0".to_string(),
            |c: &mut KilnConfig| c.plugins.push("tailwind".to_string()),
            |c: &mut KilnConfig| {
                c.proxy.insert("/api".to_string(), "http://x".to_string());
            },
            |c: &mut KilnConfig| {
                c.headers.insert("X-Frame-Options".to_string(), "DENY".to_string());
            },
            |c: &mut KilnConfig| c.cors = false,
            |c: &mut KilnConfig| c.framework = Some("react".to_string()),
            |c: &mut KilnConfig| c.hmr.debounce_ms = 50,
        ];
        for change in changes {
            let mut next = hot.clone();
            change(&mut next);
            assert_eq!(KilnConfig::classify(&base, &next), ConfigChange::Restart);
        }
    }

    #[test]
    fn test_watched_files() {
        let config = KilnConfig {
            root: PathBuf::from("/p"),
            ..KilnConfig::default()
        };
        let files = config.watched_files(Path::new("/p"), None);
        assert_eq!(files[0], Path::new("/p/kiln.config.json"));
        assert!(files.contains(&PathBuf::from("/p/.env.development.local")));
        assert_eq!(files.len(), 5);
    }

    #[tokio::test]
    async fn test_env_files_follow_configured_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("web")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"root": "web"}"#).unwrap();
        std::fs::write(dir.path().join(".env"), "KILN_WHERE=outer\n").unwrap();
        std::fs::write(dir.path().join("web/.env"), "KILN_WHERE=web\n").unwrap();

        let config = KilnConfig::load(dir.path(), None, &Overrides::default())
            .await
            .unwrap();
        assert_eq!(config.root, dir.path().join("web"));
        assert_eq!(config.env["KILN_WHERE"], "web");

        let files = config.watched_files(dir.path(), None);
        assert_eq!(files[0], dir.path().join(CONFIG_FILE));
        assert!(files.contains(&dir.path().join("web/.env")));
        assert!(!files.contains(&dir.path().join(".env")));
    }

    #[test]
    fn test_shared_settings_swap() {
        let shared = SharedSettings::new(RuntimeSettings::default());
        let reader = shared.clone();
        shared.replace(RuntimeSettings {
            mode: "test".to_string(),
            ..RuntimeSettings::default()
        });
        assert_eq!(reader.snapshot().mode, "test");
    }
}
