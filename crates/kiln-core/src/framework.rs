//! Framework identification and installed-version probing.

use semver::Version;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Supported UI framework families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum FrameworkTag {
    React,
    Next,
    Remix,
    Preact,
    Solid,
    Vue,
    Nuxt,
    Svelte,
    Angular,
    Lit,
    Qwik,
    Astro,
    #[default]
    Vanilla,
}

impl FrameworkTag {
    pub const ALL: [FrameworkTag; 13] = [
        Self::React,
        Self::Next,
        Self::Remix,
        Self::Preact,
        Self::Solid,
        Self::Vue,
        Self::Nuxt,
        Self::Svelte,
        Self::Angular,
        Self::Lit,
        Self::Qwik,
        Self::Astro,
        Self::Vanilla,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Next => "next",
            Self::Remix => "remix",
            Self::Preact => "preact",
            Self::Solid => "solid",
            Self::Vue => "vue",
            Self::Nuxt => "nuxt",
            Self::Svelte => "svelte",
            Self::Angular => "angular",
            Self::Lit => "lit",
            Self::Qwik => "qwik",
            Self::Astro => "astro",
            Self::Vanilla => "vanilla",
        }
    }

    /// Lenient parse: unknown names map to [`FrameworkTag::Vanilla`].
    #[must_use]
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or(Self::Vanilla)
    }

    /// Package whose installed version selects version-dependent behavior.
    #[must_use]
    pub fn runtime_package(&self) -> Option<&'static str> {
        match self {
            Self::React | Self::Next | Self::Remix => Some("react"),
            Self::Preact => Some("preact"),
            Self::Solid => Some("solid-js"),
            Self::Vue | Self::Nuxt => Some("vue"),
            Self::Svelte => Some("svelte"),
            Self::Angular => Some("@angular/core"),
            Self::Lit => Some("lit"),
            Self::Qwik => Some("@builder.io/qwik"),
            Self::Astro => Some("astro"),
            Self::Vanilla => None,
        }
    }
}

impl fmt::Display for FrameworkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for framework names outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown framework: {0}")]
pub struct UnknownFramework(pub String);

impl FromStr for FrameworkTag {
    type Err = UnknownFramework;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == lower)
            .ok_or_else(|| UnknownFramework(s.to_string()))
    }
}

/// Detection order: meta-frameworks before the library they build on.
const DETECTION_ORDER: &[(&str, FrameworkTag)] = &[
    ("next", FrameworkTag::Next),
    ("@remix-run/react", FrameworkTag::Remix),
    ("nuxt", FrameworkTag::Nuxt),
    ("astro", FrameworkTag::Astro),
    ("@builder.io/qwik", FrameworkTag::Qwik),
    ("@angular/core", FrameworkTag::Angular),
    ("svelte", FrameworkTag::Svelte),
    ("solid-js", FrameworkTag::Solid),
    ("preact", FrameworkTag::Preact),
    ("lit", FrameworkTag::Lit),
    ("vue", FrameworkTag::Vue),
    ("react", FrameworkTag::React),
];

#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
}

/// Identify the project's framework from `package.json`.
///
/// Missing or unreadable metadata yields [`FrameworkTag::Vanilla`].
pub async fn detect_framework(root: &Path) -> FrameworkTag {
    let manifest_path = root.join("package.json");
    let manifest: PackageManifest = match tokio::fs::read_to_string(&manifest_path).await {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!(path = %manifest_path.display(), error = %e, "unparseable package.json");
                return FrameworkTag::Vanilla;
            }
        },
        Err(_) => return FrameworkTag::Vanilla,
    };

    DETECTION_ORDER
        .iter()
        .find(|(pkg, _)| {
            manifest.dependencies.contains_key(*pkg) || manifest.dev_dependencies.contains_key(*pkg)
        })
        .map_or(FrameworkTag::Vanilla, |(_, tag)| *tag)
}

/// Installed package versions under `node_modules`, read at most once per
/// package name.
///
/// Absence, unreadable metadata, or a read slower than the timeout are all
/// cached as `None`, so callers pick their most conservative code path and
/// never wait twice.
#[derive(Debug)]
pub struct PackageVersions {
    root: PathBuf,
    timeout: Duration,
    cache: Mutex<HashMap<String, Option<Version>>>,
}

impl PackageVersions {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_timeout(root, Self::DEFAULT_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Installed version of `name`, or `None` when it cannot be determined.
    pub async fn version(&self, name: &str) -> Option<Version> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(version) = cached {
            return version;
        }

        let version = self.read_version(name).await;
        debug!(package = name, version = ?version, "probed package version");
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), version.clone());
        version
    }

    /// Installed major version of `name`.
    pub async fn major(&self, name: &str) -> Option<u64> {
        self.version(name).await.map(|v| v.major)
    }

    async fn read_version(&self, name: &str) -> Option<Version> {
        let path = self
            .root
            .join("node_modules")
            .join(name)
            .join("package.json");
        let text = tokio::time::timeout(self.timeout, tokio::fs::read_to_string(&path))
            .await
            .ok()?
            .ok()?;
        let manifest: PackageManifest = serde_json::from_str(&text).ok()?;
        parse_version_lenient(manifest.version.as_deref()?)
    }
}

/// Parse a version string, accepting ranges and partial versions by their
/// leading numbers (`^18.2` → 18.2.0, `v3` → 3.0.0).
#[must_use]
pub fn parse_version_lenient(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }
    let digits = trimmed.trim_start_matches(|c: char| !c.is_ascii_digit());
    let mut parts = digits
        .split(|c: char| !c.is_ascii_digit())
        .take(3)
        .map(str::parse::<u64>);
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(Result::ok).unwrap_or(0);
    let patch = parts.next().and_then(Result::ok).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}
