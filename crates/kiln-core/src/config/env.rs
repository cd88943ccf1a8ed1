//! `.env` file loading and the public environment exposed to client code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Prefixes of variables exposed to the browser.
pub const PUBLIC_PREFIXES: &[&str] = &["KILN_", "PUBLIC_"];

/// Env files for `mode`, lowest precedence first:
/// `.env`, `.env.local`, `.env.<mode>`, `.env.<mode>.local`.
#[must_use]
pub fn env_files(root: &Path, mode: &str) -> [PathBuf; 4] {
    [
        root.join(".env"),
        root.join(".env.local"),
        root.join(format!(".env.{mode}")),
        root.join(format!(".env.{mode}.local")),
    ]
}

/// Load and merge the env files for `mode`. Later files override earlier
/// ones; missing files are skipped, unparsable lines are logged and skipped.
pub async fn load_env_files(root: &Path, mode: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for file in env_files(root, mode) {
        let Ok(content) = tokio::fs::read(&file).await else {
            continue;
        };
        for item in dotenvy::from_read_iter(content.as_slice()) {
            match item {
                Ok((key, value)) => {
                    env.insert(key, value);
                }
                Err(e) => warn!(path = %file.display(), error = %e, "skipping env line"),
            }
        }
    }
    env
}

#[must_use]
pub fn is_public_key(key: &str) -> bool {
    PUBLIC_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// Variables visible to client code as `process.env`.
///
/// `NODE_ENV` comes from the process environment, else `"development"`.
/// Prefixed variables from the process environment are overridden by the
/// same keys from `file_env`. Unprefixed keys are never exposed.
#[must_use]
pub fn public_env(file_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut public: BTreeMap<String, String> = std::env::vars()
        .filter(|(key, _)| is_public_key(key))
        .collect();
    public.extend(
        file_env
            .iter()
            .filter(|(key, _)| is_public_key(key))
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    let node_env = std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());
    public.insert("NODE_ENV".to_string(), node_env);
    public
}
