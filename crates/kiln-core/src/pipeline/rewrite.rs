//! Import rewriting for unbundled serving.
//!
//! Scans the whole module text for static imports, side-effect imports,
//! `export ... from` re-exports and dynamic `import('...')` calls, including
//! statements split across lines or packed onto one:
//! - relative, root-absolute and URL specifiers are kept as written
//! - stylesheet and asset specifiers get `?import` so the server answers
//!   with a JS module
//! - bare specifiers go to the pre-bundled copy when one exists
//!   (`/@kiln-deps/react.js?v=<token>`), else to the package store
//!   (`/node_modules/<spec>`)

use super::deps::DepsManifest;
use crate::hmr::STYLESHEET_EXTENSIONS;
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};

/// Extensions served as `export default "<url>"` when imported from script.
const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "mp4", "webm", "ogg", "mp3", "wav",
    "flac", "aac", "woff", "woff2", "eot", "ttf", "otf", "wasm", "pdf",
];

fn extension_of(specifier: &str) -> Option<String> {
    let file = specifier.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Whether `specifier` names a stylesheet.
#[must_use]
pub fn is_stylesheet_specifier(specifier: &str) -> bool {
    extension_of(specifier).is_some_and(|ext| STYLESHEET_EXTENSIONS.contains(&ext.as_str()))
}

#[must_use]
pub fn is_asset_specifier(specifier: &str) -> bool {
    extension_of(specifier).is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext.as_str()))
}

fn is_url(specifier: &str) -> bool {
    specifier.starts_with("http:")
        || specifier.starts_with("https:")
        || specifier.starts_with("//")
        || specifier.starts_with("data:")
}

/// Relative (`./`, `../`) or root-absolute (`/`) specifier.
#[must_use]
pub fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || (specifier.starts_with('/') && !specifier.starts_with("//"))
}

fn with_import_marker(specifier: &str) -> String {
    if specifier.contains('?') {
        format!("{specifier}&import")
    } else {
        format!("{specifier}?import")
    }
}

/// Rewrites import specifiers in served modules.
#[derive(Debug, Clone)]
pub struct ImportRewriter {
    deps: Arc<DepsManifest>,
    /// Cache-busting token appended to pre-bundled URLs, fixed per instance.
    token: String,
}

impl ImportRewriter {
    #[must_use]
    pub fn new(deps: Arc<DepsManifest>, token: impl Into<String>) -> Self {
        Self {
            deps,
            token: token.into(),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Rewrite every import specifier in `code`.
    #[must_use]
    pub fn rewrite(&self, code: &str) -> String {
        map_specifiers(code, |specifier| self.rewrite_specifier(specifier))
    }

    /// Rewrite only bare specifiers. Used for files served from the
    /// package store, whose relative imports the browser resolves itself.
    #[must_use]
    pub fn rewrite_bare(&self, code: &str) -> String {
        map_specifiers(code, |specifier| {
            if is_path_specifier(specifier) || is_url(specifier) {
                None
            } else {
                self.rewrite_specifier(specifier)
            }
        })
    }

    /// URL the browser should load for `specifier`, or `None` to keep it.
    #[must_use]
    pub fn rewrite_specifier(&self, specifier: &str) -> Option<String> {
        if specifier.is_empty() || specifier.starts_with('\0') || is_url(specifier) {
            return None;
        }

        let side_module = is_stylesheet_specifier(specifier) || is_asset_specifier(specifier);
        if is_path_specifier(specifier) {
            return side_module.then(|| with_import_marker(specifier));
        }

        if let Some(url) = self.deps.url_for(specifier) {
            return Some(format!("{url}?v={}", self.token));
        }

        let store = format!("/node_modules/{specifier}");
        Some(if side_module {
            with_import_marker(&store)
        } else {
            store
        })
    }

    /// Pre-bundled URL for a bare specifier, with the cache-busting token.
    #[must_use]
    pub fn dependency_url(&self, specifier: &str) -> Option<String> {
        self.deps
            .url_for(specifier)
            .map(|url| format!("{url}?v={}", self.token))
    }
}

/// `from '<spec>'`, `import '<spec>'` and `import('<spec>')` anywhere in
/// the text. The leading character keeps member calls like `x.from('a')` and
/// identifiers like `reimport` out.
const SPECIFIER_PATTERN: &str =
    r#"(?:^|[^\w$.])(?:from\s*|import\s*(\(\s*)?)(['"`])([^'"`\n]+)(['"`])"#;

fn specifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SPECIFIER_PATTERN).ok())
        .as_ref()
}

/// Apply `f` to every import specifier in `code`, replacing the ones it
/// returns `Some` for. Statements may span lines and share a line; text
/// outside the specifiers passes through untouched.
pub fn map_specifiers(code: &str, f: impl Fn(&str) -> Option<String>) -> String {
    let Some(pattern) = specifier_pattern() else {
        return code.to_string();
    };

    let mut result = String::with_capacity(code.len());
    let mut copied = 0;
    for caps in pattern.captures_iter(code) {
        let (Some(open), Some(specifier), Some(close)) = (caps.get(2), caps.get(3), caps.get(4))
        else {
            continue;
        };
        if open.as_str() != close.as_str() {
            continue;
        }
        // Template literals only count as `import(`...`)` without interpolation.
        let dynamic = caps.get(1).is_some();
        if open.as_str() == "`" && (!dynamic || specifier.as_str().contains("${")) {
            continue;
        }
        if let Some(rewritten) = f(specifier.as_str()) {
            result.push_str(&code[copied..specifier.start()]);
            result.push_str(&rewritten);
            copied = specifier.end();
        }
    }
    result.push_str(&code[copied..]);
    result
}

/// Every distinct import specifier in `code`, in first-seen order.
#[must_use]
pub fn extract_specifiers(code: &str) -> Vec<String> {
    let found = std::cell::RefCell::new(Vec::<String>::new());
    let _ = map_specifiers(code, |specifier| {
        let mut found = found.borrow_mut();
        if !found.iter().any(|s| s == specifier) {
            found.push(specifier.to_string());
        }
        None
    });
    found.into_inner()
}
