//! Source plugins applied to raw file text before the transformer runs.
//!
//! A plugin returns `Ok(None)` for files outside its domain and
//! `Ok(Some(code))` to replace the text seen by the next plugin.

use super::FileKind;
use crate::config::SharedSettings;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{plugin}] {message}")]
pub struct PluginError {
    pub plugin: String,
    pub message: String,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

pub trait SourcePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform(&self, code: &str, path: &Path) -> Result<Option<String>, PluginError>;
}

/// Ordered list of plugins; each sees the previous one's output.
#[derive(Default)]
pub struct PluginChain {
    plugins: Vec<Box<dyn SourcePlugin>>,
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl PluginChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in plugins, plus any configured by name. Unknown names are
    /// logged and skipped.
    #[must_use]
    pub fn builtin(names: &[String], settings: &SharedSettings) -> Self {
        let mut chain = Self::new();
        chain.add(Box::new(EnvPlugin::new(settings.clone())));
        chain.add(Box::new(DefinePlugin::new(settings.clone())));
        for name in names {
            match name.as_str() {
                "env" | "define" => {}
                other => warn!(plugin = other, "unknown plugin in config, skipping"),
            }
        }
        chain
    }

    pub fn add(&mut self, plugin: Box<dyn SourcePlugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn transform(&self, code: String, path: &Path) -> Result<String, PluginError> {
        let mut current = code;
        for plugin in &self.plugins {
            if let Some(next) = plugin.transform(&current, path)? {
                current = next;
            }
        }
        Ok(current)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Replace whole-token occurrences of each key with its value. A match must
/// not be preceded by an identifier character or `.` and must not be
/// followed by an identifier character. Longer keys win.
#[must_use]
pub fn replace_tokens(code: &str, replacements: &BTreeMap<String, String>) -> Option<String> {
    let mut keys: Vec<&String> = replacements.keys().filter(|k| !k.is_empty()).collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));

    let mut out = String::with_capacity(code.len());
    let mut changed = false;
    let mut i = 0;
    'scan: while i < code.len() {
        let rest = &code[i..];
        let boundary_before = code[..i]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c) && c != '.');
        if boundary_before {
            for key in &keys {
                if rest.starts_with(key.as_str())
                    && !rest[key.len()..].chars().next().is_some_and(is_ident_char)
                {
                    out.push_str(&replacements[*key]);
                    i += key.len();
                    changed = true;
                    continue 'scan;
                }
            }
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        out.push(c);
        i += c.len_utf8();
    }
    changed.then_some(out)
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Replaces `import.meta.env.*` reads with literal values: `MODE`, `DEV`,
/// `PROD`, `BASE_URL` and every public variable.
pub struct EnvPlugin {
    settings: SharedSettings,
}

impl EnvPlugin {
    #[must_use]
    pub fn new(settings: SharedSettings) -> Self {
        Self { settings }
    }

    fn replacements(&self) -> BTreeMap<String, String> {
        let settings = self.settings.snapshot();
        let dev = settings.mode == "development";
        let mut map = BTreeMap::from([
            ("import.meta.env.MODE".to_string(), js_string(&settings.mode)),
            ("import.meta.env.DEV".to_string(), dev.to_string()),
            ("import.meta.env.PROD".to_string(), (!dev).to_string()),
            ("import.meta.env.BASE_URL".to_string(), "\"/\"".to_string()),
        ]);
        for (key, value) in &settings.env {
            map.insert(format!("import.meta.env.{key}"), js_string(value));
        }
        map
    }
}

impl SourcePlugin for EnvPlugin {
    fn name(&self) -> &'static str {
        "env"
    }

    fn transform(&self, code: &str, path: &Path) -> Result<Option<String>, PluginError> {
        if FileKind::of(path) != FileKind::Script || !code.contains("import.meta.env") {
            return Ok(None);
        }
        Ok(replace_tokens(code, &self.replacements()))
    }
}

/// Applies config `define` replacements to scripts.
pub struct DefinePlugin {
    settings: SharedSettings,
}

impl DefinePlugin {
    #[must_use]
    pub fn new(settings: SharedSettings) -> Self {
        Self { settings }
    }
}

impl SourcePlugin for DefinePlugin {
    fn name(&self) -> &'static str {
        "define"
    }

    fn transform(&self, code: &str, path: &Path) -> Result<Option<String>, PluginError> {
        if FileKind::of(path) != FileKind::Script {
            return Ok(None);
        }
        let define = self.settings.snapshot().define;
        if define.is_empty() {
            return Ok(None);
        }
        if let Some((key, _)) = define.iter().find(|(_, value)| value.contains('\n')) {
            return Err(PluginError::new(
                "define",
                format!("replacement for `{key}` spans multiple lines"),
            ));
        }
        Ok(replace_tokens(code, &define))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;

    fn settings(define: &[(&str, &str)], env: &[(&str, &str)]) -> SharedSettings {
        SharedSettings::new(RuntimeSettings {
            entry: "src/main.ts".to_string(),
            mode: "development".to_string(),
            env: env
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            define: define
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        })
    }

    #[test]
    fn test_replace_tokens_respects_boundaries() {
        let map = BTreeMap::from([
            ("__VERSION__".to_string(), "\"1.0\"".to_string()),
            ("DEBUG".to_string(), "false".to_string()),
        ]);
        let out = replace_tokens(
            "log(__VERSION__, DEBUG, DEBUG_MODE, obj.DEBUG, __VERSION__x);",
            &map,
        )
        .unwrap();
        assert_eq!(out, "log(\"1.0\", false, DEBUG_MODE, obj.DEBUG, __VERSION__x);");
        assert_eq!(replace_tokens("nothing here", &map), None);
    }

    #[test]
    fn test_env_plugin() {
        let plugin = EnvPlugin::new(settings(&[], &[("KILN_API", "https://api")]));
        let out = plugin
            .transform(
                "fetch(import.meta.env.KILN_API); if (import.meta.env.DEV) {}",
                Path::new("/p/src/a.ts"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(out, "fetch(\"https://api\"); if (true) {}");

        assert_eq!(
            plugin
                .transform("a{b:import.meta.env.DEV}", Path::new("/p/a.css"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_define_plugin_sees_hot_updates() {
        let shared = settings(&[("__A__", "1")], &[]);
        let plugin = DefinePlugin::new(shared.clone());
        let path = Path::new("/p/src/a.js");
        assert_eq!(
            plugin.transform("x = __A__;", path).unwrap().as_deref(),
            Some("x = 1;")
        );

        let mut next = shared.snapshot();
        next.define.insert("__A__".to_string(), "2".to_string());
        shared.replace(next);
        assert_eq!(
            plugin.transform("x = __A__;", path).unwrap().as_deref(),
            Some("x = 2;")
        );
    }

    #[test]
    fn test_chain_threads_output_and_stops_on_error() {
        struct Upper;
        impl SourcePlugin for Upper {
            fn name(&self) -> &'static str {
                "upper"
            }
            fn transform(&self, code: &str, _: &Path) -> Result<Option<String>, PluginError> {
                Ok(Some(code.to_uppercase()))
            }
        }
        struct Fail;
        impl SourcePlugin for Fail {
            fn name(&self) -> &'static str {
                "fail"
            }
            fn transform(&self, _: &str, _: &Path) -> Result<Option<String>, PluginError> {
                Err(PluginError::new("fail", "boom"))
            }
        }

        let mut chain = PluginChain::builtin(&[], &settings(&[("X", "y")], &[]));
        chain.add(Box::new(Upper));
        assert_eq!(
            chain.transform("X;".to_string(), Path::new("/a.js")).unwrap(),
            "Y;"
        );

        chain.add(Box::new(Fail));
        let err = chain
            .transform("X;".to_string(), Path::new("/a.js"))
            .unwrap_err();
        assert_eq!(err.to_string(), "[fail] boom");
    }
}
