//! Live-update wire messages.
//!
//! Every message is a JSON object with a kebab-case `type` tag:
//!
//! ```json
//! {"type":"style-update","path":"/src/a.css","updates":[{"path":"/src/a.css","timestamp":1}]}
//! {"type":"full-reload","path":"/src/App.tsx"}
//! {"type":"error","message":"...","stack":"...","filename":"/abs/App.tsx","frame":"..."}
//! {"type":"restarting"}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Extensions delivered as style updates instead of reloads.
pub const STYLESHEET_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less", "styl", "stylus"];

#[must_use]
pub fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| STYLESHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// How a client should apply a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    StyleUpdate,
    FullReload,
}

impl UpdateKind {
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        if is_stylesheet(path) {
            Self::StyleUpdate
        } else {
            Self::FullReload
        }
    }
}

/// One queued change, path already root-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmrUpdate {
    pub path: String,
    pub kind: UpdateKind,
}

/// Entry of a `style-update` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleUpdateEntry {
    pub path: String,
    pub timestamp: u64,
}

/// Error details shown in the browser overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrMessage {
    Connected,
    StyleUpdate {
        /// First path of the batch.
        path: String,
        updates: Vec<StyleUpdateEntry>,
    },
    FullReload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Error(ErrorPayload),
    Restarting,
}

impl HmrMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"full-reload"}"#.to_string())
    }

    /// Collapse a flushed buffer into the single message delivered for it.
    ///
    /// Paths are de-duplicated keeping first-seen order. Any full reload in
    /// the buffer turns the whole batch into one full reload.
    #[must_use]
    pub fn from_batch(pending: &[HmrUpdate], timestamp: u64) -> Option<Self> {
        let mut seen = HashSet::new();
        let batch: Vec<&HmrUpdate> = pending
            .iter()
            .filter(|update| seen.insert(update.path.as_str()))
            .collect();

        let first = batch.first()?;
        if let Some(reload) = pending.iter().find(|u| u.kind == UpdateKind::FullReload) {
            return Some(Self::FullReload {
                path: Some(reload.path.clone()),
            });
        }
        Some(Self::StyleUpdate {
            path: first.path.clone(),
            updates: batch
                .iter()
                .map(|update| StyleUpdateEntry {
                    path: update.path.clone(),
                    timestamp,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(path: &str, kind: UpdateKind) -> HmrUpdate {
        HmrUpdate {
            path: path.to_string(),
            kind,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            UpdateKind::for_path(Path::new("/p/src/a.CSS")),
            UpdateKind::StyleUpdate
        );
        assert_eq!(
            UpdateKind::for_path(Path::new("/p/src/a.scss")),
            UpdateKind::StyleUpdate
        );
        assert_eq!(
            UpdateKind::for_path(Path::new("/p/src/App.tsx")),
            UpdateKind::FullReload
        );
        assert_eq!(
            UpdateKind::for_path(Path::new("/p/Makefile")),
            UpdateKind::FullReload
        );
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(HmrMessage::Restarting.to_json(), r#"{"type":"restarting"}"#);
        assert_eq!(HmrMessage::Connected.to_json(), r#"{"type":"connected"}"#);

        let error = HmrMessage::Error(ErrorPayload {
            message: "boom".to_string(),
            stack: "boom\n    at a.ts".to_string(),
            filename: Some("/p/a.ts".to_string()),
            frame: None,
        });
        let value: serde_json::Value = serde_json::from_str(&error.to_json()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "boom");
        assert_eq!(value["filename"], "/p/a.ts");
        assert!(value.get("frame").is_none());
    }

    #[test]
    fn test_batch_dedupes_in_order() {
        let pending = vec![
            update("/a.css", UpdateKind::StyleUpdate),
            update("/b.css", UpdateKind::StyleUpdate),
            update("/a.css", UpdateKind::StyleUpdate),
        ];
        let Some(HmrMessage::StyleUpdate { path, updates }) = HmrMessage::from_batch(&pending, 7)
        else {
            panic!("expected style update");
        };
        assert_eq!(path, "/a.css");
        let paths: Vec<_> = updates.iter().map(|u| u.path.as_str()).collect();
        assert_eq!(paths, ["/a.css", "/b.css"]);
        assert!(updates.iter().all(|u| u.timestamp == 7));
    }

    #[test]
    fn test_full_reload_collapses_batch() {
        let pending = vec![
            update("/a.css", UpdateKind::StyleUpdate),
            update("/App.tsx", UpdateKind::FullReload),
            update("/b.css", UpdateKind::StyleUpdate),
        ];
        assert_eq!(
            HmrMessage::from_batch(&pending, 1),
            Some(HmrMessage::FullReload {
                path: Some("/App.tsx".to_string())
            })
        );
        assert_eq!(HmrMessage::from_batch(&[], 1), None);
    }
}
