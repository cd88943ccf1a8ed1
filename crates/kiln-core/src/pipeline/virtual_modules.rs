//! Modules the server generates instead of reading from disk.

use super::rewrite::ImportRewriter;
use crate::config::RuntimeSettings;

/// URL of the browser client injected into every page.
pub const CLIENT_URL: &str = "/@kiln/client";
pub const OVERLAY_URL: &str = "/@kiln/error-overlay.js";
/// Module that installs `process.env` in the page.
pub const ENV_URL: &str = "/@kiln/env";
/// WebSocket endpoint the client connects to.
pub const HMR_SOCKET_PATH: &str = "/__kiln_hmr";

/// Re-export shim over a framework runtime package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shim {
    pub url: &'static str,
    pub package: &'static str,
    pub exports: &'static [&'static str],
}

const REACT_EXPORTS: &[&str] = &[
    "useState",
    "useEffect",
    "useContext",
    "useReducer",
    "useCallback",
    "useMemo",
    "useRef",
    "useImperativeHandle",
    "useLayoutEffect",
    "useDebugValue",
    "useDeferredValue",
    "useTransition",
    "useId",
    "useSyncExternalStore",
    "useInsertionEffect",
    "Component",
    "PureComponent",
    "memo",
    "forwardRef",
    "lazy",
    "Suspense",
    "createContext",
    "isValidElement",
    "cloneElement",
    "createElement",
    "createRef",
    "Children",
    "Fragment",
    "StrictMode",
    "version",
];

pub const SHIMS: &[Shim] = &[
    Shim {
        url: "/@kiln/react",
        package: "react",
        exports: REACT_EXPORTS,
    },
    Shim {
        url: "/@kiln/react-dom",
        package: "react-dom",
        exports: &[
            "createPortal",
            "findDOMNode",
            "flushSync",
            "hydrate",
            "render",
            "unmountComponentAtNode",
            "version",
        ],
    },
    Shim {
        url: "/@kiln/react-dom-client",
        package: "react-dom/client",
        exports: &["createRoot", "hydrateRoot"],
    },
    Shim {
        url: "/@kiln/react-jsx-runtime",
        package: "react/jsx-runtime",
        exports: &["jsx", "jsxs", "Fragment"],
    },
    Shim {
        url: "/@kiln/react-jsx-dev-runtime",
        package: "react/jsx-dev-runtime",
        exports: &["jsxDEV", "jsx", "jsxs", "Fragment"],
    },
    Shim {
        url: "/@kiln/preact",
        package: "preact",
        exports: &[
            "h",
            "render",
            "hydrate",
            "Component",
            "Fragment",
            "createContext",
            "createElement",
            "cloneElement",
            "createRef",
            "isValidElement",
            "toChildArray",
            "options",
        ],
    },
    Shim {
        url: "/@kiln/preact-hooks",
        package: "preact/hooks",
        exports: &[
            "useState",
            "useEffect",
            "useContext",
            "useReducer",
            "useCallback",
            "useMemo",
            "useRef",
            "useLayoutEffect",
            "useImperativeHandle",
            "useDebugValue",
            "useErrorBoundary",
            "useId",
        ],
    },
    Shim {
        url: "/@kiln/vue",
        package: "vue",
        exports: &[
            "createApp",
            "defineComponent",
            "h",
            "ref",
            "reactive",
            "readonly",
            "computed",
            "watch",
            "watchEffect",
            "toRef",
            "toRefs",
            "shallowRef",
            "nextTick",
            "provide",
            "inject",
            "onBeforeMount",
            "onMounted",
            "onBeforeUpdate",
            "onUpdated",
            "onBeforeUnmount",
            "onUnmounted",
            "version",
        ],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualModule {
    Client,
    Overlay,
    Env,
    Shim(&'static Shim),
}

impl VirtualModule {
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            CLIENT_URL => Some(Self::Client),
            OVERLAY_URL => Some(Self::Overlay),
            ENV_URL => Some(Self::Env),
            _ => SHIMS.iter().find(|shim| shim.url == path).map(Self::Shim),
        }
    }

    #[must_use]
    pub fn render(&self, settings: &RuntimeSettings, rewriter: &ImportRewriter) -> String {
        match self {
            Self::Client => CLIENT_JS.replace("__KILN_SOCKET_PATH__", HMR_SOCKET_PATH),
            Self::Overlay => OVERLAY_JS.to_string(),
            Self::Env => env_module(settings),
            Self::Shim(shim) => shim_module(shim, rewriter),
        }
    }
}

fn env_module(settings: &RuntimeSettings) -> String {
    let env = serde_json::to_string(&settings.env).unwrap_or_else(|_| "{}".to_string());
    format!(
        "const g = globalThis;\nif (!g.process) g.process = {{ env: {{}} }};\nif (!g.process.env) g.process.env = {{}};\nObject.assign(g.process.env, {env});\nexport default g.process.env;\n"
    )
}

fn shim_module(shim: &Shim, rewriter: &ImportRewriter) -> String {
    let target = rewriter
        .dependency_url(shim.package)
        .unwrap_or_else(|| format!("/node_modules/{}", shim.package));
    let mut out = format!(
        "import * as __ns from \"{target}\";\nconst __m = __ns.default ?? __ns;\n"
    );
    for name in shim.exports {
        out.push_str(&format!("export const {name} = __m.{name};\n"));
    }
    out.push_str("export default __m;\n");
    out
}

/// Insert the client script into a page, once.
#[must_use]
pub fn inject_client(html: &str) -> String {
    if html.contains(CLIENT_URL) {
        return html.to_string();
    }
    let tag = format!("<script type=\"module\" src=\"{CLIENT_URL}\"></script>");
    let mut out = html.to_string();
    if let Some(pos) = out.find("</head>") {
        out.insert_str(pos, &format!("  {tag}\n"));
    } else if let Some(pos) = out.find("</body>") {
        out.insert_str(pos, &format!("  {tag}\n"));
    } else {
        out.insert_str(0, &format!("{tag}\n"));
    }
    out
}

/// Page served when the project has no `index.html`.
#[must_use]
pub fn index_template(entry: &str) -> String {
    let entry = entry.trim_start_matches("./").trim_start_matches('/');
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>kiln dev</title>
  <script type="module" src="{CLIENT_URL}"></script>
</head>
<body>
  <div id="root"></div>
  <div id="app"></div>
  <script type="module" src="/{entry}"></script>
</body>
</html>
"#
    )
}

const CLIENT_JS: &str = r#"// kiln live-update client
const socketUrl = `${location.protocol === 'https:' ? 'wss' : 'ws'}://${location.host}__KILN_SOCKET_PATH__`;
let restarting = false;

async function overlay() {
  return import('/@kiln/error-overlay.js');
}

async function updateStyle(path, timestamp) {
  const existing = document.querySelector(`style[data-kiln-css="${path}"]`);
  if (existing) {
    const res = await fetch(`${path}?t=${timestamp}`);
    if (res.ok) existing.textContent = await res.text();
    return;
  }
  await import(`${path}?import&t=${timestamp}`);
}

async function waitForServer() {
  for (;;) {
    try {
      const res = await fetch('/@kiln/client', { cache: 'no-store' });
      if (res.ok) return;
    } catch (_) {}
    await new Promise((r) => setTimeout(r, 250));
  }
}

function connect() {
  const ws = new WebSocket(socketUrl);

  ws.addEventListener('message', async ({ data }) => {
    const msg = JSON.parse(data);
    switch (msg.type) {
      case 'connected':
        console.debug('[kiln] connected');
        break;
      case 'style-update':
        for (const update of msg.updates) {
          await updateStyle(update.path, update.timestamp);
        }
        (await overlay()).clearErrorOverlay();
        break;
      case 'full-reload':
        location.reload();
        break;
      case 'error':
        (await overlay()).showErrorOverlay(msg);
        break;
      case 'restarting':
        restarting = true;
        console.info('[kiln] server restarting');
        break;
    }
  });

  ws.addEventListener('close', async () => {
    await waitForServer();
    if (restarting) {
      location.reload();
    } else {
      connect();
    }
  });
}

connect();
"#;

const OVERLAY_JS: &str = r#"// kiln error overlay
const ID = 'kiln-error-overlay';

export function clearErrorOverlay() {
  document.getElementById(ID)?.remove();
}

export function showErrorOverlay(err) {
  clearErrorOverlay();
  const root = document.createElement('div');
  root.id = ID;
  root.style.cssText = 'position:fixed;inset:0;z-index:99999;background:rgba(0,0,0,.85);color:#eee;font:13px/1.5 ui-monospace,monospace;padding:32px;overflow:auto';

  const title = document.createElement('pre');
  title.style.cssText = 'color:#ff6b6b;font-weight:bold;white-space:pre-wrap';
  title.textContent = err.message;
  root.appendChild(title);

  if (err.filename) {
    const file = document.createElement('div');
    file.style.color = '#8ab4f8';
    file.textContent = err.filename;
    root.appendChild(file);
  }
  if (err.frame) {
    const frame = document.createElement('pre');
    frame.style.cssText = 'background:#1e1e1e;padding:12px;border-radius:4px';
    frame.textContent = err.frame;
    root.appendChild(frame);
  }
  if (err.stack) {
    const stack = document.createElement('pre');
    stack.style.color = '#999';
    stack.textContent = err.stack;
    root.appendChild(stack);
  }

  root.addEventListener('click', (e) => {
    if (e.target === root) clearErrorOverlay();
  });
  document.body.appendChild(root);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::deps::DepsManifest;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn rewriter(deps: &[(&str, &str)]) -> ImportRewriter {
        let entries: HashMap<String, String> = deps
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ImportRewriter::new(Arc::new(DepsManifest::from_entries(entries)), "t1")
    }

    #[test]
    fn test_lookup() {
        assert_eq!(VirtualModule::from_path("/@kiln/client"), Some(VirtualModule::Client));
        assert!(matches!(
            VirtualModule::from_path("/@kiln/preact-hooks"),
            Some(VirtualModule::Shim(Shim {
                package: "preact/hooks",
                ..
            }))
        ));
        assert_eq!(VirtualModule::from_path("/@kiln/unknown"), None);
    }

    #[test]
    fn test_shim_prefers_prebundled_copy() {
        let Some(module) = VirtualModule::from_path("/@kiln/react") else {
            panic!("react shim");
        };
        let settings = RuntimeSettings::default();

        let code = module.render(&settings, &rewriter(&[("react", "react.js")]));
        assert!(code.starts_with("import * as __ns from \"/@kiln-deps/react.js?v=t1\";"));
        assert!(code.contains("export const useState = __m.useState;"));
        assert!(code.trim_end().ends_with("export default __m;"));

        let code = module.render(&settings, &rewriter(&[]));
        assert!(code.contains("from \"/node_modules/react\""));
    }

    #[test]
    fn test_env_module() {
        let settings = RuntimeSettings {
            env: [("KILN_A".to_string(), "1".to_string())].into_iter().collect(),
            ..RuntimeSettings::default()
        };
        let code = VirtualModule::Env.render(&settings, &rewriter(&[]));
        assert!(code.contains(r#"Object.assign(g.process.env, {"KILN_A":"1"});"#));
    }

    #[test]
    fn test_client_targets_socket() {
        let code = VirtualModule::Client.render(&RuntimeSettings::default(), &rewriter(&[]));
        assert!(code.contains("/__kiln_hmr"));
        assert!(!code.contains("__KILN_SOCKET_PATH__"));
    }

    #[test]
    fn test_inject_client() {
        let html = "<html><head><title>x</title></head><body></body></html>";
        let out = inject_client(html);
        assert!(out.contains("<script type=\"module\" src=\"/@kiln/client\"></script>\n</head>"));
        assert_eq!(inject_client(&out), out);

        let bare = inject_client("<p>hi</p>");
        assert!(bare.starts_with("<script type=\"module\" src=\"/@kiln/client\">"));
    }

    #[test]
    fn test_index_template() {
        let html = index_template("./src/main.tsx");
        assert!(html.contains("<script type=\"module\" src=\"/src/main.tsx\"></script>"));
        assert!(html.contains(CLIENT_URL));
    }
}
