//! `kiln dev` command implementation.
//!
//! Hands the project to the restart supervisor and serves until Ctrl+C.

use kiln_core::config::Overrides;
use kiln_server::{Supervisor, SupervisorOptions};
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

/// Dev server action. Every `Some` field overrides the config file.
#[derive(Debug, Clone)]
pub struct DevAction {
    /// Project root.
    pub cwd: PathBuf,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: bool,
    /// Explicit config file (overrides `kiln.config.json` discovery).
    pub config: Option<PathBuf>,
    pub framework: Option<String>,
    /// Selects which `.env.<mode>` files are loaded.
    pub mode: Option<String>,
}

/// Run the dev server.
pub async fn run(action: DevAction) -> Result<()> {
    let root = dunce::canonicalize(&action.cwd).into_diagnostic()?;

    let supervisor = Supervisor::new(SupervisorOptions {
        root,
        config_path: action.config,
        overrides: Overrides {
            port: action.port,
            host: action.host,
            open: action.open,
            framework: action.framework,
            mode: action.mode,
        },
    });

    let mut address = supervisor.address();
    tokio::spawn(async move {
        while address.changed().await.is_ok() {
            let current = *address.borrow_and_update();
            if let Some(addr) = current {
                println!();
                println!("  kiln dev server running at http://{addr}");
                println!("  Press Ctrl+C to stop");
                println!();
            }
        }
    });

    supervisor
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()
}
