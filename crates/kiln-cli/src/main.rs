#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unnecessary_wraps)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about = "On-demand dev server for front-end projects", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the dev server
    Dev {
        /// Port to listen on (default 5173)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Host to bind to (default localhost)
        #[arg(long)]
        host: Option<String>,

        /// Open browser automatically
        #[arg(long)]
        open: bool,

        /// Path to config file (overrides kiln.config.json)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Force a framework instead of detecting it from package.json
        #[arg(long, short = 'f')]
        framework: Option<String>,

        /// Mode (e.g. "development", "production"); controls which .env files are loaded
        #[arg(long, short = 'm')]
        mode: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Dev {
            port,
            host,
            open,
            config,
            framework,
            mode,
        } => {
            logging::init(cli.verbose, cli.json);
            let action = commands::dev::DevAction {
                cwd,
                port,
                host,
                open,
                config,
                framework,
                mode,
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::dev::run(action))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dev_flags() {
        let cli = Cli::try_parse_from([
            "kiln", "-vv", "--cwd", "/proj", "dev", "--port", "3000", "--open", "-m", "staging",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.cwd, Some(PathBuf::from("/proj")));
        let Commands::Dev {
            port,
            host,
            open,
            mode,
            ..
        } = cli.command
        else {
            panic!("expected dev");
        };
        assert_eq!(port, Some(3000));
        assert_eq!(host, None);
        assert!(open);
        assert_eq!(mode.as_deref(), Some("staging"));
    }

    #[test]
    fn test_unset_flags_do_not_override() {
        let cli = Cli::try_parse_from(["kiln", "dev"]).unwrap();
        let Commands::Dev { port, framework, .. } = cli.command else {
            panic!("expected dev");
        };
        assert_eq!(port, None);
        assert_eq!(framework, None);
    }
}
