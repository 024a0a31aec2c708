// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Finsight - per-session analysis coordination.
//!
//! This is the binary entry point: the HTTP gateway, the analysis worker
//! pool, and operational commands over the shared store.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod pool;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use finsight_config::model::FinsightConfig;

/// Finsight - per-session analysis coordination.
#[derive(Parser, Debug)]
#[command(name = "finsight", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP gateway together with the worker pool.
    Serve,
    /// Run only the analysis workers.
    Worker,
    /// Show queue counts and active session locks.
    Status {
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
        /// Also list the jobs submitted for this session.
        #[arg(long, value_name = "SESSION_ID")]
        session: Option<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn load_config(path: Option<&PathBuf>) -> FinsightConfig {
    let loaded = match path {
        Some(path) => finsight_config::load_and_validate_path(path),
        None => finsight_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            finsight_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    let result = match cli.command {
        Some(Commands::Serve) => {
            serve::init_tracing(&config.service.log_level, &config.service.log_format);
            serve::run_serve(config, serve::Mode::Serve).await
        }
        Some(Commands::Worker) => {
            serve::init_tracing(&config.service.log_level, &config.service.log_format);
            serve::run_serve(config, serve::Mode::WorkersOnly).await
        }
        Some(Commands::Status {
            json,
            plain,
            session,
        }) => status::run_status(&config, json, plain, session.as_deref()).await,
        Some(Commands::Config) => print_config(&config),
        None => {
            println!("finsight: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("finsight: {e}");
        std::process::exit(1);
    }
}

fn print_config(config: &FinsightConfig) -> Result<(), finsight_core::FinsightError> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| finsight_core::FinsightError::Config(format!("failed to render config: {e}")))?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn status_flags_parse() {
        let cli = Cli::try_parse_from(["finsight", "status", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Status {
                json: true,
                plain: false,
                session: None,
            })
        ));
    }

    #[test]
    fn status_session_flag_parses() {
        let cli = Cli::try_parse_from(["finsight", "status", "--session", "s1"]).unwrap();
        match cli.command {
            Some(Commands::Status { session, .. }) => assert_eq!(session.as_deref(), Some("s1")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_config_flag_parses_after_subcommand() {
        let cli = Cli::try_parse_from(["finsight", "worker", "--config", "/tmp/f.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/f.toml")));
        assert!(matches!(cli.command, Some(Commands::Worker)));
    }

    #[test]
    #[serial_test::serial]
    fn config_file_is_overridden_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finsight.toml");
        std::fs::write(&path, "[queue]\nlease_secs = 30\nmax_attempts = 2\n").unwrap();

        // SAFETY: serialized with every other test that touches the environment.
        unsafe { std::env::set_var("FINSIGHT_QUEUE_MAX_ATTEMPTS", "5") };
        let config = load_config(Some(&path));
        unsafe { std::env::remove_var("FINSIGHT_QUEUE_MAX_ATTEMPTS") };

        assert_eq!(config.queue.lease_secs, 30);
        assert_eq!(config.queue.max_attempts, 5);
    }

    #[test]
    #[serial_test::serial]
    fn default_config_renders_as_toml() {
        let config = finsight_config::load_and_validate_str("").unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[queue]"));
        assert!(rendered.contains("lease_secs = 300"));
    }
}
