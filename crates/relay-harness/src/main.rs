//! # relay
//!
//! Runs the relay server, or drives scripted client scenarios against a
//! running one.

#![deny(unsafe_code)]

mod scenarios;
mod testdata;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use relay_server::config::ServerConfig;
use relay_server::events::handlers::default_registry;
use relay_server::server::RelayServer;
use relay_settings::RelaySettings;

use crate::scenarios::{Driver, Scenario};

/// Real-time event relay: server and test driver.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Real-time event relay server and test driver")]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset (defaults to the settings value).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until Ctrl-C.
    Serve(ServeArgs),
    /// Run client scenarios against a server.
    Drive(DriveArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit a `heartbeat` event to every socket at this period.
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Log JSON lines instead of the compact format.
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args, Debug)]
struct DriveArgs {
    /// Scenario to run.
    #[arg(value_enum, default_value = "all")]
    scenario: Scenario,

    /// Server URL.
    #[arg(long, default_value = "ws://127.0.0.1:3000")]
    url: String,

    /// Namespace to join (`test-event` always uses `/test`).
    #[arg(long, default_value = "/")]
    namespace: String,

    /// Print the reports as JSON.
    #[arg(long)]
    json: bool,
}

fn load_settings(args: &ServeArgs) -> Result<RelaySettings> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    if let Some(host) = &args.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.server.http_port = port;
    }
    if let Some(secs) = args.heartbeat_secs {
        settings.engine.heartbeat_emit_interval_secs = Some(secs);
    }
    if args.json_logs {
        settings.logging.json = true;
    }
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

async fn serve(args: &ServeArgs, log_level: Option<&str>) -> Result<()> {
    let settings = load_settings(args)?;
    let level = log_level.unwrap_or(&settings.logging.level);
    if settings.logging.json {
        relay_core::logging::init_json_subscriber(level);
    } else {
        relay_core::logging::init_subscriber(level);
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("failed to install metrics recorder")?;
    let config = ServerConfig::from_settings(&settings);
    let server = RelayServer::new(config, default_registry(), metrics);
    let (addr, handle) = server.listen().await.context("failed to start server")?;

    tracing::info!(
        namespaces = ?server.config().namespaces,
        "relay listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    server.shutdown().shutdown();
    let _ = handle.await;
    Ok(())
}

async fn drive(args: &DriveArgs, log_level: Option<&str>) -> Result<()> {
    relay_core::logging::init_subscriber(log_level.unwrap_or("warn"));

    let reports = Driver::new(&args.url, &args.namespace)
        .run(args.scenario)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let status = if report.passed { "PASS" } else { "FAIL" };
            println!(
                "{status} {:<12} {:>6}ms  {}",
                report.name, report.duration_ms, report.detail
            );
        }
    }

    let failed = reports.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        bail!("{failed} of {} scenario(s) failed", reports.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level.as_deref();
    match &cli.command {
        Command::Serve(args) => serve(args, log_level).await,
        Command::Drive(args) => drive(args, log_level).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn serve_defaults() {
        let cli = parse(&["relay", "serve"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.host.is_none());
        assert!(args.port.is_none());
        assert!(args.config.is_none());
        assert!(!args.json_logs);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn serve_overrides() {
        let cli = parse(&[
            "relay",
            "--log-level",
            "debug",
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            "4000",
            "--heartbeat-secs",
            "2",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.heartbeat_secs, Some(2));
    }

    #[test]
    fn drive_defaults_to_all() {
        let Command::Drive(args) = parse(&["relay", "drive"]).command else {
            panic!("expected drive");
        };
        assert_eq!(args.scenario, Scenario::All);
        assert_eq!(args.url, "ws://127.0.0.1:3000");
        assert_eq!(args.namespace, "/");
        assert!(!args.json);
    }

    #[test]
    fn drive_parses_kebab_case_scenarios() {
        let Command::Drive(args) =
            parse(&["relay", "drive", "ack-burst", "--namespace", "/chat", "--json"]).command
        else {
            panic!("expected drive");
        };
        assert_eq!(args.scenario, Scenario::AckBurst);
        assert_eq!(args.namespace, "/chat");
        assert!(args.json);
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(Cli::try_parse_from(["relay", "drive", "nope"]).is_err());
    }

    #[test]
    fn settings_file_and_flags_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"httpPort": 4100}, "engine": {"ackTimeoutMs": 900}}"#)
            .unwrap();
        let args = ServeArgs {
            host: Some("127.0.0.1".into()),
            port: None,
            config: Some(path),
            heartbeat_secs: Some(3),
            json_logs: false,
        };
        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.http_port, 4100);
        assert_eq!(settings.engine.ack_timeout_ms, 900);
        assert_eq!(settings.engine.heartbeat_emit_interval_secs, Some(3));
    }

    #[test]
    fn zero_heartbeat_is_invalid() {
        let args = ServeArgs {
            host: None,
            port: None,
            config: Some(PathBuf::from("/nonexistent/settings.json")),
            heartbeat_secs: Some(0),
            json_logs: false,
        };
        assert!(load_settings(&args).is_err());
    }
}
