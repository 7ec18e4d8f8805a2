//! NetSecure updater entry point.
//!
//! Runs the update daemon with:
//! - Configuration loading (TOML file + environment)
//! - Structured logging
//! - Control socket setup
//! - Signal handling for graceful shutdown
//!
//! ## CLI Subcommands
//!
//! - `netsecure-updater` or `netsecure-updater serve` - Run the daemon (default)
//! - `netsecure-updater status|update|auto|rollback|history|health` - Drive a running daemon
//! - `netsecure-updater config show|defaults|validate` - Inspect configuration

use std::process::ExitCode;

use netsecure_updater::cli::{
    config_cmd, get_socket_path, run_auto, run_health, run_history, run_rollback, run_status,
    run_update,
};
use netsecure_updater::config;
use netsecure_updater::telemetry::{init_logging, LogConfig};
use netsecure_updater::updater::UpdaterError;
use netsecure_updater::Runtime;

/// Options shared by the client subcommands.
struct ClientArgs {
    socket_path: String,
    json: bool,
    limit: Option<usize>,
    positional: Vec<String>,
}

fn parse_client_args(args: &[String]) -> Result<ClientArgs, String> {
    let mut parsed = ClientArgs {
        socket_path: get_socket_path(),
        json: false,
        limit: None,
        positional: Vec::new(),
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => parsed.json = true,
            "--socket" => {
                i += 1;
                parsed.socket_path = args.get(i).cloned().ok_or("Missing value for --socket")?;
            }
            "--limit" | "-n" => {
                i += 1;
                let value = args.get(i).ok_or("Missing value for --limit")?;
                parsed.limit = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid value for --limit: {}", value))?,
                );
            }
            other if other.starts_with('-') => return Err(format!("Unknown argument: {}", other)),
            other => parsed.positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok(parsed)
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");
    let rest = args.get(2..).unwrap_or(&[]);

    match command {
        "serve" | "" => exit(serve().await),
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("netsecure-updater {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "config" => {
            let subcommand = rest.first().map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => exit(config_cmd::run_show()),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    ExitCode::FAILURE
                }
            }
        }
        "status" | "update" | "auto" | "rollback" | "history" | "health" => {
            let client = match parse_client_args(rest) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let socket = client.socket_path.as_str();
            let code = match command {
                "status" => run_status(socket, client.json).await,
                "update" => run_update(socket).await,
                "rollback" => run_rollback(socket).await,
                "history" => run_history(socket, client.limit, client.json).await,
                "health" => run_health(socket, client.json).await,
                _ => match client.positional.first().map(|s| s.as_str()) {
                    Some("on") | Some("enable") => run_auto(socket, true).await,
                    Some("off") | Some("disable") => run_auto(socket, false).await,
                    _ => {
                        eprintln!("Usage: netsecure-updater auto on|off");
                        1
                    }
                },
            };
            exit(code)
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> i32 {
    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("Logging setup failed: {}", e);
        return 2;
    }

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 2;
        }
    };
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {}", e);
        return 2;
    }

    let runtime = match Runtime::start(cfg).await {
        Ok(runtime) => runtime,
        Err(UpdaterError::AlreadyRunning(lock)) => {
            eprintln!(
                "Another updater is running (lock file {}). Remove it if stale.",
                lock.display()
            );
            return 1;
        }
        Err(e) => {
            eprintln!("Startup failed: {}", e);
            return 1;
        }
    };

    let code = match run_control_socket(&runtime).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Server error: {}", e);
            1
        }
    };
    runtime.shutdown().await;
    code
}

#[cfg(unix)]
async fn run_control_socket(runtime: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    use netsecure_updater::ipc::{ControlHandler, IpcServer, IpcServerConfig};
    use tokio_util::sync::CancellationToken;

    let server = IpcServer::new(
        IpcServerConfig::new(&runtime.config.socket_path),
        ControlHandler::new(runtime.integration.clone()),
    );
    let listener = server.bind()?;
    let shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(server.run(listener, shutdown.clone()));

    wait_for_signal().await?;
    eprintln!("Shutdown signal received, draining...");
    shutdown.cancel();

    server_handle.await??;
    Ok(())
}

#[cfg(not(unix))]
async fn run_control_socket(_runtime: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Control socket unavailable on this platform; running without it.");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "netsecure-updater - model auto-update and rollback manager v{}

USAGE:
    netsecure-updater [COMMAND] [OPTIONS]

COMMANDS:
    serve             Run the update daemon (default when no command given)
    status [--json]   Show updater status
    update            Force an update cycle now
    auto on|off       Enable or disable automatic updates
    rollback          Restore the newest backup
    history [-n N]    Show recent update records
    health [--json]   Health check (exit 0 if healthy, 1 otherwise)
    config show       Print the effective configuration
    config defaults   Print built-in defaults
    config validate   Check the configuration
    version           Show version information
    help              Show this help message

OPTIONS:
    --socket PATH     Override the control socket path
    --json            Output in JSON format

ENVIRONMENT:
    NETSECURE_CONFIG       TOML config file
    NETSECURE_SOCKET_PATH  Control socket (default: /tmp/netsecure-updater.sock)
    NETSECURE_LOG_FORMAT   json or pretty
    NETSECURE_LOG_FILE     Append logs to this file instead of stderr
    RUST_LOG               Log filter (default: info)

EXIT CODES:
    0  Success / Healthy
    1  Failure / Unhealthy
    2  Configuration error
    3  Connection error",
        version
    );
}
