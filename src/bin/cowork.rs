//! CoWork OS launcher: starts the Control Plane and Webhook server against
//! a workspace directory. Structured the way `agenticlaw.rs` lays out its
//! `Cli`/`Commands` pair, trimmed to the one thing this binary does: serve.

use clap::{Parser, Subcommand};
use cowork_core::{AuthConfig, AuthMode, BindMode, GatewayConfig};
use cowork_gateway::{start_gateway, ExtendedConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cowork", about = "CoWork OS agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory the agent is permitted to operate against.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Control Plane / Webhook listen port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// `loopback` (127.0.0.1 only) or `lan` (0.0.0.0).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Shared secret required on the `connect` handshake and webhook calls.
    /// Falls back to `COWORK_TOKEN`.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Disable token authentication entirely. Only safe with `--bind loopback`.
    #[arg(long, global = true)]
    no_auth: bool,

    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Control Plane and Webhook server. The default when no
    /// subcommand is given.
    Serve,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref());

    match cli.command.take().unwrap_or(Commands::Serve) {
        Commands::Version => {
            println!("cowork {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Serve => serve(cli).await,
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    let workspace_root = resolve_workspace(cli.workspace)?;
    let bind = match cli.bind.as_deref() {
        Some("loopback") => BindMode::Loopback,
        Some("lan") | None => BindMode::Lan,
        Some(other) => anyhow::bail!("unknown --bind mode '{other}', expected 'loopback' or 'lan'"),
    };

    let token = cli.token.or_else(|| std::env::var("COWORK_TOKEN").ok());
    let auth = AuthConfig { mode: if cli.no_auth { AuthMode::None } else { AuthMode::Token }, token };

    let port = cli.port.or_else(|| std::env::var("COWORK_PORT").ok().and_then(|p| p.parse().ok())).unwrap_or(7337);

    let config = ExtendedConfig {
        gateway: GatewayConfig { port, bind, auth },
        anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
        workspace_root,
        system_prompt: None,
    };

    start_gateway(config).await
}

fn resolve_workspace(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let path = explicit
        .or_else(|| std::env::var("COWORK_WORKSPACE").ok().map(PathBuf::from))
        .unwrap_or_else(|| std::env::current_dir().expect("current directory must be readable"));
    std::fs::create_dir_all(&path)?;
    Ok(path.canonicalize()?)
}

fn init_tracing(log_file: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("cowork.log"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
            None
        }
    }
}
