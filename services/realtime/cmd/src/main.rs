//! Realtime messaging client binary.
//!
//! Logs in (or resumes a stored session), keeps the realtime link up, prints
//! inbound activity and reads commands from stdin.

use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod context;
mod logging;

use commands::{parse_command, HELP};
use config::ClientConfig;
use context::ClientContext;
use logging::RealtimeLogFormatter;

/// Realtime session and messaging client
#[derive(Parser, Debug)]
#[command(name = "spark-realtime", version, about = "Realtime session and messaging client")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Application origin, e.g. https://app.example.com (overrides config)
    #[arg(long)]
    origin: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable colored log output
    #[arg(long)]
    no_color: bool,

    /// Account email; resumes the stored session when omitted
    #[arg(long, requires = "password")]
    email: Option<String>,

    /// Account password
    #[arg(long, requires = "email", env = "REALTIME_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Reconnect delay, e.g. 3s (overrides config)
    #[arg(long)]
    reconnect_delay: Option<humantime::Duration>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("spark_realtime={}", args.log_level).parse()?)
        .add_directive(format!("realtime_auth={}", args.log_level).parse()?)
        .add_directive(format!("realtime_connection={}", args.log_level).parse()?)
        .add_directive(format!("realtime_storage={}", args.log_level).parse()?)
        .add_directive(format!("realtime_wire={}", args.log_level).parse()?);

    let mut formatter = RealtimeLogFormatter::new("spark-realtime");
    if args.no_color {
        formatter = formatter.without_color();
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(!args.no_color)
        .event_format(formatter)
        .init();

    info!("Starting spark-realtime v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(origin) = args.origin {
        info!("Origin overridden by command line: {}", origin);
        config.origin = origin;
    }
    if let Some(delay) = args.reconnect_delay {
        config.connection.reconnect_delay = delay.into();
    }

    let mut context = ClientContext::new(&config).await?;
    context.spawn_watchers();

    if !context
        .sign_in(args.email.as_deref(), args.password.as_deref())
        .await?
    {
        context.shutdown().await;
        anyhow::bail!("not signed in");
    }
    info!("Signed in; {}", HELP);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
                break;
            }

            _ = sigint.recv() => {
                info!("Received SIGINT signal");
                break;
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        break;
                    }
                };

                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if !context.execute(command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
        }
    }

    context.shutdown().await;
    Ok(())
}
