use anyhow::Context;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr};
use turnstile::{PoolConfig, ServerConfig};

/// Protocol served on every accepted connection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Writes every received line back to the client.
    Echo,
    /// Reads and drops everything the client sends.
    Discard,
}

/// Output format of the log subscriber.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-friendly output.
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Runtime configuration for the `turnstile-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a small service.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "turnstile-server",
    version,
    about = "A TCP server dispatching connections to a bounded worker pool"
)]
pub struct CliArgs {
    /// Interface to listen on.
    ///
    /// Environment variable: `SERVER_HOST`
    #[arg(long, env = "SERVER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on. `0` picks an ephemeral port.
    ///
    /// Environment variable: `SERVER_PORT`
    #[arg(long, env = "SERVER_PORT", default_value_t = 7878)]
    pub port: u16,

    /// Maximum number of pending connections queued by the OS.
    ///
    /// Environment variable: `BACKLOG`
    #[arg(long, env = "BACKLOG", default_value_t = turnstile::config::DEFAULT_BACKLOG)]
    pub backlog: i32,

    /// Number of workers kept alive even when idle.
    ///
    /// Environment variable: `MIN_WORKERS`
    #[arg(long, env = "MIN_WORKERS", default_value_t = turnstile::config::DEFAULT_MIN_WORKERS)]
    pub min_workers: usize,

    /// Upper bound on concurrently served connections. Connections beyond it
    /// wait in the queue.
    ///
    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS", default_value_t = turnstile::config::DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,

    /// Idle time, in milliseconds, after which workers above the minimum
    /// retire.
    ///
    /// Environment variable: `KEEP_ALIVE_MS`
    #[arg(long, env = "KEEP_ALIVE_MS", default_value_t = 3_000)]
    pub keep_alive_ms: u64,

    /// Upper bound, in seconds, on how long shutdown waits for accepted
    /// connections. `0` waits until all of them are handled.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 0)]
    pub drain_timeout_secs: u64,

    /// Pause, in milliseconds, before accepting again when the process runs
    /// out of file descriptors.
    ///
    /// Environment variable: `ACCEPT_BACKOFF_MS`
    #[arg(long, env = "ACCEPT_BACKOFF_MS", default_value_t = 100)]
    pub accept_backoff_ms: u64,

    /// Protocol handler.
    ///
    /// Environment variable: `HANDLER`
    #[arg(long, env = "HANDLER", value_enum, default_value_t = HandlerKind::Echo)]
    pub handler: HandlerKind,

    /// Log output format. Filtering follows `RUST_LOG` (default `info`).
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub handler: HandlerKind,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let pool = PoolConfig::new(
            args.min_workers,
            args.max_workers,
            Duration::from_millis(args.keep_alive_ms),
        )
        .context("invalid MIN_WORKERS / MAX_WORKERS")?;
        let drain_timeout =
            (args.drain_timeout_secs > 0).then(|| Duration::from_secs(args.drain_timeout_secs));

        let server = ServerConfig::new(args.port)
            .with_host(args.host)
            .with_backlog(args.backlog)
            .with_pool(pool)
            .with_drain_timeout(drain_timeout)
            .with_accept_backoff(Duration::from_millis(args.accept_backoff_ms));
        server.validate().context("invalid BACKLOG")?;

        Ok(Self {
            server,
            handler: args.handler,
            log_format: args.log_format,
        })
    }
}
