//! Entry point for `rdp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, writing the fetched file).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use rdp_over_udp::resource::{is_not_found, DirStore};
use rdp_over_udp::{client, Client, LogSink, Server, Socket, TimerConfig};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    timing: Timing,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a server, serving files one connection at a time.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Directory resources are served from.
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
    /// Run as a client, fetching one resource from a server.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Name of the resource to request.
        #[arg(short, long)]
        resource: String,
        /// Where to write the content; defaults to `RDP_RESULT_<resource>`.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Local address to bind; an ephemeral port by default.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
}

#[derive(Args)]
struct Timing {
    /// Per-attempt acknowledgment timeout, in milliseconds.
    #[arg(long, global = true, default_value_t = 2000)]
    ack_timeout_ms: u64,
    /// Retransmissions after the first send.
    #[arg(long, global = true, default_value_t = 5)]
    retries: u32,
    /// Server read timeout while a connection is live, in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    connection_timeout_ms: u64,
}

impl Timing {
    fn config(&self) -> TimerConfig {
        TimerConfig::default()
            .with_ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .with_retry_budget(self.retries)
            .with_connection_timeout(Duration::from_millis(self.connection_timeout_ms))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let timers = cli.timing.config();

    match cli.mode {
        Mode::Server { bind, root } => {
            log::info!("Starting server on {bind}, serving {}", root.display());
            let server = Server::bind(bind, DirStore::new(root), timers, LogSink).await?;
            server.serve().await?;
        }
        Mode::Client {
            server,
            resource,
            output,
            bind,
        } => {
            log::info!("Starting client, fetching '{resource}' from {server}");
            let content = match bind {
                Some(local) => {
                    let socket = Socket::bind(local).await?;
                    async {
                        Client::connect(socket, server, timers, LogSink)
                            .await?
                            .fetch(&resource)
                            .await
                    }
                    .await
                }
                None => client::fetch(server, &resource, timers, LogSink).await,
            }
            .with_context(|| format!("unable to retrieve '{resource}' from {server}"))?;

            if is_not_found(&content) {
                bail!("{}", String::from_utf8_lossy(&content));
            }

            let output = output.unwrap_or_else(|| default_output(&resource));
            std::fs::write(&output, &content)
                .with_context(|| format!("writing {}", output.display()))?;
            log::info!("Created '{}' ({} bytes)", output.display(), content.len());
        }
    }

    Ok(())
}

/// `RDP_RESULT_<file name>` in the working directory.
fn default_output(resource: &str) -> PathBuf {
    let name = std::path::Path::new(resource)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| resource.replace('/', "_"));
    PathBuf::from(format!("RDP_RESULT_{name}"))
}
