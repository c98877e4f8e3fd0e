//! hijack - TCP tunnel over a streaming RPC connection
//!
//! `serve` runs the dialer side, `connect` runs the local ingress side and `hello`
//! checks that an RPC server is reachable.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hijack_transport_h2::{H2Config, RpcClient, RpcServer};
use hijack_tunnel::{Dialer, DialerConfig, IngressConfig, IngressListener, PumpConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{
    build_connect_settings, build_serve_settings, resolve_listen_addr, validate_address,
    ConfigFile, ConnectArgs, ServeArgs,
};

/// hijack - Tunnel TCP connections through a streaming RPC channel
#[derive(Parser, Debug)]
#[command(name = "hijack")]
#[command(about = "hijack - Tunnel TCP connections through a streaming RPC channel")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "HIJACK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Configuration file (YAML)
    #[arg(long, short = 'c', global = true, env = "HIJACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept tunnel streams and dial the destination each one names
    #[command(long_about = r#"
Run the RPC server side of the tunnel. Every incoming tunnel stream carries
connect_ip / connect_port metadata; the server dials that destination and
relays bytes until either side closes.

EXAMPLES:
  # Listen for tunnel clients on the default address
  hijack serve

  # Listen on all interfaces with a larger read buffer
  hijack serve --listen 0.0.0.0:9990 --buffer-size 32768

ENVIRONMENT VARIABLES:
  HIJACK_LISTEN          RPC listen address
  HIJACK_BUFFER_SIZE     Read buffer per session (bytes)
  HIJACK_DIAL_TIMEOUT    Destination dial timeout (seconds)
  HIJACK_SHUTDOWN_GRACE  Session drain window (milliseconds)
    "#)]
    Serve {
        /// RPC listen address (default 127.0.0.1:9990)
        #[arg(long, env = "HIJACK_LISTEN")]
        listen: Option<String>,

        /// Read buffer per session in bytes (default 10000)
        #[arg(long, env = "HIJACK_BUFFER_SIZE")]
        buffer_size: Option<usize>,

        /// Destination dial timeout in seconds (default 10)
        #[arg(long, env = "HIJACK_DIAL_TIMEOUT")]
        dial_timeout: Option<u64>,

        /// Session drain window in milliseconds (default 2000)
        #[arg(long, env = "HIJACK_SHUTDOWN_GRACE")]
        shutdown_grace: Option<u64>,
    },

    /// Expose a local TCP endpoint that tunnels every connection to a destination
    #[command(long_about = r#"
Connect to a tunnel server, check it with the handshake call, then listen
locally. Each accepted TCP connection is relayed over its own tunnel stream
to the destination, which the server dials on our behalf.

EXAMPLES:
  # Reach the server's SSH daemon through local port 9991
  hijack connect --server tunnel.example.com:9990 --destination localhost:22

  # Use a config file, overriding the destination
  hijack connect -c hijack.yaml --destination 10.0.0.5:5432

ENVIRONMENT VARIABLES:
  HIJACK_SERVER             RPC server address
  HIJACK_NAME               Name sent in the handshake
  HIJACK_LOCAL_ADDRESS      Local listen address
  HIJACK_DESTINATION        Destination address (host:port)
  HIJACK_BUFFER_SIZE        Read buffer per session (bytes)
  HIJACK_HANDSHAKE_TIMEOUT  Handshake deadline (milliseconds)
  HIJACK_SHUTDOWN_GRACE     Session drain window (milliseconds)
    "#)]
    Connect {
        /// RPC server address (default localhost:9990)
        #[arg(long, env = "HIJACK_SERVER")]
        server: Option<String>,

        /// Name sent in the handshake (default "client")
        #[arg(long, env = "HIJACK_NAME")]
        name: Option<String>,

        /// Local address to listen on (default 127.0.0.1:9991)
        #[arg(long, env = "HIJACK_LOCAL_ADDRESS")]
        local_address: Option<String>,

        /// Destination for the server to dial (default localhost:2222)
        #[arg(long, env = "HIJACK_DESTINATION")]
        destination: Option<String>,

        /// Read buffer per session in bytes (default 4096)
        #[arg(long, env = "HIJACK_BUFFER_SIZE")]
        buffer_size: Option<usize>,

        /// Handshake deadline in milliseconds (default 1000)
        #[arg(long, env = "HIJACK_HANDSHAKE_TIMEOUT")]
        handshake_timeout: Option<u64>,

        /// Session drain window in milliseconds (default 2000)
        #[arg(long, env = "HIJACK_SHUTDOWN_GRACE")]
        shutdown_grace: Option<u64>,
    },

    /// Send the handshake call and print the reply
    Hello {
        /// RPC server address
        #[arg(long, env = "HIJACK_SERVER", default_value = config::DEFAULT_SERVER_ADDRESS)]
        server: String,

        /// Name to greet with
        #[arg(long, env = "HIJACK_NAME", default_value = config::DEFAULT_CLIENT_NAME)]
        name: String,

        /// Handshake deadline in milliseconds
        #[arg(long, env = "HIJACK_HANDSHAKE_TIMEOUT", default_value = "1000")]
        handshake_timeout: u64,
    },
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str, verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { log_level };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Completes on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

async fn run_serve(args: ServeArgs, file: &ConfigFile) -> Result<()> {
    let settings =
        build_serve_settings(args, file).context("Failed to build server configuration")?;

    info!("Listen address: {}", settings.listen);
    info!("Read buffer: {} bytes", settings.buffer_size);
    info!("Dial timeout: {:?}", settings.dial_timeout);

    let listen_addr = resolve_listen_addr(&settings.listen).await?;
    let dialer_config = DialerConfig::default()
        .with_connect_timeout(settings.dial_timeout)
        .with_pump(PumpConfig::new(settings.buffer_size).with_shutdown_grace(settings.shutdown_grace));
    dialer_config
        .validate()
        .context("Invalid server configuration")?;

    let server = RpcServer::bind(listen_addr, Arc::new(H2Config::server_default()))
        .await
        .context("Failed to start RPC server")?;

    info!("Tunnel server ready on {}", server.local_addr()?);

    server
        .serve_with_shutdown(Arc::new(Dialer::new(dialer_config)), shutdown_signal())
        .await
        .context("RPC server failed")?;

    info!("Tunnel server stopped");
    Ok(())
}

async fn run_connect(args: ConnectArgs, file: &ConfigFile) -> Result<()> {
    let settings =
        build_connect_settings(args, file).context("Failed to build client configuration")?;

    info!("Server: {}", settings.server);
    info!("Local address: {}", settings.listen);
    info!("Destination: {}", settings.destination);

    let h2_config = H2Config::client_default().with_handshake_timeout(settings.handshake_timeout);
    let client = RpcClient::connect(&settings.server, Arc::new(h2_config))
        .await
        .with_context(|| format!("Failed to connect to RPC server {}", settings.server))?;

    let reply = client
        .hello(&settings.name)
        .await
        .context("Handshake with RPC server failed")?;
    info!("Greeting: {}", reply.name);

    let listen_addr = resolve_listen_addr(&settings.listen).await?;
    let ingress_config = IngressConfig::new(listen_addr, settings.destination).with_pump(
        PumpConfig::new(settings.buffer_size).with_shutdown_grace(settings.shutdown_grace),
    );

    let client = Arc::new(client);
    let handle = IngressListener::new(ingress_config, client.clone())
        .start()
        .await
        .context("Failed to start local listener")?;

    info!("Tunnel ready, connect to {}", handle.local_addr());

    // Stop once the RPC connection is gone
    let result = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        _ = client.closed() => Err(anyhow::anyhow!(
            "Lost connection to RPC server {}",
            settings.server
        )),
    };

    if let Err(e) = handle.shutdown().await {
        warn!("Local listener did not stop cleanly: {}", e);
    }

    info!("Tunnel client stopped");
    result
}

async fn run_hello(server: String, name: String, handshake_timeout: u64) -> Result<()> {
    validate_address(&server, "server")?;

    let h2_config =
        H2Config::client_default().with_handshake_timeout(Duration::from_millis(handshake_timeout));
    let client = RpcClient::connect(&server, Arc::new(h2_config))
        .await
        .with_context(|| format!("Failed to connect to RPC server {}", server))?;

    let reply = client.hello(&name).await.context("Could not greet")?;
    println!("{}", reply.name);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(&cli.log_level, cli.verbose)?;

    let file = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ConfigFile::load(path)?
        }
        None => ConfigFile::default(),
    };

    let result = match cli.command {
        Commands::Serve {
            listen,
            buffer_size,
            dial_timeout,
            shutdown_grace,
        } => {
            info!("hijack server starting...");
            let args = ServeArgs {
                listen,
                buffer_size,
                dial_timeout_secs: dial_timeout,
                shutdown_grace_ms: shutdown_grace,
            };
            run_serve(args, &file).await
        }
        Commands::Connect {
            server,
            name,
            local_address,
            destination,
            buffer_size,
            handshake_timeout,
            shutdown_grace,
        } => {
            info!("hijack client starting...");
            let args = ConnectArgs {
                server,
                name,
                listen: local_address,
                destination,
                buffer_size,
                handshake_timeout_ms: handshake_timeout,
                shutdown_grace_ms: shutdown_grace,
            };
            run_connect(args, &file).await
        }
        Commands::Hello {
            server,
            name,
            handshake_timeout,
        } => run_hello(server, name, handshake_timeout).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
