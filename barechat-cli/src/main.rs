use anyhow::{Context, Result};
use barechat_core::config::{Config, ControlConfig, DEFAULT_STORE_PATH};
use barechat_core::core_control::ControlChannel;
use barechat_core::core_swarm::TcpSwarm;
use barechat_core::host::SessionHost;
use barechat_core::logging::{init_logging_with_config, LogConfig};
use barechat_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use barechat_core::store::FileLogStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

mod terminal;

/// Size of the in-process pipe between the terminal and the host
const PIPE_SIZE: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "barechat")]
#[command(author, version, about = "Terminal chat over a peer-to-peer swarm", long_about = None)]
struct Args {
    /// Room to join: a 64-character hex topic or any room name. A new random
    /// room is created when omitted.
    topic: Option<String>,

    /// Save the chat transcript (default path: ./barechat.txt)
    #[arg(long, value_name = "PATH")]
    store: Option<Option<String>>,

    /// Peers to dial when joining (host:port, comma separated)
    #[arg(long, value_delimiter = ',', value_name = "ADDRS")]
    bootstrap: Vec<String>,

    /// Address to accept peer connections on
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Serve the control channel on a Unix socket (default: temp dir)
    #[arg(long, value_name = "PATH")]
    socket: Option<Option<String>>,

    /// Load settings from a TOML file
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message through a running session's control socket
    Send {
        /// Message text
        message: String,

        /// Control socket of the running session
        #[arg(long, value_name = "PATH")]
        socket: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let log_config = LogConfig::from_settings(&config.logging)?;
    init_logging_with_config(log_config)?;

    match args.command {
        Some(Command::Send { message, socket }) => {
            let path = socket
                .map(|p| expand(&p))
                .or_else(|| config.control.socket_path.clone())
                .unwrap_or_else(ControlConfig::default_socket_path);
            send_once(path, &message, &config.control).await
        }
        None => run_chat(args.topic.unwrap_or_default(), config).await,
    }
}

/// Defaults, then the config file, then `BARECHAT_*`, then flags
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(expand(path))
            .with_context(|| format!("Failed to load config file {}", path))?,
        None => Config::default(),
    };
    config.apply_env()?;

    if !args.bootstrap.is_empty() {
        config.swarm.bootstrap = args.bootstrap.clone();
    }
    if let Some(addr) = &args.listen {
        config.swarm.listen_address = addr.clone();
    }
    if let Some(store) = &args.store {
        let path = store.as_deref().unwrap_or(DEFAULT_STORE_PATH);
        config.store.log_path = Some(expand(path));
    }
    if let Some(socket) = &args.socket {
        config.control.socket_path = Some(match socket {
            Some(path) => expand(path),
            None => ControlConfig::default_socket_path(),
        });
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.to_lowercase();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate()?;
    Ok(config)
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

async fn run_chat(topic: String, config: Config) -> Result<()> {
    let (swarm, swarm_events) = TcpSwarm::new(config.swarm.clone());
    let store = match &config.store.log_path {
        Some(path) => FileLogStore::new(path),
        None => FileLogStore::disabled(),
    };

    let mut host =
        SessionHost::new(Arc::new(swarm), swarm_events, config.clone()).with_log_store(store);

    let (host_end, terminal_end) = tokio::io::duplex(PIPE_SIZE);
    host.attach_control(host_end);

    let coordinator = Arc::new(ShutdownCoordinator::new());
    install_signal_handlers(coordinator.clone());

    if let Some(path) = &config.control.socket_path {
        socket::serve(path.clone(), host.handle(), coordinator.subscribe())?;
    }

    let host_task = tokio::spawn(host.run(coordinator.subscribe()));

    let (control, requests) = ControlChannel::spawn(terminal_end, &config.control);
    tokio::spawn(terminal::print_notices(requests));

    let created = topic.is_empty();
    let outcome = control.join_room(&topic).await?;
    println!("{}", terminal::render_join(&outcome, created));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown = coordinator.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match control.send_message(&line).await {
                        Ok(reply) if reply.ok => {}
                        Ok(reply) => println!(
                            "[info] Not sent: {}",
                            reply.error.unwrap_or_else(|| "unknown error".to_string())
                        ),
                        Err(e) => warn!(error = %e, "Failed to send message"),
                    },
                    None => {
                        info!("Input closed");
                        coordinator.shutdown().await;
                        break;
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    if let Some(path) = host_task.await?? {
        println!("[info] Chat log saved to {}", path.display());
    }
    coordinator.mark_complete().await;

    Ok(())
}

async fn send_once(path: PathBuf, message: &str, config: &ControlConfig) -> Result<()> {
    let stream = socket::connect(&path).await?;
    let (control, _requests) = ControlChannel::spawn(stream, config);

    let reply = control.send_message(message).await?;
    if !reply.ok {
        anyhow::bail!(
            "Message not sent: {}",
            reply.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    println!("Message sent");
    Ok(())
}

#[cfg(unix)]
mod socket {
    use anyhow::{Context, Result};
    use barechat_core::host::HostHandle;
    use barechat_core::shutdown::ShutdownSignal;
    use std::path::{Path, PathBuf};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::sync::broadcast;
    use tracing::{debug, info, warn};

    /// Accept front-ends on `path` until shutdown
    pub fn serve(
        path: PathBuf,
        handle: HostHandle,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Failed to bind control socket {}", path.display()))?;
        info!(path = %path.display(), "Control socket listening");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            debug!("Front-end connected");
                            handle.attach_control(stream);
                        }
                        Err(e) => warn!(error = %e, "Failed to accept front-end"),
                    },
                    _ = shutdown.recv() => break,
                }
            }

            if let Err(e) = std::fs::remove_file(&path) {
                debug!(error = %e, "Socket file already gone");
            }
        });

        Ok(())
    }

    pub async fn connect(path: &Path) -> Result<UnixStream> {
        UnixStream::connect(path)
            .await
            .with_context(|| format!("No session listening on {}", path.display()))
    }
}

#[cfg(not(unix))]
mod socket {
    use anyhow::Result;
    use barechat_core::host::HostHandle;
    use barechat_core::shutdown::ShutdownSignal;
    use std::path::{Path, PathBuf};
    use tokio::io::DuplexStream;
    use tokio::sync::broadcast;

    pub fn serve(
        _path: PathBuf,
        _handle: HostHandle,
        _shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<()> {
        anyhow::bail!("Control sockets are only available on unix platforms")
    }

    pub async fn connect(_path: &Path) -> Result<DuplexStream> {
        anyhow::bail!("Control sockets are only available on unix platforms")
    }
}
