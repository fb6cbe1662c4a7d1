//! syncwatch - watch videos together
//!
//! Starts mpv, opens a room and keeps play/pause/seek/source in sync with
//! everyone else in it.
//!
//! Usage:
//!   syncwatch create [SOURCE]           # prints a syncwatch:// link to share
//!   syncwatch join syncwatch://room-... # join someone else's room
//!
//! While running, type `source <url>`, `title <text>` or `quit`.

mod input;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use syncwatch_core::display::{Displays, LogDisplay, PlayerOverlay, StatusDisplay};
use syncwatch_core::network::{NetworkManager, NtfySignalStore};
use syncwatch_core::player::{MpvProcess, PlaybackEngineAdapter};
use syncwatch_core::torrent::CommandTorrentHandler;
use syncwatch_core::{
    Config, CoordinatorCommand, EventDeduplicator, RoomLink, RunOutcome, SessionChannel,
    SyncCoordinator,
};

const DEFAULT_LOG_FILTER: &str = "syncwatch_core=debug,syncwatch=info,libp2p_gossipsub=info";

#[derive(Parser, Debug)]
#[command(name = "syncwatch")]
#[command(about = "Watch videos in sync with friends")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SYNCWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Name shown to the other peers
    #[arg(long)]
    display_name: Option<String>,

    /// mpv binary to launch
    #[arg(long)]
    player: Option<String>,

    /// ntfy server used for signaling
    #[arg(long)]
    signaling_url: Option<String>,

    /// Seconds within which two positions count as the same
    #[arg(long)]
    tolerance: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a room and print its link
    Create {
        /// File, URL or magnet link to start with
        source: Option<String>,
    },
    /// Join a room by link or room id
    Join { link: RoomLink },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.display_name {
            config.display_name = name.clone();
        }
        if let Some(player) = &self.player {
            config.player.binary = player.clone();
        }
        if let Some(url) = &self.signaling_url {
            config.signaling.url = url.clone();
        }
        if let Some(tolerance) = self.tolerance {
            config.sync.position_tolerance = tolerance;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    let (mut player, mpv, player_events) = MpvProcess::launch(&config.player)
        .await
        .with_context(|| format!("Failed to start {}", config.player.binary))?;

    let mut displays = Displays::new().with(Arc::new(LogDisplay));
    if config.player.overlay {
        displays = displays.with(Arc::new(PlayerOverlay::new(mpv.clone())));
    }
    let display: Arc<dyn StatusDisplay> = Arc::new(displays);

    let adapter = PlaybackEngineAdapter::new(
        Arc::new(mpv),
        Arc::new(CommandTorrentHandler::from_config(&config.torrent)),
        display.clone(),
    );

    let (network, network_events) = NetworkManager::with_config(config.network.clone()).start();
    let channel = SessionChannel::new(
        Arc::new(NtfySignalStore::new(&config.signaling)),
        Box::new(network),
        display.clone(),
        config.display_name.clone(),
    );

    let mut coordinator = SyncCoordinator::new(
        adapter,
        channel,
        EventDeduplicator::with_tolerance(config.sync.position_tolerance),
        display,
    );

    match cli.command {
        Command::Create { source } => {
            let link = coordinator.create_room().await.context("Failed to create room")?;
            println!("{}", link);
            if let Some(source) = source {
                coordinator.set_source(&source, true);
            }
        }
        Command::Join { link } => {
            coordinator
                .join_room(&link)
                .await
                .with_context(|| format!("Failed to join {}", link))?;
        }
    }

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_commands(command_tx));

    match coordinator.run(player_events, network_events, command_rx).await {
        RunOutcome::PlayerQuit => {
            info!("Player closed, exiting");
            std::process::exit(0);
        }
        RunOutcome::Shutdown => {
            if let Err(e) = player.kill().await {
                warn!("Failed to stop player: {}", e);
            }
            Ok(())
        }
        RunOutcome::NetworkClosed => anyhow::bail!("Network stopped unexpectedly"),
    }
}

/// Forward stdin lines as coordinator commands
async fn read_commands(command_tx: mpsc::UnboundedSender<CoordinatorCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match input::parse_command(&line) {
                Ok(Some(command)) => {
                    if command_tx.send(command).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{}", message),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
    // No more input; keep the session running until it ends by itself
    command_tx.closed().await;
}
