//! Magnet link handling
//!
//! Torrents are not resolved here. The magnet URL is handed to an external
//! streaming program (webtorrent-cli by default) which plays it itself.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::TorrentConfig;

/// Receives magnet URLs the player cannot open directly
pub trait TorrentHandler: Send + Sync {
    /// Fire-and-forget
    fn start(&self, magnet: &str);
}

pub fn is_magnet(url: &str) -> bool {
    url.trim_start().starts_with("magnet:")
}

/// Launches `program [args..] <magnet>`
#[derive(Debug, Clone)]
pub struct CommandTorrentHandler {
    program: String,
    args: Vec<String>,
}

impl CommandTorrentHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &TorrentConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    /// Start the streaming program and reap it in the background
    pub fn launch(&self, magnet: &str) -> std::io::Result<()> {
        info!("Handing magnet link to {}", self.program);

        let mut child = Command::new(&self.program)
            .arg(magnet)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
                Ok(_) => {}
                Err(e) => warn!("Failed to wait for {}: {}", program, e),
            }
        });
        Ok(())
    }
}

impl TorrentHandler for CommandTorrentHandler {
    fn start(&self, magnet: &str) {
        if let Err(e) = self.launch(magnet) {
            warn!("Failed to start {}: {}", self.program, e);
        }
    }
}

/// Remembers every magnet it was given, for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingTorrentHandler {
    pub started: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl TorrentHandler for RecordingTorrentHandler {
    fn start(&self, magnet: &str) {
        self.started.lock().push(magnet.to_string());
    }
}
