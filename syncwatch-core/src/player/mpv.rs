//! mpv JSON IPC client
//!
//! Commands are newline-delimited JSON objects written to mpv's
//! `--input-ipc-server` socket (a named pipe on Windows). Replies carry the
//! `request_id` of the command they answer; everything else is an event.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::engine::{get_f64, PlaybackEngine};
use super::types::{PlayerError, PlayerEvent};
use crate::config::PlayerConfig;

/// Observer id used for the `pause` property
const PAUSE_OBSERVER_ID: u64 = 1;

type PendingReply = oneshot::Sender<Result<Value, PlayerError>>;

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, PendingReply>,
    /// Set once the read side is gone; no reply can arrive after that
    closed: bool,
}

struct MpvInner {
    command_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<Pending>,
    next_request_id: AtomicU64,
}

/// Handle to a running mpv instance
#[derive(Clone)]
pub struct MpvClient {
    inner: Arc<MpvInner>,
}

impl MpvClient {
    /// Connect to mpv's IPC endpoint
    pub async fn connect(
        path: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlayerEvent>), PlayerError> {
        #[cfg(unix)]
        let stream = tokio::net::UnixStream::connect(path).await?;
        #[cfg(windows)]
        let stream = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;

        debug!("Connected to mpv IPC at {}", path);
        Self::from_stream(stream)
    }

    /// Connect, retrying while the player is still creating its socket
    pub async fn connect_with_retry(
        path: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlayerEvent>), PlayerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::connect(path).await {
                Ok(connected) => return Ok(connected),
                Err(e) if attempt < attempts => {
                    debug!("mpv IPC not ready (attempt {}/{}): {}", attempt, attempts, e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive the IPC protocol over an already open stream
    pub fn from_stream<S>(
        stream: S,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlayerEvent>), PlayerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Value>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let client = Self {
            inner: Arc::new(MpvInner {
                command_tx,
                pending: Mutex::new(Pending::default()),
                next_request_id: AtomicU64::new(1),
            }),
        };

        // Writer
        tokio::spawn(async move {
            while let Some(line) = command_rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    warn!("mpv IPC write failed: {}", e);
                    break;
                }
            }
        });

        // Reader: replies go to their waiter, events to the translator
        let inner = client.inner.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let value: Value = match serde_json::from_str(&line) {
                            Ok(v) => v,
                            Err(e) => {
                                debug!("Ignoring unparseable mpv line {:?}: {}", line, e);
                                continue;
                            }
                        };
                        if value.get("event").is_some() {
                            if raw_tx.send(value).is_err() {
                                break;
                            }
                        } else if let Some(id) = value.get("request_id").and_then(Value::as_u64) {
                            route_reply(&inner, id, &value);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("mpv IPC read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("mpv IPC closed");
            // Waiters see a closed channel and report Disconnected
            let mut pending = inner.pending.lock();
            pending.closed = true;
            pending.waiters.clear();
        });

        tokio::spawn(translate_events(client.clone(), raw_rx, event_tx));

        client.command(vec![json!("observe_property"), json!(PAUSE_OBSERVER_ID), json!("pause")])?;

        Ok((client, event_rx))
    }

    /// Queue a raw command without waiting for its reply
    pub fn command(&self, args: Vec<Value>) -> Result<(), PlayerError> {
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.write(&args, id)
    }

    /// Send a command and wait for its `data`
    pub async fn request(&self, args: Vec<Value>) -> Result<Value, PlayerError> {
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Err(PlayerError::Disconnected);
            }
            pending.waiters.insert(id, tx);
        }

        if let Err(e) = self.write(&args, id) {
            self.inner.pending.lock().waiters.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| PlayerError::Disconnected)?
    }

    /// `script-message` for scripts and overlays listening inside the player
    pub fn script_message(&self, message: &str) -> Result<(), PlayerError> {
        self.command(vec![json!("script-message"), json!(message)])
    }

    fn write(&self, args: &[Value], request_id: u64) -> Result<(), PlayerError> {
        let mut line = serde_json::to_string(&json!({
            "command": args,
            "request_id": request_id,
        }))?;
        line.push('\n');
        self.inner
            .command_tx
            .send(line)
            .map_err(|_| PlayerError::Disconnected)
    }
}

fn route_reply(inner: &MpvInner, id: u64, reply: &Value) {
    let error = reply
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("success");
    let result = if error == "success" {
        Ok(reply.get("data").cloned().unwrap_or(Value::Null))
    } else {
        Err(PlayerError::Command(error.to_string()))
    };

    let waiter = inner.pending.lock().waiters.remove(&id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!("mpv command {} failed: {}", id, e);
            }
        }
    }
}

/// Turn raw mpv events into `PlayerEvent`s
async fn translate_events(
    client: MpvClient,
    mut raw_rx: mpsc::UnboundedReceiver<Value>,
    event_tx: mpsc::UnboundedSender<PlayerEvent>,
) {
    // First pause notification is mpv reporting the current value, not a change
    let mut paused: Option<bool> = None;
    let mut seeking = false;

    while let Some(raw) = raw_rx.recv().await {
        let event = match raw.get("event").and_then(Value::as_str) {
            Some("property-change") if raw.get("name").and_then(Value::as_str) == Some("pause") => {
                let Some(now) = raw.get("data").and_then(Value::as_bool) else {
                    continue;
                };
                let previous = paused.replace(now);
                match previous {
                    Some(before) if before != now => {
                        if now {
                            PlayerEvent::Paused
                        } else {
                            PlayerEvent::Resumed
                        }
                    }
                    _ => continue,
                }
            }
            Some("file-loaded") => PlayerEvent::Started,
            Some("seek") => {
                seeking = true;
                continue;
            }
            Some("playback-restart") if seeking => {
                seeking = false;
                match get_f64(&client, "time-pos").await {
                    Ok(end) => PlayerEvent::Seek { end },
                    Err(e) => {
                        warn!("Could not read position after seek: {}", e);
                        continue;
                    }
                }
            }
            Some("shutdown") => break,
            _ => continue,
        };

        if event_tx.send(event).is_err() {
            return;
        }
    }

    let _ = event_tx.send(PlayerEvent::Quit);
}

impl PlaybackEngine for MpvClient {
    fn load(&self, source: &str) -> Result<(), PlayerError> {
        self.command(vec![json!("loadfile"), json!(source), json!("replace")])
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.set_property("pause", json!(false))
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.set_property("pause", json!(true))
    }

    fn seek(&self, position: f64) -> Result<(), PlayerError> {
        self.command(vec![json!("seek"), json!(position), json!("absolute")])
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), PlayerError> {
        self.command(vec![json!("set_property"), json!(name), value])
    }

    async fn get_property(&self, name: &str) -> Result<Value, PlayerError> {
        self.request(vec![json!("get_property"), json!(name)]).await
    }
}

/// A player process started by us, killed when dropped
pub struct MpvProcess {
    child: Child,
    socket_path: String,
}

impl MpvProcess {
    pub fn spawn(config: &PlayerConfig) -> Result<Self, PlayerError> {
        #[cfg(unix)]
        {
            // A stale socket from a crashed run would accept no connections
            let _ = std::fs::remove_file(&config.socket_path);
        }

        let mut cmd = Command::new(&config.binary);
        cmd.arg("--idle=yes")
            .arg("--force-window=yes")
            .arg("--keep-open=yes")
            .arg("--input-terminal=no")
            .arg(format!("--input-ipc-server={}", config.socket_path))
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        info!(
            "Starting player: {} (socket {})",
            config.binary, config.socket_path
        );
        let child = cmd
            .spawn()
            .map_err(|e| PlayerError::Spawn(format!("{}: {}", config.binary, e)))?;

        Ok(Self {
            child,
            socket_path: config.socket_path.clone(),
        })
    }

    /// Spawn the player and connect to it
    pub async fn launch(
        config: &PlayerConfig,
    ) -> Result<(Self, MpvClient, mpsc::UnboundedReceiver<PlayerEvent>), PlayerError> {
        let mut process = Self::spawn(config)?;
        let delay = Duration::from_millis(config.connect_delay_ms);

        match MpvClient::connect_with_retry(&process.socket_path, config.connect_attempts, delay)
            .await
        {
            Ok((client, events)) => Ok((process, client, events)),
            Err(e) => {
                if let Ok(Some(status)) = process.child.try_wait() {
                    return Err(PlayerError::Spawn(format!(
                        "{} exited with {}",
                        config.binary, status
                    )));
                }
                Err(e)
            }
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    pub async fn kill(&mut self) -> Result<(), PlayerError> {
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::time::timeout;

    struct FakeMpv {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeMpv {
        async fn next_command(&mut self) -> Value {
            let line = timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn emit(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn connect() -> (MpvClient, mpsc::UnboundedReceiver<PlayerEvent>, FakeMpv) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (client, events) = MpvClient::from_stream(ours).unwrap();
        let (read_half, writer) = tokio::io::split(theirs);
        let fake = FakeMpv {
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        (client, events, fake)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> PlayerEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_observes_pause_on_connect() {
        let (_client, _events, mut mpv) = connect();
        let cmd = mpv.next_command().await;
        assert_eq!(cmd["command"], json!(["observe_property", 1, "pause"]));
    }

    #[tokio::test]
    async fn test_commands_are_written_as_json_lines() {
        let (client, _events, mut mpv) = connect();
        mpv.next_command().await;

        client.load("/tmp/a.mkv").unwrap();
        client.pause().unwrap();
        client.seek(42.5).unwrap();

        assert_eq!(
            mpv.next_command().await["command"],
            json!(["loadfile", "/tmp/a.mkv", "replace"])
        );
        assert_eq!(
            mpv.next_command().await["command"],
            json!(["set_property", "pause", true])
        );
        assert_eq!(
            mpv.next_command().await["command"],
            json!(["seek", 42.5, "absolute"])
        );
    }

    #[tokio::test]
    async fn test_get_property_round_trip() {
        let (client, _events, mut mpv) = connect();
        mpv.next_command().await;

        let query = tokio::spawn(async move { client.get_property("time-pos").await });
        let cmd = mpv.next_command().await;
        assert_eq!(cmd["command"], json!(["get_property", "time-pos"]));
        let id = cmd["request_id"].as_u64().unwrap();
        mpv.emit(json!({"request_id": id, "error": "success", "data": 12.34}))
            .await;

        assert_eq!(query.await.unwrap().unwrap(), json!(12.34));
    }

    #[tokio::test]
    async fn test_get_property_error() {
        let (client, _events, mut mpv) = connect();
        mpv.next_command().await;

        let query = tokio::spawn(async move { client.get_property("time-pos").await });
        let id = mpv.next_command().await["request_id"].as_u64().unwrap();
        mpv.emit(json!({"request_id": id, "error": "property unavailable"}))
            .await;

        assert!(matches!(
            query.await.unwrap(),
            Err(PlayerError::Command(msg)) if msg == "property unavailable"
        ));
    }

    #[tokio::test]
    async fn test_pause_changes_become_events() {
        let (_client, mut events, mut mpv) = connect();
        mpv.next_command().await;

        // initial value, no event
        mpv.emit(json!({"event": "property-change", "id": 1, "name": "pause", "data": false}))
            .await;
        mpv.emit(json!({"event": "file-loaded"})).await;
        mpv.emit(json!({"event": "property-change", "id": 1, "name": "pause", "data": true}))
            .await;
        mpv.emit(json!({"event": "property-change", "id": 1, "name": "pause", "data": false}))
            .await;

        assert_eq!(next_event(&mut events).await, PlayerEvent::Started);
        assert_eq!(next_event(&mut events).await, PlayerEvent::Paused);
        assert_eq!(next_event(&mut events).await, PlayerEvent::Resumed);
    }

    #[tokio::test]
    async fn test_seek_reports_end_position() {
        let (_client, mut events, mut mpv) = connect();
        mpv.next_command().await;

        mpv.emit(json!({"event": "seek"})).await;
        mpv.emit(json!({"event": "playback-restart"})).await;

        let cmd = mpv.next_command().await;
        assert_eq!(cmd["command"], json!(["get_property", "time-pos"]));
        let id = cmd["request_id"].as_u64().unwrap();
        mpv.emit(json!({"request_id": id, "error": "success", "data": 90.5}))
            .await;

        assert_eq!(next_event(&mut events).await, PlayerEvent::Seek { end: 90.5 });
    }

    #[tokio::test]
    async fn test_shutdown_and_eof_mean_quit() {
        let (_client, mut events, mut mpv) = connect();
        mpv.next_command().await;
        mpv.emit(json!({"event": "shutdown"})).await;
        assert_eq!(next_event(&mut events).await, PlayerEvent::Quit);

        let (_client, mut events, mpv) = connect();
        drop(mpv);
        assert_eq!(next_event(&mut events).await, PlayerEvent::Quit);
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_player_goes_away() {
        let (client, _events, mut mpv) = connect();
        mpv.next_command().await;

        let query = tokio::spawn(async move { client.get_property("pause").await });
        mpv.next_command().await;
        drop(mpv);

        assert!(matches!(query.await.unwrap(), Err(PlayerError::Disconnected)));
    }
}
