/// mpv IPC driver with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → logged and dropped
/// ```
///
/// `MpvEngine` wraps the driver behind the `AudioEngine` trait and respawns
/// mpv on the next call if the process has died.
use async_trait::async_trait;
use piradio_core::config::Config;
use piradio_core::engine::AudioEngine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Launch options derived from the `[engine]` and `[volume]` config sections.
#[derive(Debug, Clone)]
pub struct MpvOptions {
    pub initial_volume: i32,
    pub volume_max: i32,
    pub network_caching_ms: u64,
    pub audio_device: Option<String>,
}

impl MpvOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_volume: config.volume.default,
            volume_max: config.volume.max,
            network_caching_ms: config.engine.network_caching_ms,
            audio_device: config.engine.audio_device.clone(),
        }
    }

    fn args(&self) -> Vec<String> {
        // mpv refuses --volume-max below 100.
        let volume_max = self.volume_max.max(100);
        let mut args = vec![
            "--no-video".to_string(),
            "--idle=yes".to_string(),
            piradio_core::platform::mpv_socket_arg(),
            "--quiet".to_string(),
            format!("--volume-max={}", volume_max),
            format!("--volume={}", self.initial_volume.clamp(0, volume_max)),
            format!(
                "--cache-secs={:.3}",
                self.network_caching_ms as f64 / 1000.0
            ),
        ];
        if let Some(device) = &self.audio_device {
            args.push(format!("--audio-device={}", device));
        }
        args
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    options: MpvOptions,
}

impl MpvDriver {
    pub fn new(options: MpvOptions) -> Self {
        Self {
            socket_name: piradio_core::platform::mpv_socket_name(),
            process: None,
            options,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    pub async fn spawn_and_connect(&mut self) -> anyhow::Result<MpvHandle> {
        // Kill stale process
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary = piradio_core::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .args(self.options.args())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(Self::start_io_tasks(stream))
    }

    fn start_io_tasks(stream: UnixStream) -> MpvHandle {
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);

        // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(reader, pending));

        MpvHandle { tx: cmd_tx }
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            debug!("mpv reader: response req={} ok", req_id);
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if let Some(event) = val.get("event").and_then(|v| v.as_str()) {
                    if event == "end-file" {
                        let reason = val.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown");
                        if reason == "error" || reason == "network" {
                            warn!("mpv: stream ended, reason={}", reason);
                        }
                    }
                    debug!("mpv reader: event {}", event);
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── AudioEngine ───────────────────────────────────────────────────────────────

struct Connection {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    /// Mute state as last set through this engine; a fresh mpv starts unmuted.
    muted: bool,
}

pub struct MpvEngine {
    conn: Mutex<Connection>,
}

impl MpvEngine {
    pub fn new(options: MpvOptions) -> Self {
        Self {
            conn: Mutex::new(Connection {
                driver: MpvDriver::new(options),
                handle: None,
                muted: false,
            }),
        }
    }

    /// Current handle, respawning mpv if it died or was never started.
    async fn handle(&self) -> anyhow::Result<MpvHandle> {
        let mut guard = self.conn.lock().await;
        let conn = &mut *guard;
        if let Some(handle) = &conn.handle {
            if !handle.is_closed() && conn.driver.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv: process died, restarting");
            conn.handle = None;
        }
        let handle = conn.driver.spawn_and_connect().await?;
        if let Err(e) = restore_mute(&handle, conn.muted).await {
            warn!("mpv: could not restore mute after restart: {:#}", e);
        }
        conn.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn command(&self, command: Value) -> anyhow::Result<Value> {
        let handle = self.handle().await?;
        handle.send(command).await
    }

    pub async fn shutdown(&self) {
        let mut conn = self.conn.lock().await;
        conn.handle = None;
        conn.driver.kill().await;
    }
}

/// Bring a freshly spawned mpv in line with the mute state it replaced.
async fn restore_mute(handle: &MpvHandle, muted: bool) -> anyhow::Result<()> {
    if muted {
        handle.send(json!(["set_property", "mute", true])).await?;
    }
    Ok(())
}

#[async_trait]
impl AudioEngine for MpvEngine {
    async fn play(&self, url: &str) -> anyhow::Result<()> {
        self.command(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.command(json!(["stop"])).await?;
        Ok(())
    }

    async fn set_volume(&self, volume: i32) -> anyhow::Result<()> {
        self.command(json!(["set_property", "volume", volume.max(0)]))
            .await?;
        Ok(())
    }

    async fn toggle_mute(&self) -> anyhow::Result<()> {
        self.command(json!(["cycle", "mute"])).await?;
        let mut conn = self.conn.lock().await;
        conn.muted = !conn.muted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_volume_and_device() {
        let options = MpvOptions {
            initial_volume: 120,
            volume_max: 200,
            network_caching_ms: 1500,
            audio_device: Some("alsa/hw:1,0".into()),
        };
        let args = options.args();
        assert!(args.contains(&"--volume-max=200".to_string()));
        assert!(args.contains(&"--volume=120".to_string()));
        assert!(args.contains(&"--cache-secs=1.500".to_string()));
        assert!(args.contains(&"--audio-device=alsa/hw:1,0".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--input-ipc-server=")));
    }

    #[test]
    fn volume_max_never_below_mpv_minimum() {
        let options = MpvOptions {
            initial_volume: 80,
            volume_max: 60,
            network_caching_ms: 0,
            audio_device: None,
        };
        let args = options.args();
        assert!(args.contains(&"--volume-max=100".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--audio-device")));
    }

    #[tokio::test]
    async fn reader_routes_responses_by_request_id() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = MpvDriver::start_io_tasks(client);

        let fake_mpv = tokio::spawn(async move {
            let (read_half, mut write_half) = server.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["command"], json!(["cycle", "mute"]));
            let id = req["request_id"].as_u64().unwrap();
            // An unsolicited event first, then the reply.
            write_half
                .write_all(b"{\"event\":\"idle\"}\n")
                .await
                .unwrap();
            let reply = format!("{{\"request_id\":{},\"error\":\"success\"}}\n", id);
            write_half.write_all(reply.as_bytes()).await.unwrap();
        });

        let resp = handle.send(json!(["cycle", "mute"])).await.unwrap();
        assert_eq!(resp["error"], "success");
        fake_mpv.await.unwrap();
    }

    #[tokio::test]
    async fn mpv_error_reply_becomes_err() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = MpvDriver::start_io_tasks(client);

        tokio::spawn(async move {
            let (read_half, mut write_half) = server.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            let id = req["request_id"].as_u64().unwrap();
            let reply = format!(
                "{{\"request_id\":{},\"error\":\"property unavailable\"}}\n",
                id
            );
            write_half.write_all(reply.as_bytes()).await.unwrap();
        });

        let err = handle.send(json!(["stop"])).await.unwrap_err();
        assert!(err.to_string().contains("property unavailable"));
    }

    #[tokio::test]
    async fn restore_mute_sets_property_when_muted() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = MpvDriver::start_io_tasks(client);

        let fake_mpv = tokio::spawn(async move {
            let (read_half, mut write_half) = server.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["command"], json!(["set_property", "mute", true]));
            let id = req["request_id"].as_u64().unwrap();
            let reply = format!("{{\"request_id\":{},\"error\":\"success\"}}\n", id);
            write_half.write_all(reply.as_bytes()).await.unwrap();
        });

        restore_mute(&handle, true).await.unwrap();
        fake_mpv.await.unwrap();
    }

    #[tokio::test]
    async fn restore_mute_sends_nothing_when_unmuted() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = MpvDriver::start_io_tasks(client);
        // No mpv on the other end: any command would fail.
        drop(server);

        restore_mute(&handle, false).await.unwrap();
        assert!(restore_mute(&handle, true).await.is_err());
    }
}
