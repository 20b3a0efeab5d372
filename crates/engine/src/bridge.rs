//! Playwright bridge driver
//!
//! Production implementation of the browser capability interface. One Node
//! sidecar process (running the embedded `bridge.js` script) hosts a single
//! chromium instance; each story session is an isolated browser context.
//! The protocol is line-delimited JSON over stdio: request ids correlate
//! responses, console errors arrive as unsolicited events.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

use crate::driver::{Browser, BrowserSession, Viewport};
use crate::error::{EngineError, EngineResult};

/// The sidecar script, shipped inside the binary.
const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Extra headroom on top of the sidecar-side timeout before the Rust side
/// gives up on a call.
const CALL_TIMEOUT_MARGIN_MS: u64 = 10_000;

/// Configuration for the Playwright bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Node.js binary used to run the sidecar.
    pub node_binary: String,
    /// Run the browser headless.
    pub headless: bool,
    /// Default per-call budget (matches Playwright's action defaults).
    pub default_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            headless: true,
            default_timeout_ms: 30_000,
        }
    }
}

/// Lazily-started, explicitly-owned browser process handle.
pub struct PlaywrightBridge {
    config: BridgeConfig,
    inner: AsyncMutex<Option<Arc<BridgeInner>>>,
}

impl PlaywrightBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            inner: AsyncMutex::new(None),
        }
    }

    async fn ensure_started(&self) -> EngineResult<Arc<BridgeInner>> {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.as_ref() {
            return Ok(inner.clone());
        }

        let inner = Arc::new(BridgeInner::spawn(&self.config).await?);
        *guard = Some(inner.clone());
        Ok(inner)
    }
}

#[async_trait]
impl Browser for PlaywrightBridge {
    async fn new_session(&self, viewport: Viewport) -> EngineResult<Box<dyn BrowserSession>> {
        let inner = self.ensure_started().await?;
        let result = inner
            .call(
                "new_session",
                None,
                serde_json::json!({ "width": viewport.width, "height": viewport.height }),
                inner.default_timeout_ms,
            )
            .await?;

        let session_id = result
            .get("session")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Bridge("new_session returned no session id".to_string()))?
            .to_string();

        inner
            .consoles
            .lock()
            .unwrap()
            .insert(session_id.clone(), Vec::new());

        debug!(session = %session_id, "Opened browser session");
        Ok(Box::new(BridgeSession {
            id: session_id,
            inner,
        }))
    }

    async fn shutdown(&self) -> EngineResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            // Ask the sidecar to close the browser cleanly, then reap it.
            let _ = inner.call("shutdown", None, serde_json::Value::Null, 5_000).await;
            if let Some(mut child) = inner.child.lock().unwrap().take() {
                let _ = child.start_kill();
            }
            debug!("Playwright bridge shut down");
        }
        Ok(())
    }
}

struct BridgeInner {
    child: Mutex<Option<Child>>,
    stdin: AsyncMutex<ChildStdin>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>,
    consoles: Arc<Mutex<HashMap<String, Vec<String>>>>,
    next_id: AtomicU64,
    default_timeout_ms: u64,
    // The temp file must outlive the sidecar that is executing it.
    _script: tempfile::NamedTempFile,
}

#[derive(Debug)]
struct BridgeReply {
    ok: bool,
    result: serde_json::Value,
    error: Option<String>,
}

#[derive(Deserialize)]
struct BridgeMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl BridgeInner {
    async fn spawn(config: &BridgeConfig) -> EngineResult<Self> {
        let mut script = tempfile::Builder::new()
            .prefix("storyline-bridge-")
            .suffix(".js")
            .tempfile()?;
        script.write_all(BRIDGE_SCRIPT.as_bytes())?;
        script.flush()?;

        let mut command = Command::new(&config.node_binary);
        command
            .arg(script.path())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if !config.headless {
            command.env("STORYLINE_HEADFUL", "1");
        }

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::NodeNotFound(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Bridge("sidecar stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Bridge("sidecar stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let inner = Self {
            child: Mutex::new(Some(child)),
            stdin: AsyncMutex::new(stdin),
            pending: Arc::new(Mutex::new(HashMap::new())),
            consoles: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            default_timeout_ms: config.default_timeout_ms,
            _script: script,
        };

        // Reader task: routes responses to waiting callers, accumulates
        // console-error events per session.
        let reader = BridgeReader {
            pending: inner.pending.clone(),
            consoles: inner.consoles.clone(),
        };
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                reader.route(&line);
            }
            reader.fail_all("bridge process exited");
        });

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("bridge stderr: {}", line);
                }
            });
        }

        debug!(node = %config.node_binary, "Spawned Playwright bridge");
        Ok(inner)
    }

    async fn call(
        &self,
        cmd: &str,
        session: Option<&str>,
        args: serde_json::Value,
        timeout_ms: u64,
    ) -> EngineResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let mut request = serde_json::json!({ "id": id, "cmd": cmd });
        if let Some(session) = session {
            request["session"] = session.into();
        }
        if !args.is_null() {
            request["args"] = args;
        }

        trace!("bridge request: {}", request);
        {
            let mut stdin = self.stdin.lock().await;
            let mut line = request.to_string();
            line.push('\n');
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().unwrap().remove(&id);
                return Err(EngineError::Bridge(format!("sidecar write failed: {}", e)));
            }
            if let Err(e) = stdin.flush().await {
                self.pending.lock().unwrap().remove(&id);
                return Err(EngineError::Bridge(format!("sidecar flush failed: {}", e)));
            }
        }

        let budget = Duration::from_millis(timeout_ms + CALL_TIMEOUT_MARGIN_MS);
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(reply)) => {
                if reply.ok {
                    Ok(reply.result)
                } else {
                    Err(EngineError::Driver(
                        reply.error.unwrap_or_else(|| "unknown driver error".to_string()),
                    ))
                }
            }
            Ok(Err(_)) => Err(EngineError::Bridge("bridge closed mid-call".to_string())),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(EngineError::Timeout(format!("bridge call {:?}", cmd)))
            }
        }
    }
}

/// Reader side of the protocol; holds only the routing maps so the task does
/// not keep the whole BridgeInner alive.
struct BridgeReader {
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>,
    consoles: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl BridgeReader {
    fn route(&self, line: &str) {
        let message: BridgeMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unparseable bridge message: {} ({})", line, e);
                return;
            }
        };

        if let Some(event) = message.event {
            if event == "console_error" {
                if let (Some(session), Some(text)) = (message.session, message.text) {
                    self.consoles
                        .lock()
                        .unwrap()
                        .entry(session)
                        .or_default()
                        .push(text);
                }
            } else {
                trace!("Ignoring bridge event: {}", event);
            }
            return;
        }

        if let Some(id) = message.id {
            if let Some(tx) = self.pending.lock().unwrap().remove(&id) {
                let _ = tx.send(BridgeReply {
                    ok: message.ok.unwrap_or(false),
                    result: message.result.unwrap_or(serde_json::Value::Null),
                    error: message.error,
                });
            }
        }
    }

    fn fail_all(&self, reason: &str) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(BridgeReply {
                ok: false,
                result: serde_json::Value::Null,
                error: Some(reason.to_string()),
            });
        }
    }
}

/// One isolated browser context on the sidecar
struct BridgeSession {
    id: String,
    inner: Arc<BridgeInner>,
}

impl BridgeSession {
    async fn call(&self, cmd: &str, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        self.inner
            .call(cmd, Some(&self.id), args, self.inner.default_timeout_ms)
            .await
    }
}

#[async_trait]
impl BrowserSession for BridgeSession {
    async fn navigate(&self, url: &str) -> EngineResult<()> {
        self.call("goto", serde_json::json!({ "url": url })).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> EngineResult<()> {
        self.call("click", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> EngineResult<()> {
        self.call(
            "fill",
            serde_json::json!({ "selector": selector, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> EngineResult<()> {
        self.call(
            "select",
            serde_json::json!({ "selector": selector, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> EngineResult<()> {
        self.call(
            "set_checked",
            serde_json::json!({ "selector": selector, "checked": checked }),
        )
        .await?;
        Ok(())
    }

    async fn hover(&self, selector: &str) -> EngineResult<()> {
        self.call("hover", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(())
    }

    async fn focus(&self, selector: &str) -> EngineResult<()> {
        self.call("focus", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(())
    }

    async fn press(&self, key: &str) -> EngineResult<()> {
        self.call("press", serde_json::json!({ "key": key })).await?;
        Ok(())
    }

    async fn scroll_into_view(&self, selector: Option<&str>) -> EngineResult<()> {
        self.call("scroll", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(())
    }

    async fn wait_millis(&self, ms: u64) -> EngineResult<()> {
        self.inner
            .call(
                "wait",
                Some(&self.id),
                serde_json::json!({ "ms": ms }),
                ms + self.inner.default_timeout_ms,
            )
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> EngineResult<String> {
        let result = self.call("url", serde_json::Value::Null).await?;
        result
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| EngineError::Bridge("url command returned no url".to_string()))
    }

    async fn is_visible(&self, selector: &str) -> EngineResult<bool> {
        let result = self
            .call("visible", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(result
            .get("visible")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn wait_for_network_idle(&self, timeout_ms: u64) -> EngineResult<()> {
        self.inner
            .call(
                "idle",
                Some(&self.id),
                serde_json::json!({ "timeout": timeout_ms }),
                timeout_ms,
            )
            .await?;
        Ok(())
    }

    async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        let result = self.call("screenshot", serde_json::Value::Null).await?;
        let data = result
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Bridge("screenshot returned no data".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| EngineError::Bridge(format!("invalid screenshot payload: {}", e)))
    }

    async fn dom_snapshot(&self) -> EngineResult<String> {
        let result = self.call("dom", serde_json::Value::Null).await?;
        Ok(result
            .get("html")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn console_errors(&self) -> Vec<String> {
        self.inner
            .consoles
            .lock()
            .unwrap()
            .get(&self.id)
            .cloned()
            .unwrap_or_default()
    }

    async fn close(&self) -> EngineResult<()> {
        self.call("close_session", serde_json::Value::Null).await?;
        self.inner.consoles.lock().unwrap().remove(&self.id);
        Ok(())
    }
}
