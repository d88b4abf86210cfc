use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::{BrowserError, BrowserPage, ImageFormat, PageInfo};
use crate::shared::config::BrowserConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single page driven over the Chrome DevTools Protocol, using a flattened
/// target session on the browser-level socket.
pub struct CdpPage {
    ws: WsStream,
    next_id: u64,
    session_id: String,
    events: VecDeque<Value>,
    config: Arc<BrowserConfig>,
}

fn exec_err(message: impl Into<String>) -> BrowserError {
    BrowserError::Execution(message.into())
}

fn ws_err(e: tokio_tungstenite::tungstenite::Error) -> BrowserError {
    exec_err(format!("Browser connection error: {e}"))
}

impl CdpPage {
    pub async fn connect(
        connect_url: &str,
        config: Arc<BrowserConfig>,
    ) -> Result<Self, BrowserError> {
        let connect_timeout = Duration::from_millis(config.command_timeout_ms);
        let (ws, _) = tokio::time::timeout(connect_timeout, connect_async(connect_url))
            .await
            .map_err(|_| {
                exec_err(format!(
                    "Connecting to remote browser timed out after {}ms",
                    connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| exec_err(format!("Failed to connect to remote browser: {e}")))?;

        let mut page = Self {
            ws,
            next_id: 0,
            session_id: String::new(),
            events: VecDeque::new(),
            config,
        };
        page.attach().await?;
        Ok(page)
    }

    /// Attaches to the session's existing page, or opens one with the default
    /// viewport when the browser has none.
    async fn attach(&mut self) -> Result<(), BrowserError> {
        let targets = self.call("Target.getTargets", json!({}), false).await?;
        let existing = targets["targetInfos"]
            .as_array()
            .and_then(|infos| infos.iter().find(|t| t["type"] == "page"))
            .and_then(|t| t["targetId"].as_str())
            .map(str::to_string);

        let (target_id, fresh) = match existing {
            Some(id) => (id, false),
            None => {
                let created = self
                    .call("Target.createTarget", json!({ "url": "about:blank" }), false)
                    .await?;
                let id = created["targetId"]
                    .as_str()
                    .ok_or_else(|| exec_err("Target.createTarget returned no targetId"))?
                    .to_string();
                (id, true)
            }
        };

        let attached = self
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                false,
            )
            .await?;
        self.session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| exec_err("Target.attachToTarget returned no sessionId"))?
            .to_string();
        debug!(target_id = %target_id, fresh, "Attached to page target");

        if fresh {
            let viewport = json!({
                "width": self.config.viewport_width,
                "height": self.config.viewport_height,
                "deviceScaleFactor": 1,
                "mobile": false,
            });
            self.call("Emulation.setDeviceMetricsOverride", viewport, true)
                .await?;
        }

        self.call("Page.enable", json!({}), true).await?;
        self.call("Network.enable", json!({}), true).await?;
        self.call("Page.setLifecycleEventsEnabled", json!({ "enabled": true }), true)
            .await?;
        Ok(())
    }

    async fn call(
        &mut self,
        method: &str,
        params: Value,
        in_session: bool,
    ) -> Result<Value, BrowserError> {
        let limit = Duration::from_millis(self.config.command_timeout_ms);
        tokio::time::timeout(limit, self.exchange(method, params, in_session))
            .await
            .map_err(|_| exec_err(format!("{method} timed out after {}ms", limit.as_millis())))?
    }

    async fn exchange(
        &mut self,
        method: &str,
        params: Value,
        in_session: bool,
    ) -> Result<Value, BrowserError> {
        self.next_id += 1;
        let id = self.next_id;
        let mut message = json!({ "id": id, "method": method, "params": params });
        if in_session {
            message["sessionId"] = json!(self.session_id);
        }
        self.ws
            .send(WsMessage::Text(message.to_string().into()))
            .await
            .map_err(ws_err)?;

        loop {
            let reply = self.next_message().await?;
            if reply["id"].as_u64() != Some(id) {
                self.buffer(reply);
                continue;
            }
            if let Some(error) = reply.get("error") {
                let text = error["message"].as_str().unwrap_or("unknown error");
                return Err(exec_err(format!("{method} failed: {text}")));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn next_message(&mut self) -> Result<Value, BrowserError> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str(text.as_str()) {
                    Ok(value) => return Ok(value),
                    Err(e) => debug!("Ignoring malformed CDP frame: {}", e),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    self.ws.send(WsMessage::Pong(data)).await.map_err(ws_err)?;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(exec_err("Browser connection closed"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ws_err(e)),
            }
        }
    }

    // Only events navigation bookkeeping needs are retained
    fn buffer(&mut self, message: Value) {
        let keep = match session_event(&message, &self.session_id) {
            Some("Page.loadEventFired") | Some("Page.lifecycleEvent") => true,
            Some("Network.responseReceived") => message["params"]["type"] == "Document",
            _ => false,
        };
        if keep {
            self.events.push_back(message);
        }
    }

    /// Waits for a session event named `method` that satisfies `filter`.
    /// `Ok(None)` means the wait timed out.
    async fn wait_for<F>(
        &mut self,
        method: &str,
        timeout: Duration,
        filter: F,
    ) -> Result<Option<Value>, BrowserError>
    where
        F: Fn(&Value) -> bool,
    {
        let session_id = self.session_id.clone();
        let matches = |m: &Value| session_event(m, &session_id) == Some(method) && filter(m);

        if let Some(pos) = self.events.iter().position(|e| matches(e)) {
            return Ok(self.events.remove(pos));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let message = match tokio::time::timeout_at(deadline, self.next_message()).await {
                Ok(message) => message?,
                Err(_) => return Ok(None),
            };
            if matches(&message) {
                return Ok(Some(message));
            }
            self.buffer(message);
        }
    }

    async fn evaluate(&mut self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                true,
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("script error");
            return Err(exec_err(format!("Page script failed: {text}")));
        }
        Ok(result["result"]["value"].clone())
    }
}

fn session_event<'a>(message: &'a Value, session_id: &str) -> Option<&'a str> {
    if message["sessionId"].as_str() != Some(session_id) {
        return None;
    }
    message["method"].as_str()
}

/// Status of the main-frame document response, the last one wins.
fn document_status(events: &VecDeque<Value>, frame_id: &str) -> Option<u16> {
    events
        .iter()
        .rev()
        .filter(|e| e["method"] == "Network.responseReceived")
        .find(|e| frame_id.is_empty() || e["params"]["frameId"] == frame_id)
        .and_then(|e| e["params"]["response"]["status"].as_u64())
        .and_then(|s| u16::try_from(s).ok())
}

fn text_expression(selector: Option<&str>) -> String {
    // JSON string literals are valid JS string literals
    let selector = serde_json::to_string(&selector).unwrap_or_else(|_| "null".to_string());
    format!(
        r#"(() => {{
  const sel = {selector};
  let el = null;
  if (sel !== null) {{
    try {{ el = document.querySelector(sel); }} catch (e) {{ el = null; }}
  }}
  const root = el || document.body;
  return root ? (root.innerText || root.textContent || "") : "";
}})()"#
    )
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn navigate(&mut self, url: &str) -> Result<PageInfo, BrowserError> {
        self.events.clear();
        let nav_timeout = Duration::from_millis(self.config.navigation_timeout_ms);
        let timed_out = || {
            exec_err(format!(
                "Navigation timed out after {}ms",
                nav_timeout.as_millis()
            ))
        };

        let result = tokio::time::timeout(
            nav_timeout,
            self.exchange("Page.navigate", json!({ "url": url }), true),
        )
        .await
        .map_err(|_| timed_out())??;
        if let Some(error) = result["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(exec_err(format!("Navigation failed: {error}")));
        }
        let frame_id = result["frameId"].as_str().unwrap_or_default().to_string();

        if self
            .wait_for("Page.loadEventFired", nav_timeout, |_| true)
            .await?
            .is_none()
        {
            return Err(timed_out());
        }

        let idle_timeout = Duration::from_millis(self.config.network_idle_timeout_ms);
        let idle = self
            .wait_for("Page.lifecycleEvent", idle_timeout, |e| {
                e["params"]["name"] == "networkIdle"
            })
            .await?;
        if idle.is_none() {
            debug!(url = %url, "Network idle wait timed out, continuing");
        }

        let status_code = document_status(&self.events, &frame_id);
        let location = self
            .evaluate("({ url: location.href, title: document.title })")
            .await?;
        self.events.clear();

        Ok(PageInfo {
            status_code,
            final_url: location["url"].as_str().unwrap_or(url).to_string(),
            title: location["title"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn screenshot(
        &mut self,
        format: ImageFormat,
        full_page: bool,
    ) -> Result<Vec<u8>, BrowserError> {
        let mut params = match format {
            ImageFormat::Png => json!({ "format": "png" }),
            ImageFormat::Jpeg { quality } => json!({ "format": "jpeg", "quality": quality }),
        };

        if full_page {
            let metrics = self.call("Page.getLayoutMetrics", json!({}), true).await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"));
            if let Some(size) = size {
                let width = size["width"]
                    .as_f64()
                    .unwrap_or(self.config.viewport_width as f64);
                let height = size["height"]
                    .as_f64()
                    .unwrap_or(self.config.viewport_height as f64);
                params["clip"] = json!({
                    "x": 0,
                    "y": 0,
                    "width": width,
                    "height": height,
                    "scale": 1,
                });
                params["captureBeyondViewport"] = json!(true);
            }
        }

        let result = self.call("Page.captureScreenshot", params, true).await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| exec_err("Screenshot returned no data"))?;
        STANDARD
            .decode(data)
            .map_err(|e| exec_err(format!("Screenshot data is not valid base64: {e}")))
    }

    async fn visible_text(&mut self, selector: Option<&str>) -> Result<String, BrowserError> {
        let value = self.evaluate(&text_expression(selector)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("Closing browser connection failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    const SESSION: &str = "S1";

    /// Scripted DevTools endpoint behaviour.
    #[derive(Clone, Copy, Default)]
    struct Script {
        existing_page: bool,
        load_event: bool,
        network_idle: bool,
        stall: Option<&'static str>,
    }

    fn event(method: &str, params: Value) -> Value {
        json!({ "sessionId": SESSION, "method": method, "params": params })
    }

    fn document(frame: &str, status: u16) -> Value {
        event(
            "Network.responseReceived",
            json!({ "type": "Document", "frameId": frame, "response": { "status": status } }),
        )
    }

    impl Script {
        fn respond(&self, request: &Value) -> Vec<Value> {
            let method = request["method"].as_str().unwrap_or_default();
            if self.stall == Some(method) {
                return Vec::new();
            }
            let reply = |result: Value| json!({ "id": request["id"], "result": result });
            match method {
                "Target.getTargets" => {
                    let mut infos = vec![json!({ "type": "browser", "targetId": "B" })];
                    if self.existing_page {
                        infos.push(json!({ "type": "page", "targetId": "existing" }));
                    }
                    vec![reply(json!({ "targetInfos": infos }))]
                }
                "Target.createTarget" => vec![reply(json!({ "targetId": "created" }))],
                "Target.attachToTarget" => vec![reply(json!({ "sessionId": SESSION }))],
                "Page.navigate" => {
                    // Redirect hop, final document, then an iframe load
                    let mut out = vec![
                        document("F1", 301),
                        document("F1", 200),
                        document("F2", 404),
                        reply(json!({ "frameId": "F1" })),
                    ];
                    if self.load_event {
                        out.push(event("Page.loadEventFired", json!({ "timestamp": 1.0 })));
                    }
                    if self.network_idle {
                        out.push(event(
                            "Page.lifecycleEvent",
                            json!({ "frameId": "F1", "name": "networkIdle" }),
                        ));
                    }
                    out
                }
                "Runtime.evaluate" => vec![reply(json!({
                    "result": {
                        "type": "object",
                        "value": { "url": "https://example.com/final", "title": "Final page" }
                    }
                }))],
                "Page.captureScreenshot" => {
                    vec![reply(json!({ "data": STANDARD.encode(b"png-bytes") }))]
                }
                _ => vec![reply(json!({}))],
            }
        }
    }

    /// Serves one DevTools socket and records every request it receives.
    async fn fake_browser(script: Script) -> (String, Arc<Mutex<Vec<Value>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let request: Value = serde_json::from_str(text.as_str()).unwrap();
                log.lock().unwrap().push(request.clone());
                for message in script.respond(&request) {
                    if ws.send(WsMessage::Text(message.to_string().into())).await.is_err() {
                        return;
                    }
                }
            }
        });

        (format!("ws://{addr}"), seen)
    }

    fn config() -> Arc<BrowserConfig> {
        Arc::new(BrowserConfig {
            navigation_timeout_ms: 500,
            network_idle_timeout_ms: 100,
            command_timeout_ms: 300,
            viewport_width: 1024,
            viewport_height: 640,
            ..BrowserConfig::default()
        })
    }

    fn requests_for(seen: &Mutex<Vec<Value>>, method: &str) -> Vec<Value> {
        seen.lock()
            .unwrap()
            .iter()
            .filter(|r| r["method"] == method)
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn attach_reuses_existing_page() {
        let (url, seen) = fake_browser(Script {
            existing_page: true,
            ..Script::default()
        })
        .await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();
        page.close().await;

        let attach = requests_for(&seen, "Target.attachToTarget");
        assert_eq!(attach[0]["params"]["targetId"], "existing");
        assert!(requests_for(&seen, "Target.createTarget").is_empty());
        assert!(requests_for(&seen, "Emulation.setDeviceMetricsOverride").is_empty());
        assert_eq!(requests_for(&seen, "Page.enable")[0]["sessionId"], SESSION);
    }

    #[tokio::test]
    async fn attach_opens_page_with_default_viewport() {
        let (url, seen) = fake_browser(Script::default()).await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();
        page.close().await;

        assert_eq!(requests_for(&seen, "Target.createTarget").len(), 1);
        assert_eq!(
            requests_for(&seen, "Target.attachToTarget")[0]["params"]["targetId"],
            "created"
        );
        let viewport = &requests_for(&seen, "Emulation.setDeviceMetricsOverride")[0];
        assert_eq!(viewport["sessionId"], SESSION);
        assert_eq!(viewport["params"]["width"], 1024);
        assert_eq!(viewport["params"]["height"], 640);
    }

    #[tokio::test]
    async fn navigate_reports_final_document_after_redirect() {
        let (url, _) = fake_browser(Script {
            load_event: true,
            network_idle: true,
            ..Script::default()
        })
        .await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();

        let info = page.navigate("http://example.com/start").await.unwrap();
        assert_eq!(
            info,
            PageInfo {
                status_code: Some(200),
                final_url: "https://example.com/final".to_string(),
                title: "Final page".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn network_idle_timeout_is_not_fatal() {
        let (url, _) = fake_browser(Script {
            load_event: true,
            ..Script::default()
        })
        .await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();

        let info = page.navigate("http://example.com/start").await.unwrap();
        assert_eq!(info.status_code, Some(200));
    }

    #[tokio::test]
    async fn missing_load_event_fails_navigation() {
        let (url, _) = fake_browser(Script {
            network_idle: true,
            ..Script::default()
        })
        .await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();

        let err = page.navigate("http://example.com/start").await.unwrap_err();
        assert!(matches!(&err, BrowserError::Execution(msg) if msg.contains("timed out")), "{err:?}");
    }

    #[tokio::test]
    async fn stalled_command_is_bounded() {
        let (url, _) = fake_browser(Script {
            load_event: true,
            stall: Some("Page.captureScreenshot"),
            ..Script::default()
        })
        .await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();
        page.navigate("http://example.com/start").await.unwrap();

        let err = page.screenshot(ImageFormat::Png, false).await.unwrap_err();
        assert!(
            matches!(&err, BrowserError::Execution(msg) if msg.contains("Page.captureScreenshot timed out")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn screenshot_decodes_image_data() {
        let (url, _) = fake_browser(Script {
            load_event: true,
            ..Script::default()
        })
        .await;
        let mut page = CdpPage::connect(&url, config()).await.unwrap();
        page.navigate("http://example.com/start").await.unwrap();

        let bytes = page.screenshot(ImageFormat::Png, false).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[test]
    fn events_are_scoped_to_the_session() {
        let ours = json!({ "sessionId": "S1", "method": "Page.loadEventFired", "params": {} });
        let theirs = json!({ "sessionId": "S2", "method": "Page.loadEventFired", "params": {} });
        let reply = json!({ "id": 3, "result": {} });

        assert_eq!(session_event(&ours, "S1"), Some("Page.loadEventFired"));
        assert_eq!(session_event(&theirs, "S1"), None);
        assert_eq!(session_event(&reply, "S1"), None);
    }

    #[test]
    fn document_status_prefers_latest_main_frame_response() {
        let response = |frame: &str, status: u64| {
            json!({
                "method": "Network.responseReceived",
                "params": { "type": "Document", "frameId": frame, "response": { "status": status } }
            })
        };
        let events: VecDeque<Value> = vec![
            response("MAIN", 200),
            response("IFRAME", 404),
            response("MAIN", 201),
        ]
        .into();

        assert_eq!(document_status(&events, "MAIN"), Some(201));
        assert_eq!(document_status(&events, "OTHER"), None);
        assert_eq!(document_status(&VecDeque::new(), "MAIN"), None);
    }

    #[test]
    fn selector_is_embedded_as_a_string_literal() {
        let expr = text_expression(Some(r#"a[href="x"]'); alert(1); ('"#));
        assert!(expr.contains(r#"const sel = "a[href=\"x\"]'); alert(1); ('";"#));

        let whole_page = text_expression(None);
        assert!(whole_page.contains("const sel = null;"));
    }
}
