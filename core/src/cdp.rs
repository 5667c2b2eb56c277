//! Devtools bridge: WebSocket client to Chromium-style remote-debugging
//! endpoints. Lets the engine click, type, screenshot, and evaluate in
//! Electron/CEF apps without synthesizing any OS input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolError;

/// Per-probe cap during discovery.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Send/receive cap for one devtools command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
struct TargetInfo {
    title: String,
    url: String,
    websocket_url: String,
    target_id: String,
}

impl TargetInfo {
    fn to_json(&self) -> JsonValue {
        json!({
            "title": self.title,
            "url": self.url,
            "websocket_url": self.websocket_url,
            "target_id": self.target_id,
        })
    }
}

struct CdpConnection {
    ws: WsStream,
    info: TargetInfo,
    next_message_id: u64,
}

pub struct CdpManager {
    client: reqwest::Client,
    /// Map lock is held only to look up the per-connection handle; the
    /// per-connection lock serializes socket I/O and id allocation.
    connections: Mutex<HashMap<u16, Arc<Mutex<CdpConnection>>>>,
}

impl Default for CdpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CdpManager {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `/json` on one port and collect its page targets.
    async fn probe_port(&self, host: &str, port: u16) -> Option<Vec<JsonValue>> {
        let url = format!("http://{host}:{port}/json");
        let response = tokio::time::timeout(PROBE_TIMEOUT, self.client.get(&url).send())
            .await
            .ok()?
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let pages: Vec<JsonValue> = response.json().await.ok()?;
        let targets: Vec<JsonValue> = pages
            .iter()
            .filter(|p| p["type"] == "page")
            .filter_map(|p| {
                let ws_url = p["webSocketDebuggerUrl"].as_str()?;
                if ws_url.is_empty() {
                    return None;
                }
                Some(json!({
                    "port": port,
                    "title": p["title"].as_str().unwrap_or(""),
                    "url": p["url"].as_str().unwrap_or(""),
                    "websocket_url": ws_url,
                    "id": p["id"].as_str().unwrap_or(""),
                }))
            })
            .collect();
        (!targets.is_empty()).then_some(targets)
    }

    /// Scan a localhost port range for live devtools endpoints.
    pub async fn discover(&self, port_start: u16, port_end: u16) -> Result<JsonValue> {
        self.discover_on("localhost", port_start, port_end).await
    }

    pub async fn discover_on(&self, host: &str, port_start: u16, port_end: u16) -> Result<JsonValue> {
        if port_end < port_start {
            return Err(ToolError::invalid("port_end must be >= port_start"));
        }
        let probes = (port_start..=port_end).map(|port| self.probe_port(host, port));
        let results = futures::future::join_all(probes).await;
        let targets: Vec<JsonValue> = results.into_iter().flatten().flatten().collect();
        Ok(json!({
            "success": true,
            "targets": targets,
            "count": targets.len(),
            "ports_scanned": format!("{port_start}-{port_end}"),
        }))
    }

    /// Connect to the first page target on a port. Reconnecting to an
    /// already-connected port returns the existing target info.
    pub async fn connect(&self, port: u16) -> Result<JsonValue> {
        self.connect_on("localhost", port).await
    }

    pub async fn connect_on(&self, host: &str, port: u16) -> Result<JsonValue> {
        {
            let connections = self.connections.lock().await;
            if let Some(existing) = connections.get(&port) {
                let info = existing.lock().await.info.clone();
                let mut result = info.to_json();
                result["success"] = json!(true);
                result["already_connected"] = json!(true);
                result["port"] = json!(port);
                return Ok(result);
            }
        }

        let Some(targets) = self.probe_port(host, port).await else {
            return Err(
                ToolError::external(format!("No debuggable page found on port {port}"))
                    .with_hint("Make sure the app was launched with --remote-debugging-port."),
            );
        };
        let target = &targets[0];
        let info = TargetInfo {
            title: target["title"].as_str().unwrap_or("").to_string(),
            url: target["url"].as_str().unwrap_or("").to_string(),
            websocket_url: target["websocket_url"].as_str().unwrap_or("").to_string(),
            target_id: target["id"].as_str().unwrap_or("").to_string(),
        };

        let (ws, _) = connect_async(info.websocket_url.as_str())
            .await
            .map_err(|e| ToolError::external(format!("WebSocket connection failed: {e}")))?;

        info!("devtools bridge connected to port {port}: {}", info.title);
        let mut result = info.to_json();
        result["success"] = json!(true);
        result["port"] = json!(port);

        self.connections.lock().await.insert(
            port,
            Arc::new(Mutex::new(CdpConnection {
                ws,
                info,
                next_message_id: 0,
            })),
        );
        Ok(result)
    }

    pub async fn disconnect(&self, port: u16) -> Result<JsonValue> {
        let connection = self.connections.lock().await.remove(&port);
        let Some(connection) = connection else {
            return Err(ToolError::invalid(format!(
                "No active connection on port {port}"
            )));
        };
        let mut connection = connection.lock().await;
        let _ = connection.ws.close(None).await;
        info!("devtools bridge disconnected from port {port}");
        Ok(json!({"success": true, "port": port, "disconnected": true}))
    }

    pub async fn list_connections(&self) -> Result<JsonValue> {
        let connections = self.connections.lock().await;
        let mut listed = Vec::with_capacity(connections.len());
        for (port, connection) in connections.iter() {
            let info = connection.lock().await.info.clone();
            let mut entry = info.to_json();
            entry["port"] = json!(port);
            listed.push(entry);
        }
        Ok(json!({
            "success": true,
            "connections": listed,
            "count": listed.len(),
        }))
    }

    async fn drop_connection(&self, port: u16) {
        if self.connections.lock().await.remove(&port).is_some() {
            warn!("devtools connection on port {port} lost, cleaned up");
        }
    }

    /// Send one command frame and wait for its matching response,
    /// discarding unsolicited event frames. Socket failures evict the
    /// connection.
    pub async fn send(&self, port: u16, method: &str, params: Option<JsonValue>) -> Result<JsonValue> {
        let connection = {
            let connections = self.connections.lock().await;
            connections.get(&port).cloned()
        };
        let Some(connection) = connection else {
            return Err(ToolError::invalid(format!(
                "No active connection on port {port}. Use cdp_connect first."
            )));
        };

        let result = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Self::send_on_connection(connection, method, params),
        )
        .await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(SendError::Socket(message))) => {
                self.drop_connection(port).await;
                Err(ToolError::external(message))
            }
            Ok(Err(SendError::Protocol(err))) => Err(err),
            Err(_) => Err(ToolError::timeout(
                format!("devtools response for {method}"),
                COMMAND_TIMEOUT,
            )),
        }
    }

    async fn send_on_connection(
        connection: Arc<Mutex<CdpConnection>>,
        method: &str,
        params: Option<JsonValue>,
    ) -> std::result::Result<JsonValue, SendError> {
        let mut connection = connection.lock().await;
        connection.next_message_id += 1;
        let message_id = connection.next_message_id;

        let mut frame = json!({"id": message_id, "method": method});
        if let Some(params) = params {
            frame["params"] = params;
        }
        connection
            .ws
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| SendError::Socket(format!("Send failed (connection lost): {e}")))?;

        loop {
            let frame = connection
                .ws
                .next()
                .await
                .ok_or_else(|| SendError::Socket("Connection closed".to_string()))?
                .map_err(|e| SendError::Socket(format!("Recv failed (connection lost): {e}")))?;
            let text = match frame {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Close(_) => {
                    return Err(SendError::Socket("Connection closed by peer".to_string()));
                }
                _ => continue,
            };
            let Ok(response) = serde_json::from_str::<JsonValue>(&text) else {
                continue;
            };
            // Frames without our id are unsolicited events; keep reading.
            if response["id"] != json!(message_id) {
                continue;
            }
            if let Some(error) = response.get("error") {
                return Err(SendError::Protocol(ToolError::external(format!(
                    "devtools error: {}",
                    error["message"].as_str().unwrap_or(&error.to_string()),
                ))));
            }
            return Ok(json!({
                "success": true,
                "result": response.get("result").cloned().unwrap_or(json!({})),
            }));
        }
    }

    // ── Convenience commands ────────────────────────────────────

    /// Click at page-viewport coordinates (mousePressed + mouseReleased).
    pub async fn click(&self, port: u16, x: i64, y: i64) -> Result<JsonValue> {
        for phase in ["mousePressed", "mouseReleased"] {
            self.send(
                port,
                "Input.dispatchMouseEvent",
                Some(json!({
                    "type": phase,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": 1,
                })),
            )
            .await?;
        }
        Ok(json!({"success": true, "x": x, "y": y, "action": "click"}))
    }

    /// Insert text into the focused page element; handles Unicode.
    pub async fn type_text(&self, port: u16, text: &str) -> Result<JsonValue> {
        self.send(port, "Input.insertText", Some(json!({"text": text})))
            .await?;
        Ok(json!({
            "success": true,
            "text": text,
            "length": text.chars().count(),
        }))
    }

    /// Key down + key up with a modifier bitmask (alt=1, ctrl=2, meta=4,
    /// shift=8).
    pub async fn key_combo(&self, port: u16, key: &str, modifiers: &[String]) -> Result<JsonValue> {
        let mut mod_bits = 0u32;
        for modifier in modifiers {
            mod_bits |= match modifier.to_lowercase().as_str() {
                "alt" => 1,
                "ctrl" | "control" => 2,
                "meta" | "cmd" => 4,
                "shift" => 8,
                _ => 0,
            };
        }

        let (key_id, text, code) = named_key(key);
        let mut base = json!({
            "key": key_id,
            "modifiers": mod_bits,
            "windowsVirtualKeyCode": code,
        });
        if !text.is_empty() {
            base["text"] = json!(text);
        }

        for phase in ["keyDown", "keyUp"] {
            let mut params = base.clone();
            params["type"] = json!(phase);
            self.send(port, "Input.dispatchKeyEvent", Some(params)).await?;
        }
        Ok(json!({
            "success": true,
            "key": key,
            "modifiers": modifiers,
        }))
    }

    /// Page screenshot; works even when the window is hidden.
    pub async fn screenshot(&self, port: u16, format: &str) -> Result<JsonValue> {
        let format = match format.to_lowercase().as_str() {
            "jpeg" => "jpeg",
            _ => "png",
        };
        let result = self
            .send(
                port,
                "Page.captureScreenshot",
                Some(json!({"format": format})),
            )
            .await?;
        let data = result["result"]["data"]
            .as_str()
            .ok_or_else(|| ToolError::external("screenshot returned no data"))?;
        Ok(json!({
            "success": true,
            "image_base64": data,
            "format": format,
        }))
    }

    /// Evaluate a JavaScript expression in the page.
    pub async fn evaluate(&self, port: u16, expression: &str) -> Result<JsonValue> {
        let result = self
            .send(
                port,
                "Runtime.evaluate",
                Some(json!({"expression": expression, "returnByValue": true})),
            )
            .await?;
        if let Some(exception) = result["result"].get("exceptionDetails") {
            return Err(ToolError::external(format!(
                "JS error: {}",
                exception["text"].as_str().unwrap_or("evaluation threw"),
            )));
        }
        Ok(json!({
            "success": true,
            "value": result["result"]["result"].get("value").cloned().unwrap_or(JsonValue::Null),
            "type": result["result"]["result"]["type"].as_str().unwrap_or("undefined"),
        }))
    }

    pub async fn get_dom(&self, port: u16, depth: i32) -> Result<JsonValue> {
        let result = self
            .send(port, "DOM.getDocument", Some(json!({"depth": depth})))
            .await?;
        let root = result["result"]
            .get("root")
            .cloned()
            .ok_or_else(|| ToolError::external("DOM.getDocument returned no root"))?;
        let node_count = count_nodes(&root);
        Ok(json!({
            "success": true,
            "root": root,
            "node_count": node_count,
        }))
    }

    /// Click an element by CSS selector via an evaluated expression.
    pub async fn click_selector(&self, port: u16, css_selector: &str) -> Result<JsonValue> {
        let safe = css_selector.replace('\\', "\\\\").replace('\'', "\\'");
        let js = format!(
            "(() => {{\
               const el = document.querySelector('{safe}');\
               if (!el) return {{error: 'Element not found: {safe}'}};\
               el.click();\
               return {{clicked: true, tag: el.tagName, text: (el.textContent || '').slice(0, 100)}};\
             }})()"
        );
        let result = self.evaluate(port, &js).await?;
        let value = &result["value"];
        if let Some(error) = value.get("error").and_then(JsonValue::as_str) {
            return Err(ToolError::external(error));
        }
        let mut response = json!({
            "success": true,
            "selector": css_selector,
        });
        if let Some(object) = value.as_object() {
            for (k, v) in object {
                response[k] = v.clone();
            }
        }
        Ok(response)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

enum SendError {
    /// Transport-level failure; the connection is evicted.
    Socket(String),
    /// The peer answered with an error frame; the connection stays.
    Protocol(ToolError),
}

fn named_key(key: &str) -> (String, String, u32) {
    match key.to_lowercase().as_str() {
        "enter" => ("Enter".to_string(), "\r".to_string(), 13),
        "tab" => ("Tab".to_string(), String::new(), 9),
        "escape" => ("Escape".to_string(), String::new(), 27),
        "backspace" => ("Backspace".to_string(), String::new(), 8),
        "delete" => ("Delete".to_string(), String::new(), 46),
        "arrowup" | "up" => ("ArrowUp".to_string(), String::new(), 38),
        "arrowdown" | "down" => ("ArrowDown".to_string(), String::new(), 40),
        "arrowleft" | "left" => ("ArrowLeft".to_string(), String::new(), 37),
        "arrowright" | "right" => ("ArrowRight".to_string(), String::new(), 39),
        "home" => ("Home".to_string(), String::new(), 36),
        "end" => ("End".to_string(), String::new(), 35),
        "pageup" => ("PageUp".to_string(), String::new(), 33),
        "pagedown" => ("PageDown".to_string(), String::new(), 34),
        _ => {
            let text = if key.chars().count() == 1 {
                key.to_string()
            } else {
                String::new()
            };
            let code = key
                .chars()
                .next()
                .filter(|_| key.chars().count() == 1)
                .map(|c| c.to_ascii_uppercase() as u32)
                .unwrap_or(0);
            (key.to_string(), text, code)
        }
    }
}

fn count_nodes(node: &JsonValue) -> usize {
    let mut count = 1;
    if let Some(children) = node.get("children").and_then(JsonValue::as_array) {
        for child in children {
            count += count_nodes(child);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use futures::SinkExt;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    #[test]
    fn modifier_bitmask_and_named_keys() {
        let (id, text, code) = named_key("enter");
        assert_eq!((id.as_str(), text.as_str(), code), ("Enter", "\r", 13));
        let (id, text, code) = named_key("a");
        assert_eq!((id.as_str(), text.as_str(), code), ("a", "a", 65));
        let (_, text, code) = named_key("escape");
        assert_eq!((text.as_str(), code), ("", 27));
    }

    #[test]
    fn node_counting_recurses() {
        let root = json!({
            "children": [
                {"children": [{}, {}]},
                {},
            ],
        });
        assert_eq!(count_nodes(&root), 5);
    }

    #[tokio::test]
    async fn discovery_collects_page_targets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "type": "page",
                    "title": "Main Window",
                    "url": "app://index.html",
                    "webSocketDebuggerUrl": "ws://localhost:9222/devtools/page/1",
                    "id": "page-1",
                },
                {"type": "service_worker", "webSocketDebuggerUrl": "ws://x"},
                {"type": "page", "webSocketDebuggerUrl": ""},
            ])))
            .mount(&server)
            .await;

        let address = server.address();
        let manager = CdpManager::new();
        let result = manager
            .discover_on(&address.ip().to_string(), address.port(), address.port())
            .await
            .unwrap();
        assert_eq!(result["count"], json!(1));
        assert_eq!(result["targets"][0]["title"], json!("Main Window"));
        assert_eq!(result["targets"][0]["id"], json!("page-1"));
    }

    #[tokio::test]
    async fn send_skips_events_and_matches_ids() {
        // A tiny devtools peer: first emits an unsolicited event, then
        // answers the command.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: JsonValue = serde_json::from_str(&text).unwrap();
                let id = frame["id"].clone();
                ws.send(Message::Text(
                    json!({"method": "Page.frameNavigated", "params": {}}).to_string(),
                ))
                .await
                .unwrap();
                ws.send(Message::Text(
                    json!({"id": id, "result": {"data": "AAAA"}}).to_string(),
                ))
                .await
                .unwrap();
            }
        });

        // An HTTP index so connect() can discover the target.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "type": "page",
                "title": "T",
                "url": "app://x",
                "webSocketDebuggerUrl": format!("ws://127.0.0.1:{ws_port}"),
                "id": "t1",
            }])))
            .mount(&server)
            .await;

        let manager = CdpManager::new();
        let http_port = server.address().port();
        let connected = manager
            .connect_on(&server.address().ip().to_string(), http_port)
            .await
            .unwrap();
        assert_eq!(connected["success"], json!(true));

        let result = manager
            .send(http_port, "Page.captureScreenshot", None)
            .await
            .unwrap();
        assert_eq!(result["result"]["data"], json!("AAAA"));

        // Message ids are monotonic per connection.
        let second = manager.connect_on(&server.address().ip().to_string(), http_port).await.unwrap();
        assert_eq!(second["already_connected"], json!(true));

        manager.disconnect(http_port).await.unwrap();
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn send_without_connection_is_an_input_error() {
        let manager = CdpManager::new();
        let err = manager.send(9999, "Page.enable", None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }
}
