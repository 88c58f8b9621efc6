//! MCP stdio server
//!
//! Newline-delimited JSON-RPC. Each request is handled on its own task so a
//! slow Screeps call never holds up `tools/list` or a stream read; responses
//! are funneled through one writer task and may be emitted out of order.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{codes, CallToolParams, McpRequest, McpResponse, McpTool, McpToolInput, PROTOCOL_VERSION};
use crate::error::{Error, Result};
use crate::tools::{ToolDispatcher, ToolName};

/// Serves the Screeps tools to one MCP client
pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        McpServer { dispatcher }
    }

    /// Definitions advertised by `tools/list`
    pub fn tools() -> Vec<McpTool> {
        ToolName::ALL
            .iter()
            .map(|tool| {
                let contract = tool.contract();
                McpTool {
                    name: tool.as_str().to_string(),
                    description: tool.description().to_string(),
                    input_schema: McpToolInput {
                        schema_type: "object".to_string(),
                        properties: contract.json_schema()["properties"].clone(),
                        required: contract
                            .fields
                            .iter()
                            .filter(|f| f.required)
                            .map(|f| f.name.to_string())
                            .collect(),
                        additional_properties: false,
                    },
                }
            })
            .collect()
    }

    /// Serve on stdin/stdout until stdin closes
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve requests read line by line from `reader` until EOF.
    ///
    /// Returns once every in-flight request has been answered.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<McpResponse>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(response) = rx.recv().await {
                let line = serde_json::to_string(&response)?;
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), Error>(())
        });

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let server = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_line(&line).await {
                    let _ = tx.send(response);
                }
            });
        }

        info!("Input closed; draining pending responses");
        drop(tx);
        writer_task
            .await
            .map_err(|e| Error::Internal(format!("Writer task failed: {}", e)))?
    }

    /// Handle one raw line. `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<McpResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparseable request: {}", e);
                return Some(McpResponse::err(Value::Null, codes::PARSE_ERROR, e.to_string()));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<McpRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(McpResponse::err(id, codes::INVALID_REQUEST, e.to_string())),
        }
    }

    /// Handle one decoded request. `None` for notifications.
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        debug!("MCP request: {}", request.method);

        if request.is_notification() {
            debug!("Notification: {}", request.method);
            return None;
        }
        let id = request.id.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => McpResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": crate::NAME,
                        "version": crate::VERSION
                    }
                }),
            ),
            "ping" => McpResponse::ok(id, json!({})),
            "tools/list" => McpResponse::ok(id, json!({"tools": Self::tools()})),
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                match serde_json::from_value::<CallToolParams>(params) {
                    Ok(params) => {
                        let result = self.dispatcher.call(&params.name, &params.arguments).await;
                        match serde_json::to_value(result) {
                            Ok(result) => McpResponse::ok(id, result),
                            Err(e) => McpResponse::err(id, codes::INTERNAL_ERROR, e.to_string()),
                        }
                    }
                    Err(e) => McpResponse::err(id, codes::INVALID_PARAMS, e.to_string()),
                }
            }
            other => McpResponse::err(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        };

        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, Credentials};
    use crate::screeps::ScreepsClient;
    use secrecy::SecretString;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// A server whose tests only touch tools that stay off the network
    fn server() -> Arc<McpServer> {
        let config = ConnectionConfig::new(
            "127.0.0.1:9",
            false,
            "shard0",
            Credentials::Token(SecretString::from("tok")),
        );
        let client = Arc::new(ScreepsClient::new(config).unwrap());
        let dispatcher = ToolDispatcher::new(client, 100, Duration::from_secs(60));
        Arc::new(McpServer::new(Arc::new(dispatcher)))
    }

    #[test]
    fn test_tool_definitions() {
        let tools = McpServer::tools();
        assert_eq!(tools.len(), 16);

        let objects = tools
            .iter()
            .find(|t| t.name == "screeps_room_objects")
            .unwrap();
        assert_eq!(objects.input_schema.required, vec!["roomName"]);
        assert_eq!(
            objects.input_schema.properties["roomName"]["pattern"],
            r"^[EW]\d+[NS]\d+$"
        );
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], crate::NAME);
    }

    #[tokio::test]
    async fn test_notification_gets_no_reply() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_errors() {
        let server = server();

        let parse = server.handle_line("{not json").await.unwrap();
        assert_eq!(parse.error.unwrap().code, codes::PARSE_ERROR);
        assert_eq!(parse.id, Value::Null);

        let unknown = server
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, codes::METHOD_NOT_FOUND);
        assert_eq!(unknown.id, json!(7));

        let bad_params = server
            .handle_line(r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{}}"#)
            .await
            .unwrap();
        assert_eq!(bad_params.error.unwrap().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tool_call_result() {
        let response = server()
            .handle_line(
                r#"{"jsonrpc":"2.0","id":"s","method":"tools/call","params":{"name":"screeps_console_stream_status"}}"#,
            )
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Active: no"));
        assert!(text.contains("Buffered: 0/500"));
    }

    #[tokio::test]
    async fn test_tool_validation_error_is_a_result() {
        let response = server()
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"screeps_room_objects","arguments":{"roomName":"invalid"}}}"#,
            )
            .await
            .unwrap();

        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Validation Error"));
    }

    #[tokio::test]
    async fn test_serve_until_eof() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let (writer, mut output) = tokio::io::duplex(1 << 20);

        server().serve(input.as_bytes(), writer).await.unwrap();

        let mut text = String::new();
        output.read_to_string(&mut text).await.unwrap();
        let responses: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(responses.len(), 2);
        let ids: Vec<&Value> = responses.iter().map(|r| &r["id"]).collect();
        assert!(ids.contains(&&json!(1)));
        assert!(ids.contains(&&json!(2)));
    }
}
