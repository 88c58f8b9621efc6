//! Screeps connection client
//!
//! One [`ScreepsClient`] owns one authenticated session to one server, plus
//! that session's console stream. Authentication happens lazily on the first
//! call that needs a token.

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::api::ScreepsApi;
use super::codec::inflate_payload;
use super::console::{ConsoleStream, StreamParams};
use super::types::{ConsoleMessage, ConsoleStreamState, Session};
use crate::config::{ConnectionConfig, Credentials};
use crate::error::{Error, Result};

const TOKEN_HEADER: &str = "X-Token";
const USERNAME_HEADER: &str = "X-Username";

/// Client for one Screeps server
pub struct ScreepsClient {
    http: Client,
    config: ConnectionConfig,
    session: RwLock<Option<Session>>,
    /// Held while authenticating so concurrent first calls share one login
    auth_lock: Mutex<()>,
    console: ConsoleStream,
}

impl ScreepsClient {
    /// Create a client. No network traffic happens until the first call.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("screeps-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(ScreepsClient {
            http,
            console: ConsoleStream::new(config.shard.clone()),
            config,
            session: RwLock::new(None),
            auth_lock: Mutex::new(()),
        })
    }

    /// Current session, if authenticated
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Obtain a token and confirm it with `/api/auth/me`.
    ///
    /// Replaces any existing session.
    pub async fn authenticate(&self) -> Result<Session> {
        let _guard = self.auth_lock.lock().await;
        self.login().await
    }

    async fn ensure_session(&self) -> Result<Session> {
        if let Some(session) = self.session().await {
            return Ok(session);
        }

        let _guard = self.auth_lock.lock().await;
        // Another caller may have logged in while we waited
        if let Some(session) = self.session().await {
            return Ok(session);
        }
        self.login().await
    }

    async fn login(&self) -> Result<Session> {
        let token = match &self.config.credentials {
            Credentials::Token(token) => token.clone(),
            Credentials::UsernamePassword { username, password } => {
                self.exchange_token(username, password).await?
            }
        };

        let url = self.url("/api/auth/me");
        let (me, refreshed) = self
            .execute(self.with_token(self.http.get(&url), &token))
            .await?;
        let token = refreshed.map(SecretString::from).unwrap_or(token);

        let user_id = me
            .get("_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Auth("Server did not report a user id".to_string()))?;
        let username = me
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let session = Session {
            token,
            user_id: user_id.to_string(),
            username: username.to_string(),
        };
        info!("Authenticated to {} as {}", self.config.host, session.username);

        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Trade a username and password for a restricted token
    async fn exchange_token(&self, username: &str, password: &SecretString) -> Result<SecretString> {
        debug!("Exchanging credentials for a token");
        let request = self
            .http
            .post(self.url("/api/user/auth-token"))
            .basic_auth(username, Some(password.expose_secret()))
            .json(&restricted_capabilities());

        let (body, _) = self.execute(request).await?;
        body.get("token")
            .and_then(Value::as_str)
            .map(SecretString::from)
            .ok_or_else(|| Error::Auth("Token exchange returned no token".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base(), path)
    }

    fn with_token(&self, request: RequestBuilder, token: &SecretString) -> RequestBuilder {
        // Servers read either header depending on their auth mod
        request
            .header(TOKEN_HEADER, token.expose_secret())
            .header(USERNAME_HEADER, token.expose_secret())
    }

    fn shard<'a>(&'a self, shard: Option<&'a str>) -> &'a str {
        shard.unwrap_or(&self.config.shard)
    }

    /// Send a request and interpret the response.
    ///
    /// Returns the JSON body and a refreshed token if the server sent one.
    async fn execute(&self, request: RequestBuilder) -> Result<(Value, Option<String>)> {
        let response = request.send().await?;
        let status = response.status();
        let refreshed = refreshed_token(response.headers());

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Auth("Token rejected by server".to_string()));
        }
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown Status");
            warn!("Screeps request failed: {} {}", status.as_u16(), reason);
            return Err(Error::Api {
                status: status.as_u16(),
                reason: reason.to_string(),
            });
        }

        let text = response.text().await?;
        let body = parse_body(&text);
        if let Some(message) = reported_error(&body) {
            return Err(Error::Remote(message.to_string()));
        }

        Ok((body, refreshed))
    }

    /// Authenticated call with the session token attached
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let session = self.ensure_session().await?;

        debug!("{} {}", method, path);
        let mut request = self.with_token(self.http.request(method, self.url(path)), &session.token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        match self.execute(request).await {
            Ok((body, refreshed)) => {
                if let Some(token) = refreshed {
                    self.refresh_token(token).await;
                }
                Ok(body)
            }
            Err(Error::Auth(message)) => {
                warn!("Session rejected; will re-authenticate on next call");
                *self.session.write().await = None;
                Err(Error::Auth(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_token(&self, token: String) {
        let mut session = self.session.write().await;
        if let Some(session) = session.as_mut() {
            if session.token.expose_secret() != token {
                debug!("Server issued a refreshed token");
                session.token = SecretString::from(token);
            }
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.call(Method::GET, path, query, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.call(Method::POST, path, &[], Some(body)).await
    }
}

#[async_trait::async_trait]
impl ScreepsApi for ScreepsClient {
    async fn user_info(&self) -> Result<Value> {
        self.get("/api/auth/me", &[]).await
    }

    async fn room_objects(&self, room: &str, shard: Option<&str>) -> Result<Value> {
        let query = [("room", room.to_string()), ("shard", self.shard(shard).to_string())];
        self.get("/api/game/room-objects", &query).await
    }

    async fn room_terrain(&self, room: &str, shard: Option<&str>, encoded: bool) -> Result<Value> {
        let mut query = vec![("room", room.to_string()), ("shard", self.shard(shard).to_string())];
        if encoded {
            query.push(("encoded", "1".to_string()));
        }
        self.get("/api/game/room-terrain", &query).await
    }

    async fn memory_get(&self, path: Option<&str>, shard: Option<&str>) -> Result<Value> {
        let mut query = vec![("shard", self.shard(shard).to_string())];
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }
        let mut body = self.get("/api/user/memory", &query).await?;
        decode_memory_data(&mut body)?;
        Ok(body)
    }

    async fn memory_set(&self, path: &str, value: &Value, shard: Option<&str>) -> Result<Value> {
        self.post(
            "/api/user/memory",
            json!({"path": path, "value": value, "shard": self.shard(shard)}),
        )
        .await
    }

    async fn memory_delete(&self, path: &str, shard: Option<&str>) -> Result<Value> {
        // A memory write without a value removes the key
        self.post("/api/user/memory", json!({"path": path, "shard": self.shard(shard)}))
            .await
    }

    async fn segment_get(&self, segment: u8, shard: Option<&str>) -> Result<Value> {
        let query = [
            ("segment", segment.to_string()),
            ("shard", self.shard(shard).to_string()),
        ];
        self.get("/api/user/memory-segment", &query).await
    }

    async fn segment_set(&self, segment: u8, data: &str, shard: Option<&str>) -> Result<Value> {
        self.post(
            "/api/user/memory-segment",
            json!({"segment": segment, "data": data, "shard": self.shard(shard)}),
        )
        .await
    }

    async fn console_command(&self, expression: &str, shard: Option<&str>) -> Result<Value> {
        self.post(
            "/api/user/console",
            json!({"expression": expression, "shard": self.shard(shard)}),
        )
        .await
    }

    async fn shard_info(&self) -> Result<Value> {
        self.get("/api/game/shards/info", &[]).await
    }

    async fn game_time(&self, shard: Option<&str>) -> Result<Value> {
        self.get("/api/game/time", &[("shard", self.shard(shard).to_string())])
            .await
    }

    async fn start_console_stream(
        &self,
        shard: Option<&str>,
        buffer_size: Option<usize>,
    ) -> Result<ConsoleStreamState> {
        let session = self.ensure_session().await?;
        let params = StreamParams {
            url: self.config.socket_url(),
            token: session.token,
            user_id: session.user_id,
            shard: self.shard(shard).to_string(),
            buffer_size,
            handshake_timeout: self.config.handshake_timeout,
        };
        self.console.start(params).await
    }

    async fn stop_console_stream(&self) -> ConsoleStreamState {
        self.console.stop().await
    }

    fn console_stream_state(&self) -> ConsoleStreamState {
        self.console.state()
    }

    fn read_console(&self, limit: usize, since: Option<i64>) -> Vec<ConsoleMessage> {
        self.console.read(limit, since)
    }
}

/// Capabilities requested when trading a password for a token
fn restricted_capabilities() -> Value {
    json!({
        "type": "restricted",
        "endpoints": {
            "GET /api/auth/me": true,
            "GET /api/game/room-objects": true,
            "GET /api/game/room-terrain": true,
            "GET /api/game/shards/info": true,
            "GET /api/game/time": true,
            "GET /api/user/memory": true,
            "POST /api/user/memory": true,
            "GET /api/user/memory-segment": true,
            "POST /api/user/memory-segment": true,
            "POST /api/user/console": true
        },
        "websockets": {
            "console": true
        }
    })
}

fn refreshed_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Empty or non-JSON bodies are an empty result
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| {
        debug!("Response body is not JSON; treating as empty");
        Value::Object(Map::new())
    })
}

/// `{"error": "..."}` without `ok` is a failure even on 2xx
fn reported_error(body: &Value) -> Option<&str> {
    let object = body.as_object()?;
    if object.contains_key("ok") {
        return None;
    }
    object.get("error").and_then(Value::as_str)
}

/// Memory values may come back compressed as `gz:<base64>`
fn decode_memory_data(body: &mut Value) -> Result<()> {
    let Some(data) = body.get_mut("data") else {
        return Ok(());
    };
    if let Some(encoded) = data.as_str().filter(|s| s.starts_with("gz:")) {
        *data = inflate_payload(encoded)?;
    }
    Ok(())
}
