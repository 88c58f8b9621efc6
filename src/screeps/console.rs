//! Console stream manager
//!
//! Owns the Screeps console WebSocket:
//!
//! ```text
//! Stopped -> Connecting -> Authenticating -> Subscribed -> Stopped
//!     ^          |               |
//!     +----------+---------------+  (error, close, timeout or stop)
//! ```
//!
//! `start` suspends until the stream is subscribed or has failed. After that a
//! background reader task decodes frames into a bounded buffer. Readers get
//! copies out of the buffer, so eviction never touches a result already
//! returned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::codec::{classify, decode_frame, Frame};
use super::types::{
    clamp_buffer_size, ConsoleMessage, ConsoleStreamState, StreamPhase, DEFAULT_BUFFER_SIZE,
};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `stop` waits for the reader to close the socket
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Bounded, arrival-ordered console history
#[derive(Debug, Clone)]
pub struct ConsoleBuffer {
    messages: VecDeque<ConsoleMessage>,
    capacity: usize,
}

impl ConsoleBuffer {
    /// Create an empty buffer holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        ConsoleBuffer {
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_SIZE)),
            capacity: capacity.max(1),
        }
    }

    /// Append a message, evicting the oldest ones past capacity
    pub fn push(&mut self, message: ConsoleMessage) {
        self.messages.push_back(message);
        self.trim();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ConsoleMessage>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Change the bound, trimming from the head if it shrank
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.trim();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Up to `limit` most recent messages newer than `since`, oldest first
    pub fn read(&self, limit: usize, since: Option<i64>) -> Vec<ConsoleMessage> {
        let mut recent: Vec<ConsoleMessage> = self
            .messages
            .iter()
            .rev()
            .filter(|m| since.map_or(true, |since| m.timestamp_millis > since))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    fn trim(&mut self) {
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

/// Everything `start` needs to open and authenticate a socket
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// `ws://` or `wss://` URL of the socket endpoint
    pub url: String,
    pub token: SecretString,
    pub user_id: String,
    pub shard: String,
    /// Requested buffer bound; clamped into the supported range
    pub buffer_size: Option<usize>,
    /// Bound on connect + `auth ok`
    pub handshake_timeout: Duration,
}

#[derive(Debug)]
struct Status {
    phase: StreamPhase,
    shard: String,
    /// Identifies the socket that owns the current phase
    session: u64,
}

struct Shared {
    buffer: RwLock<ConsoleBuffer>,
    status: Mutex<Status>,
    /// Bumped by every `stop`, so a handshake in flight can notice it
    stop_requests: AtomicU64,
    sessions: AtomicU64,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn buffer(&self) -> RwLockReadGuard<'_, ConsoleBuffer> {
        self.buffer.read().unwrap_or_else(|e| e.into_inner())
    }

    fn buffer_mut(&self) -> RwLockWriteGuard<'_, ConsoleBuffer> {
        self.buffer.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, session: u64, phase: StreamPhase) {
        let mut status = self.status();
        if status.session == session {
            status.phase = phase;
        }
    }

    fn admit_frame(&self, text: &str, shard: &str) {
        match decode_frame(text) {
            Ok(Frame::Payload(payload)) => {
                let now = chrono::Utc::now().timestamp_millis();
                let messages = classify(&payload, shard, now);
                if messages.is_empty() {
                    trace!("Ignoring console payload without lines");
                    return;
                }
                debug!("Buffering {} console line(s)", messages.len());
                self.buffer_mut().extend(messages);
            }
            Ok(Frame::Heartbeat) => trace!("Console heartbeat"),
            Ok(other) => debug!("Ignoring control frame after subscribe: {:?}", other),
            Err(e) => warn!("Discarding console frame: {}", e),
        }
    }
}

struct Reader {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl Reader {
    /// Ask the reader to close the socket; abort it past the grace period
    async fn close(mut self) {
        let _ = self.shutdown.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.handle).await.is_err() {
            warn!("Console reader did not close in time; aborting");
            self.handle.abort();
        }
    }
}

/// Console stream manager for one connection
pub struct ConsoleStream {
    shared: Arc<Shared>,
    /// Serializes `start` and `stop`; holds the live reader if any
    control: tokio::sync::Mutex<Option<Reader>>,
}

impl ConsoleStream {
    /// Create a stopped stream with the default buffer bound
    pub fn new(default_shard: impl Into<String>) -> Self {
        ConsoleStream {
            shared: Arc::new(Shared {
                buffer: RwLock::new(ConsoleBuffer::default()),
                status: Mutex::new(Status {
                    phase: StreamPhase::Stopped,
                    shard: default_shard.into(),
                    session: 0,
                }),
                stop_requests: AtomicU64::new(0),
                sessions: AtomicU64::new(0),
            }),
            control: tokio::sync::Mutex::new(None),
        }
    }

    /// Open, authenticate and subscribe.
    ///
    /// A no-op when already subscribed on `params.shard`. Resolves once the
    /// stream is subscribed; any failure before that leaves it stopped.
    pub async fn start(&self, params: StreamParams) -> Result<ConsoleStreamState> {
        let mut control = self.control.lock().await;
        let stops_seen = self.shared.stop_requests.load(Ordering::SeqCst);

        let alive = control.as_ref().is_some_and(|r| !r.handle.is_finished());
        {
            let status = self.shared.status();
            if alive && status.phase == StreamPhase::Subscribed && status.shard == params.shard {
                debug!("Console stream already subscribed on {}", params.shard);
                drop(status);
                return Ok(self.state());
            }
        }

        if let Some(reader) = control.take() {
            info!("Restarting console stream on {}", params.shard);
            reader.close().await;
        }

        if let Some(size) = params.buffer_size {
            self.shared.buffer_mut().set_capacity(clamp_buffer_size(size));
        }

        let session = self.shared.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut status = self.shared.status();
            status.session = session;
            status.shard = params.shard.clone();
            status.phase = StreamPhase::Connecting;
        }

        let handshake = tokio::time::timeout(
            params.handshake_timeout,
            self.handshake(&params, session),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "Console handshake did not complete within {:?}",
                params.handshake_timeout
            ))
        })
        .and_then(|r| r);

        let mut ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                warn!("Console stream failed to start: {}", e);
                self.shared.set_phase(session, StreamPhase::Stopped);
                return Err(e);
            }
        };

        if self.shared.stop_requests.load(Ordering::SeqCst) != stops_seen {
            info!("Console stream stopped during handshake");
            let _ = ws.close(None).await;
            self.shared.set_phase(session, StreamPhase::Stopped);
            return Err(Error::WebSocket(
                "Console stream was stopped before subscription completed".to_string(),
            ));
        }

        self.shared.set_phase(session, StreamPhase::Subscribed);
        info!("Console stream subscribed on {}", params.shard);

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_reader(
            ws,
            Arc::clone(&self.shared),
            params.shard.clone(),
            session,
            shutdown_rx,
        ));
        *control = Some(Reader { handle, shutdown });

        Ok(self.state())
    }

    async fn handshake(&self, params: &StreamParams, session: u64) -> Result<WsStream> {
        debug!("Connecting console socket: {}", params.url);
        let (mut ws, _) = tokio_tungstenite::connect_async(params.url.as_str()).await?;

        self.shared.set_phase(session, StreamPhase::Authenticating);
        ws.send(Message::Text(format!(
            "auth {}",
            params.token.expose_secret()
        )))
        .await?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(Frame::AuthOk(_)) => break,
                    Ok(Frame::AuthFailed) => {
                        let _ = ws.close(None).await;
                        return Err(Error::Auth("Console socket rejected the token".to_string()));
                    }
                    Ok(_) => trace!("Skipping frame while authenticating"),
                    Err(e) => debug!("Skipping undecodable frame while authenticating: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(Error::WebSocket(
                        "Console socket closed before authentication".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }

        let channel = format!("user:{}/console", params.user_id);
        debug!("Subscribing to {}", channel);
        ws.send(Message::Text(format!("subscribe {}", channel))).await?;

        Ok(ws)
    }

    /// Close the socket if open. Buffered messages are kept.
    pub async fn stop(&self) -> ConsoleStreamState {
        self.shared.stop_requests.fetch_add(1, Ordering::SeqCst);
        let mut control = self.control.lock().await;

        if let Some(reader) = control.take() {
            info!("Stopping console stream");
            reader.close().await;
        }
        self.shared.status().phase = StreamPhase::Stopped;

        self.state()
    }

    /// Current phase and buffer occupancy
    pub fn state(&self) -> ConsoleStreamState {
        let (phase, shard) = {
            let status = self.shared.status();
            (status.phase, status.shard.clone())
        };
        let buffer = self.shared.buffer();

        ConsoleStreamState {
            shard,
            is_active: phase == StreamPhase::Subscribed,
            phase,
            buffered_count: buffer.len(),
            max_buffered_count: buffer.capacity(),
        }
    }

    /// Copies of up to `limit` most recent messages newer than `since`
    pub fn read(&self, limit: usize, since: Option<i64>) -> Vec<ConsoleMessage> {
        self.shared.buffer().read(limit, since)
    }
}

async fn run_reader(
    mut ws: WsStream,
    shared: Arc<Shared>,
    shard: String,
    session: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = ws.close(None).await;
                break;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.admit_frame(&text, &shard),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.admit_frame(&text, &shard),
                    Err(_) => warn!("Discarding non UTF-8 console frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Console socket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Console socket error: {}", e);
                    break;
                }
            }
        }
    }

    shared.set_phase(session, StreamPhase::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screeps::codec::encode_gz;
    use crate::screeps::types::ConsoleKind;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn message(line: &str, ts: i64) -> ConsoleMessage {
        ConsoleMessage {
            line: line.to_string(),
            shard: "shard0".to_string(),
            timestamp_millis: ts,
            kind: ConsoleKind::Log,
        }
    }

    fn lines(messages: &[ConsoleMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.line.as_str()).collect()
    }

    #[test]
    fn test_buffer_keeps_most_recent() {
        let mut buffer = ConsoleBuffer::new(3);
        for (i, line) in ["A", "B", "C", "D"].iter().enumerate() {
            buffer.push(message(line, i as i64));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(lines(&buffer.read(10, None)), vec!["B", "C", "D"]);
    }

    #[test]
    fn test_buffer_bound_holds_for_any_count() {
        for bound in [1usize, 3, 10] {
            for n in 0..25usize {
                let mut buffer = ConsoleBuffer::new(bound);
                buffer.extend((0..n).map(|i| message(&i.to_string(), i as i64)));
                assert_eq!(buffer.len(), n.min(bound));
                let expected: Vec<String> =
                    (n.saturating_sub(bound)..n).map(|i| i.to_string()).collect();
                let got: Vec<String> = buffer.read(usize::MAX, None).into_iter().map(|m| m.line).collect();
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn test_read_limit_and_since() {
        let mut buffer = ConsoleBuffer::new(100);
        buffer.extend((1..=10).map(|i| message(&format!("m{}", i), i)));

        let recent = buffer.read(3, None);
        assert_eq!(lines(&recent), vec!["m8", "m9", "m10"]);

        let newer = buffer.read(100, Some(7));
        assert_eq!(lines(&newer), vec!["m8", "m9", "m10"]);
        assert!(newer.iter().all(|m| m.timestamp_millis > 7));

        let limited = buffer.read(2, Some(3));
        assert_eq!(lines(&limited), vec!["m9", "m10"]);

        assert!(buffer.read(5, Some(10)).is_empty());
    }

    #[test]
    fn test_read_returns_copies() {
        let mut buffer = ConsoleBuffer::new(2);
        buffer.push(message("first", 1));
        let before = buffer.read(10, None);
        buffer.push(message("second", 2));
        buffer.push(message("third", 3));
        assert_eq!(lines(&before), vec!["first"]);
    }

    #[test]
    fn test_shrinking_capacity_trims_head() {
        let mut buffer = ConsoleBuffer::new(10);
        buffer.extend((0..8).map(|i| message(&i.to_string(), i)));
        buffer.set_capacity(5);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.read(1, None)[0].line, "7");
    }

    /// What the fake server should do after accepting a socket
    #[derive(Clone)]
    enum Script {
        /// Accept auth, then push frames and wait for the client to close
        Serve(Vec<String>),
        /// Accept auth, push frames, then hang up
        ServeAndHangUp(Vec<String>),
        /// Hold `auth ok` back for a while, then serve nothing
        DelayAuth(Duration),
        RejectAuth,
        DropImmediately,
    }

    async fn fake_server(script: Script) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            if matches!(script, Script::DropImmediately) {
                drop(tcp);
                return received;
            }

            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let auth = ws.next().await.unwrap().unwrap().into_text().unwrap();
            received.push(auth);

            ws.send(Message::Text("time 1".to_string())).await.unwrap();
            let (frames, hang_up) = match script {
                Script::RejectAuth => {
                    ws.send(Message::Text("auth failed".to_string())).await.unwrap();
                    return received;
                }
                Script::Serve(frames) => (frames, false),
                Script::ServeAndHangUp(frames) => (frames, true),
                Script::DelayAuth(delay) => {
                    tokio::time::sleep(delay).await;
                    (Vec::new(), false)
                }
                Script::DropImmediately => unreachable!(),
            };

            ws.send(Message::Text("auth ok fresh-token".to_string())).await.unwrap();
            let subscribe = ws.next().await.unwrap().unwrap().into_text().unwrap();
            received.push(subscribe);

            for frame in frames {
                ws.send(Message::Text(frame)).await.unwrap();
            }

            if hang_up {
                let _ = ws.close(None).await;
                return received;
            }

            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    received.push("<close>".to_string());
                    break;
                }
            }
            received
        });

        (format!("ws://{}", addr), handle)
    }

    fn params(url: &str, buffer_size: Option<usize>) -> StreamParams {
        StreamParams {
            url: url.to_string(),
            token: SecretString::from("tok"),
            user_id: "u1".to_string(),
            shard: "shard0".to_string(),
            buffer_size,
            handshake_timeout: Duration::from_secs(2),
        }
    }

    async fn wait_for_count(stream: &ConsoleStream, count: usize) {
        for _ in 0..200 {
            if stream.state().buffered_count >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("buffer never reached {} messages", count);
    }

    #[tokio::test]
    async fn test_stream_lifecycle() {
        let frames = vec![
            r#"["user:u1/console",{"messages":{"log":["A","B"]}}]"#.to_string(),
            "not json at all".to_string(),
            "time 2".to_string(),
            r#"["user:u1/console",{"unexpected":true}]"#.to_string(),
            encode_gz(&json!(["user:u1/console", {"log": ["<b>hi</b>"]}]), false),
        ];
        let (url, server) = fake_server(Script::Serve(frames)).await;

        let stream = ConsoleStream::new("shard0");
        let state = stream.start(params(&url, Some(50))).await.unwrap();
        assert!(state.is_active);
        assert_eq!(state.phase, StreamPhase::Subscribed);
        assert_eq!(state.max_buffered_count, 50);

        // Second start on the same shard must not open another socket
        let again = stream.start(params(&url, None)).await.unwrap();
        assert!(again.is_active);

        wait_for_count(&stream, 3).await;
        let messages = stream.read(10, None);
        assert_eq!(lines(&messages), vec!["A", "B", "hi"]);

        let stopped = stream.stop().await;
        assert!(!stopped.is_active);
        assert_eq!(stopped.phase, StreamPhase::Stopped);
        assert_eq!(stopped.buffered_count, 3);
        assert_eq!(stream.read(10, None).len(), 3);

        let received = server.await.unwrap();
        assert_eq!(received[0], "auth tok");
        assert_eq!(received[1], "subscribe user:u1/console");
        assert_eq!(received.last().map(String::as_str), Some("<close>"));
    }

    #[tokio::test]
    async fn test_start_clamps_buffer_size() {
        let (url, _server) = fake_server(Script::Serve(Vec::new())).await;
        let stream = ConsoleStream::new("shard0");
        let state = stream.start(params(&url, Some(3))).await.unwrap();
        assert_eq!(state.max_buffered_count, 10);
        stream.stop().await;
    }

    #[tokio::test]
    async fn test_auth_failed_stops_stream() {
        let (url, _server) = fake_server(Script::RejectAuth).await;
        let stream = ConsoleStream::new("shard0");
        let err = stream.start(params(&url, None)).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(stream.state().phase, StreamPhase::Stopped);
    }

    #[tokio::test]
    async fn test_close_before_subscribe_fails_start() {
        let (url, _server) = fake_server(Script::DropImmediately).await;
        let stream = ConsoleStream::new("shard0");
        assert!(stream.start(params(&url, None)).await.is_err());
        assert!(!stream.state().is_active);
    }

    #[tokio::test]
    async fn test_server_hang_up_goes_inactive_and_keeps_buffer() {
        let frames = vec![r#"["user:u1/console",{"log":["kept"]}]"#.to_string()];
        let (url, server) = fake_server(Script::ServeAndHangUp(frames)).await;
        let stream = ConsoleStream::new("shard0");
        stream.start(params(&url, None)).await.unwrap();
        server.await.unwrap();

        for _ in 0..200 {
            if !stream.state().is_active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let state = stream.state();
        assert!(!state.is_active);
        assert_eq!(state.buffered_count, 1);
        assert_eq!(stream.read(5, None)[0].line, "kept");
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        // Accepts TCP but never completes the WebSocket upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(tcp);
        });

        let stream = ConsoleStream::new("shard0");
        let mut p = params(&format!("ws://{}", addr), None);
        p.handshake_timeout = Duration::from_millis(200);
        let err = stream.start(p).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(stream.state().phase, StreamPhase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_during_handshake_wins() {
        let (url, server) = fake_server(Script::DelayAuth(Duration::from_millis(300))).await;
        let stream = ConsoleStream::new("shard0");

        let stopper = async {
            for _ in 0..200 {
                if stream.state().phase == StreamPhase::Authenticating {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stream.stop().await
        };
        let (started, stopped) = tokio::join!(stream.start(params(&url, None)), stopper);

        assert!(started.is_err());
        assert_eq!(stopped.phase, StreamPhase::Stopped);
        assert_eq!(stream.state().phase, StreamPhase::Stopped);
        assert!(!stream.state().is_active);

        let received = server.await.unwrap();
        assert_eq!(received.last().map(String::as_str), Some("<close>"));
    }

    #[tokio::test]
    async fn test_stuck_reader_is_aborted() {
        let guard = Arc::new(());
        let held = Arc::clone(&guard);
        let (shutdown, _ignored) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let _held = held;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        Reader { handle, shutdown }.close().await;

        for _ in 0..100 {
            if Arc::strong_count(&guard) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reader task was left running");
    }
}
