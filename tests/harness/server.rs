//! Broadcast test server.
//!
//! An axum API accepts `POST /api/add` and fans the body out to every
//! WebSocket subscriber, either as plain text frames or as Socket.IO events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use wsprobe::protocol::handshake::{compute_accept_key, find_header_end, parse_headers};
use wsprobe::protocol::{Frame, OpCode};
use wsprobe::{Framing, HarnessConfig, Timeouts};

pub const EVENT: &str = "gold-prices-updated";

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Speak Engine.IO / Socket.IO on the WebSocket.
    pub socketio: bool,
    /// Answer every update with 500.
    pub reject_updates: bool,
    /// Zero-based index of an accepted connection to refuse with 403.
    pub refuse_connection: Option<usize>,
    /// The first N accepted connections never receive broadcasts.
    pub silent_connections: usize,
    /// Delay between the API response and the broadcast.
    pub broadcast_delay: Duration,
}

#[derive(Clone)]
struct ApiState {
    tx: broadcast::Sender<String>,
    options: Arc<ServerOptions>,
    updates: Arc<AtomicUsize>,
}

pub struct TestServer {
    api_addr: SocketAddr,
    ws_addr: SocketAddr,
    tx: broadcast::Sender<String>,
    accepted: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    options: Arc<ServerOptions>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerOptions::default()).await
    }

    pub async fn spawn_with(options: ServerOptions) -> Self {
        let options = Arc::new(options);
        let (tx, _) = broadcast::channel(1024);
        let accepted = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));

        let api = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_addr = api.local_addr().unwrap();
        let app = Router::new()
            .route("/api/add", post(add_update))
            .with_state(ApiState {
                tx: tx.clone(),
                options: Arc::clone(&options),
                updates: Arc::clone(&updates),
            });
        let api_task = tokio::spawn(async move {
            axum::serve(api, app).await.unwrap();
        });

        let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws.local_addr().unwrap();
        let ws_task = {
            let tx = tx.clone();
            let accepted = Arc::clone(&accepted);
            let options = Arc::clone(&options);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = ws.accept().await else {
                        break;
                    };
                    let index = accepted.fetch_add(1, Ordering::SeqCst);
                    let rx = tx.subscribe();
                    let options = Arc::clone(&options);
                    tokio::spawn(async move {
                        let _ = serve_subscriber(stream, index, rx, &options).await;
                    });
                }
            })
        };

        Self {
            api_addr,
            ws_addr,
            tx,
            accepted,
            updates,
            options,
            tasks: vec![api_task, ws_task],
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://{}", self.api_addr)
    }

    pub fn ws_url(&self) -> String {
        if self.options.socketio {
            format!("ws://{}/socket.io/?EIO=4&transport=websocket", self.ws_addr)
        } else {
            format!("ws://{}/ws", self.ws_addr)
        }
    }

    /// Harness configuration pointed at this server with short timeouts.
    pub fn config(&self, clients: usize) -> HarnessConfig {
        let framing = if self.options.socketio {
            Framing::SocketIo {
                event: EVENT.to_string(),
            }
        } else {
            Framing::Raw
        };
        HarnessConfig::new(self.server_url(), clients)
            .with_ws_url(self.ws_url())
            .with_framing(framing)
            .with_stagger(Duration::ZERO)
            .with_settle(Duration::ZERO)
            .with_timeouts(Timeouts {
                connect: Duration::from_secs(5),
                connect_phase: Duration::from_secs(5),
                trigger: Duration::from_secs(5),
                propagation: Duration::from_secs(5),
                disconnect: Duration::from_secs(1),
            })
    }

    /// Push a raw notification to every subscriber.
    pub fn broadcast(&self, text: &str) {
        let _ = self.tx.send(text.to_string());
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn add_update(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    state.updates.fetch_add(1, Ordering::SeqCst);
    if state.options.reject_updates {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response();
    }

    let text = if state.options.socketio {
        format!(r#"42["{EVENT}",{body}]"#)
    } else {
        body.to_string()
    };
    let delay = state.options.broadcast_delay;
    if delay.is_zero() {
        let _ = state.tx.send(text);
    } else {
        let tx = state.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(text);
        });
    }
    (StatusCode::CREATED, Json(body)).into_response()
}

/// One subscriber connection: upgrade, optional Socket.IO open, then relay
/// broadcasts until the client closes.
async fn serve_subscriber(
    mut stream: TcpStream,
    index: usize,
    mut rx: broadcast::Receiver<String>,
    options: &ServerOptions,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let header_end = loop {
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    if options.refuse_connection == Some(index) {
        stream
            .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
            .await?;
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let headers = parse_headers(request.lines().skip(1));
    let key = headers.get("sec-websocket-key").cloned().unwrap_or_default();
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(&key)
    );
    stream.write_all(response.as_bytes()).await?;
    buf.drain(..header_end);

    if options.socketio {
        send_text(
            &mut stream,
            r#"0{"sid":"test","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
        )
        .await?;
        match read_frame(&mut stream, &mut buf).await? {
            Some(frame) if frame.payload() == b"40" => {
                send_text(&mut stream, r#"40{"sid":"ns-test"}"#).await?;
            }
            _ => return Ok(()),
        }
    }

    let silent = index < options.silent_connections;
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(text) if !silent => send_text(&mut stream, &text).await?,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            frame = read_frame(&mut stream, &mut buf) => match frame? {
                Some(frame) if frame.opcode == OpCode::Close => {
                    let mut out = Vec::new();
                    Frame::close(Some(1000), "").write_to(&mut out, None);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
                Some(frame) if frame.opcode == OpCode::Ping => {
                    let mut out = Vec::new();
                    Frame::pong(frame.into_payload()).write_to(&mut out, None);
                    stream.write_all(&out).await?;
                }
                Some(_) => {}
                None => return Ok(()),
            },
        }
    }
}

async fn send_text(stream: &mut TcpStream, text: &str) -> std::io::Result<()> {
    let mut out = Vec::new();
    Frame::text(text).write_to(&mut out, None);
    stream.write_all(&out).await
}

/// Read one client frame. `None` on EOF. Partial frames stay in `buf`.
async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<Option<Frame>> {
    loop {
        if let Ok((frame, consumed)) = Frame::parse(buf) {
            buf.drain(..consumed);
            return Ok(Some(frame));
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
