//! Configuration for a measurement session.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::connection::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::socketio;

/// Event name the gold price server broadcasts on.
pub const DEFAULT_EVENT: &str = "gold-prices-updated";

/// Path of a plain WebSocket broadcast endpoint.
pub const DEFAULT_RAW_PATH: &str = "/ws";

/// Resource limits for the WebSocket client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum size of the handshake response headers.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the frame limit.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if a reassembled message of `size`
    /// bytes exceeds the message limit.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the handshake limit.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Phase timeouts. Every wait in the harness is bounded by one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Per-client limit for TCP connect, TLS and the opening handshake.
    ///
    /// Default: 10 seconds
    pub connect: Duration,

    /// How long to wait for outstanding connects after the last one was
    /// launched.
    ///
    /// Default: 10 seconds
    pub connect_phase: Duration,

    /// Trigger request timeout.
    ///
    /// Default: 5 seconds
    pub trigger: Duration,

    /// How long to wait for notifications after the trigger was acknowledged.
    ///
    /// Default: 10 seconds
    pub propagation: Duration,

    /// Grace period for closing connections before their tasks are aborted.
    ///
    /// Default: 2 seconds
    pub disconnect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            connect_phase: Duration::from_secs(10),
            trigger: Duration::from_secs(5),
            propagation: Duration::from_secs(10),
            disconnect: Duration::from_secs(2),
        }
    }
}

/// How notifications are carried on the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Every text frame is a notification.
    Raw,
    /// Socket.IO events named `event` are notifications.
    SocketIo { event: String },
}

impl Default for Framing {
    fn default() -> Self {
        Framing::SocketIo {
            event: DEFAULT_EVENT.to_string(),
        }
    }
}

impl Framing {
    /// Request path used when no explicit WebSocket URL is configured.
    #[must_use]
    pub fn default_path(&self) -> &'static str {
        match self {
            Framing::Raw => DEFAULT_RAW_PATH,
            Framing::SocketIo { .. } => socketio::DEFAULT_PATH,
        }
    }
}

/// Which notifications count for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Only notifications whose body carries the round's payload marker.
    #[default]
    Marker,
    /// The first notification after the round is armed.
    Any,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL of the server, e.g. `http://localhost:3010`.
    pub server_url: String,

    /// Path the trigger update is posted to.
    ///
    /// Default: `/api/add`
    pub api_endpoint: String,

    /// Number of subscriber connections to open.
    ///
    /// Default: 100
    pub client_count: usize,

    /// Explicit WebSocket URL. Derived from `server_url` when `None`.
    pub ws_url: Option<String>,

    /// WebSocket request path used when deriving the URL. Falls back to the
    /// framing's default path when `None`.
    pub ws_path: Option<String>,

    /// Notification framing.
    pub framing: Framing,

    /// Notification matching rule.
    pub match_mode: MatchMode,

    /// Delay between consecutive connect attempts.
    ///
    /// Default: 50 ms
    pub stagger: Duration,

    /// Pause after the connect phase before the first trigger.
    ///
    /// Default: 2 seconds
    pub settle: Duration,

    /// Phase timeouts.
    pub timeouts: Timeouts,

    /// Transport limits.
    pub limits: Limits,

    /// Debug-level logging was requested. Picks the default log filter in
    /// [`crate::observability::init_tracing`].
    pub verbose: bool,

    /// Upper bound for a multi-round run. No round starts after it elapses.
    pub max_duration: Option<Duration>,

    /// Extra PEM CA certificates trusted for `wss://`.
    pub ca_file: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3010".to_string(),
            api_endpoint: "/api/add".to_string(),
            client_count: 100,
            ws_url: None,
            ws_path: None,
            framing: Framing::default(),
            match_mode: MatchMode::default(),
            stagger: Duration::from_millis(50),
            settle: Duration::from_secs(2),
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            verbose: false,
            max_duration: None,
            ca_file: None,
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn new(server_url: impl Into<String>, client_count: usize) -> Self {
        Self {
            server_url: server_url.into(),
            client_count,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_api_endpoint(mut self, path: impl Into<String>) -> Self {
        self.api_endpoint = path.into();
        self
    }

    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    #[must_use]
    pub const fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub const fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_duration = Some(max);
        self
    }

    #[must_use]
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Full URL of the trigger endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` if the base URL or path does not parse.
    pub fn trigger_url(&self) -> Result<Url> {
        let base = Url::parse(&self.server_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.server_url)))?;
        base.join(&self.api_endpoint)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.api_endpoint)))
    }

    /// WebSocket endpoint the subscribers connect to.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` if no usable URL can be formed.
    pub fn ws_endpoint(&self) -> Result<Endpoint> {
        match &self.ws_url {
            Some(url) => Endpoint::parse(url),
            None => {
                let path = self
                    .ws_path
                    .as_deref()
                    .unwrap_or_else(|| self.framing.default_path());
                Endpoint::derive(&self.server_url, path)
            }
        }
    }
}
