//! # wsprobe - Fan-out propagation latency for WebSocket broadcast servers
//!
//! `wsprobe` opens many subscriber connections to a real-time server, fires a
//! single state-changing HTTP request, and measures how long the resulting
//! broadcast takes to reach every subscriber.
//!
//! ## Features
//!
//! - **Round state machine** with bounded connect, trigger and propagation phases
//! - **Client-role RFC 6455 transport** with masking, ping/pong and close handshake
//! - **Socket.IO framing** (Engine.IO v4) or plain text notifications
//! - **Statistics** with linear-interpolation percentiles and sample stddev
//! - **JSON reports** and a cross-run scalability table
//! - **TLS** for `wss://` via rustls (feature `tls-rustls`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsprobe::{HarnessConfig, LatencyHarness, SummaryReport, UpdatePayload};
//!
//! let config = HarnessConfig::new("http://localhost:3010", 100);
//! let mut harness = LatencyHarness::from_config(config.clone())?;
//! harness.connect().await?;
//! let round = harness.run_round(UpdatePayload::fresh()).await?;
//! SummaryReport::from_round(&config, &round).write_to_dir("results".as_ref())?;
//! harness.disconnect_all().await;
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod harness;
pub mod message;
pub mod observability;
pub mod protocol;
pub mod report;
pub mod stats;
pub mod tls;

pub use codec::FrameCodec;
pub use config::{Framing, HarnessConfig, Limits, MatchMode, Timeouts};
pub use connection::{ConnectionState, Dialer, Endpoint, WebSocket};
pub use error::{Error, Result};
pub use harness::{
    ConnectFailure, Connector, HttpTrigger, LatencyHarness, MeasurementRound, Receipt,
    RoundPhase, RoundStatus, Subscriber, Trigger, UpdatePayload, WsConnector,
};
pub use message::{CloseCode, CloseFrame, Message};
pub use report::{ScalabilityRow, SummaryReport};
pub use stats::{Summary, summarize};
