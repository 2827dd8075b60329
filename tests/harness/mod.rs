//! Test harness utilities for end-to-end latency runs.
//!
//! Provides a broadcast server that speaks the same API and notification
//! protocols as the servers `wsprobe` measures.

#![allow(dead_code)]

mod server;

pub use server::{EVENT, ServerOptions, TestServer};
