//! # rfbridge - RF gateway bridge
//!
//! rfbridge keeps a single connection to a 433 MHz RF gateway (serial or TCP) alive
//! and turns its stream of loosely typed packets into events for logical devices. Devices
//! send commands back through the same connection.
//!
//! ## Features
//!
//! - **Reconnecting link**: a failed connect is retried at a fixed interval, a dropped
//!   link is replaced at once, and commands never reach a stale connection.
//! - **Alias-aware routing**: one handler can answer to several device ids, several
//!   handlers can share one id, and unknown ids can add devices on the fly.
//! - **Signal repetitions**: commands can be sent several times over the lossy RF link;
//!   any newer command, local or from a remote, cancels the queued repeats.
//! - **Ack-wait policy**: optionally wait for the gateway to confirm each transmission.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rfbridge::bridge::Bridge;
//! use rfbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut bridge = Bridge::new(config)?;
//!     bridge.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - connection manager, registry, router, dispatchers and devices
//! - [`gateway`] - transport traits and the RFLink line-protocol binding
//! - [`config`] - TOML configuration
//! - [`error`] - error types
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - log sanitizing helpers

pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logutil;
pub mod metrics;
