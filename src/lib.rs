//! # cs-unifi-bouncer - CrowdSec bouncer for UniFi firewalls
//!
//! Keeps address groups and the firewall rules (or zone-based policies)
//! that block them on a UniFi controller in sync with the ban decisions
//! streamed by a CrowdSec Local API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     cs-unifi-bouncer                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap) + Config (serde_yaml, environment)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DecisionStream (reqwest)                                   │
//! │    └── /v1/decisions/stream  ──►  bounded mpsc channel      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EventLoop (tokio::select!)                                 │
//! │    ├── AddressCache      desired IPv4 / IPv6 sets           │
//! │    └── debounce timer ──► Reconciler                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler                                                 │
//! │    ├── Batcher           sorted fixed-size chunks           │
//! │    └── RemoteStateSnapshot  objects owned by the bouncer    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FirewallController trait                                   │
//! │    └── UnifiClient (legacy rules or zone policies)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cs_unifi_bouncer::config::Config;
//! use cs_unifi_bouncer::controller::{FirewallController, UnifiClient};
//! use cs_unifi_bouncer::event_loop::EventLoop;
//! use cs_unifi_bouncer::signal::ShutdownToken;
//! use cs_unifi_bouncer::stream::DecisionStream;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let timings = config.timings()?;
//!
//!     let controller: Arc<dyn FirewallController> =
//!         Arc::new(UnifiClient::connect(&config.unifi).await?);
//!     let event_loop =
//!         EventLoop::bootstrap(controller, config.engine_settings(), timings).await?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(config.channel_capacity);
//!     let shutdown = ShutdownToken::new();
//!     let stream = DecisionStream::new(&config.crowdsec, timings.update_interval)?;
//!     tokio::spawn(stream.run(tx, shutdown.clone()));
//!
//!     event_loop.run(rx, shutdown).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`batcher`] - Chunking of address sets and remote object names
//! - [`cache`] - Desired address sets
//! - [`cli`] - Command-line interface definitions
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`controller`] - Firewall controller abstraction and UniFi client
//! - [`decision`] - Decision stream payloads
//! - [`error`] - Startup and supervision errors
//! - [`event_loop`] - Debounced consumer of decision batches
//! - [`reconciler`] - Diff-based synchronization
//! - [`signal`] - Graceful shutdown signal handling
//! - [`snapshot`] - Remote objects owned by the bouncer
//! - [`stream`] - CrowdSec Local API poller
//! - [`validation`] - Address and interval parsing

pub mod batcher;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod decision;
pub mod error;
pub mod event_loop;
pub mod reconciler;
pub mod signal;
pub mod snapshot;
pub mod stream;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::BouncerError;
