//! YouTube live stream monitor exposing Prometheus metrics.
//!
//! This crate polls the YouTube Data API for a configured set of live streams
//! and exposes their status, audience and engagement via an HTTP `/metrics`
//! endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  YouTube API    │<────│  StreamPoller   │────>│ MetricRegistry  │
//! │  (videos, ...)  │     │  (one per feed) │     │                 │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! streamwatch-exporter --config streamwatch.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod api;
pub mod config;
pub mod entity;
pub mod exposition;
pub mod http;
pub mod registry;
pub mod schema;
pub mod supervisor;
pub mod worker;

pub use api::{ApiError, VideoPlatformApi, YouTubeClient};
pub use config::ExporterConfig;
pub use entity::StreamEntity;
pub use http::HttpServer;
pub use registry::{MetricRegistry, RegistryError, SharedRegistry};
pub use supervisor::{ApiFactory, Supervisor};
pub use worker::{PollCadence, StreamPoller};
