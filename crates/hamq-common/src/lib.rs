//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Shared primitives and utilities for the core runtime."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
//! Core shared primitives for the HAMQ workspace.
//! This crate exposes configuration loading and logging bootstrap
//! consumed by the dispatcher, the consumers and the daemon.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CodecConfig, CompressionKind, ConsumerConfig, DeliveryMode, EndpointConfig,
    EndpointsConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, PayloadFormatKind,
    ProducerConfig,
};
pub use logging::{init_tracing, LogFormat};
