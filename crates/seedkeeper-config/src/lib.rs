#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! `PostgreSQL`-backed configuration facade.
//!
//! `ConfigService` reads global, per-downloader, and per-site settings
//! through `seedkeeper_data::SettingsStore` and `ConfigWatcher` tracks
//! revision bumps via `LISTEN`/`NOTIFY` with a polling fallback. Callers that
//! want settings changes turned into bus events use
//! [`ConfigService::spawn_debounced_publish`].

pub mod error;
pub mod service;

pub use error::{ConfigError, ConfigResult};
pub use service::{ConfigService, ConfigSnapshot, ConfigWatcher};
