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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Downloader registry, job supervision, and the free-end/cleanup monitors,
//! wired together into a running process.
//!
//! Layout: `bootstrap.rs` (environment loading and service wiring),
//! `manager.rs` (top-level facade), `registry.rs` (downloader client
//! lookup and reconnect backoff), `jobs.rs` (per-feed task supervision),
//! `free_end.rs` (free-leech expiry scheduling), `cleanup.rs`
//! (retention/ratio/disk-pressure removal).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Retention, ratio, and disk-pressure driven torrent removal.
pub mod cleanup;
/// Application-level error type.
pub mod error;
/// Free-leech expiry scheduling and the claim/decide/act pipeline.
pub mod free_end;
/// Per-feed background task supervision.
pub mod jobs;
/// Top-level facade wiring every component together.
pub mod manager;
/// Downloader client lookup, health checks, and reconnect backoff.
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
