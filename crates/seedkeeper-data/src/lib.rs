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

//! Shared domain model and data-access trait seams for the scheduling core.

pub mod error;
pub mod model;
pub mod repository;

pub use error::{DataError, Result as DataResult};
pub use model::{
    ArchiveReason, CleanupScope, ConditionMode, DownloaderConfig, GlobalSettings, JobKey,
    PendingTask, PendingTaskKind, SiteSettings, TorrentArchive, TorrentRecord,
};
pub use repository::{SettingsStore, TorrentRepository};
