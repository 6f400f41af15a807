#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod document;
pub mod error;
pub mod formats;
pub mod hash;
pub mod logging;
pub mod markdown;
pub mod notify;
pub mod paths;
pub mod publish;
pub mod reconcile;
pub mod slug;
pub mod store;
pub mod sync;
pub mod transform;
pub mod walker;

pub use error::SyncError;
pub use sync::{EbookConfig, SyncReport, Syncer};
