use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::cli::{BookArgs, DocArgs, GlobalArgs};
use crate::config::{RemoteBackend, SyncConfig};
use crate::notify::{Notifier, NullNotifier, StdoutNotifier};
use crate::store::index::BookStrategy;
use crate::sync::{EbookConfig, Syncer};

/// Environment first, then command-line overrides.
pub fn resolve_config(global: &GlobalArgs) -> anyhow::Result<SyncConfig> {
    let mut config = SyncConfig::from_env().context("read BOOKSYNC_* environment")?;

    if let Some(data_dir) = &global.data_dir {
        // Keep the default remote next to the index it belongs to.
        if config.remote == RemoteBackend::LocalDir(config.data_dir.join("remote")) {
            config.remote = RemoteBackend::LocalDir(data_dir.join("remote"));
        }
        config.data_dir = data_dir.clone();
    }
    if let Some(dir) = &global.remote_dir {
        config.remote = RemoteBackend::LocalDir(dir.clone());
    }
    if let Some(bucket) = &global.gcs_bucket {
        let token = match &config.remote {
            RemoteBackend::Gcs { token, .. } => token.clone(),
            RemoteBackend::LocalDir(_) => None,
        };
        config.remote = RemoteBackend::Gcs {
            bucket: bucket.clone(),
            token,
        };
    }
    if let Some(retries) = global.upload_retries {
        config.upload_retries = retries;
    }
    if let Some(secs) = global.upload_timeout_secs {
        config.upload_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

/// Cancels the token on Ctrl-C so in-flight syncs stop at the next boundary.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling sync");
            token.cancel();
        }
    });
    cancel
}

pub async fn doc(config: &SyncConfig, args: DocArgs) -> anyhow::Result<()> {
    let notifier: Arc<dyn Notifier> = if args.quiet {
        Arc::new(NullNotifier)
    } else {
        Arc::new(StdoutNotifier)
    };
    let syncer = Syncer::from_config(config, notifier);
    let cancel = cancel_on_ctrl_c();

    let report = syncer.sync_doc_file(&args.path, &cancel).await?;
    tracing::info!(
        uploaded = report.uploaded.len(),
        path = %args.path.display(),
        "doc synced"
    );
    Ok(())
}

pub async fn book(config: &SyncConfig, args: BookArgs) -> anyhow::Result<()> {
    let book = match &args.config {
        Some(path) => EbookConfig::from_yaml_file(path).await?,
        None => EbookConfig {
            id: args.book_id,
            name: args.name.context("--name is required")?,
            remote_path: args.remote_path.context("--remote-path is required")?,
            root: args.root.context("--root is required")?,
            strategy: args.strategy.unwrap_or(BookStrategy::Auto),
            ignore_paths: args.ignore,
        },
    };

    let syncer = Syncer::from_config(config, Arc::new(NullNotifier));
    let cancel = cancel_on_ctrl_c();
    let report = syncer.sync_ebook(&book, &cancel).await?;

    let json = serde_json::to_string_pretty(&report).context("serialize sync report")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("write sync report")?;
    Ok(())
}

pub async fn status(config: &SyncConfig) -> anyhow::Result<()> {
    let syncer = Syncer::from_config(config, Arc::new(NullNotifier));
    let index = syncer.index();

    let mut lines = Vec::new();
    for book in index.books().await? {
        let chapters = index.chapters_by_book(book.id).await?.len();
        lines.push(format!(
            "{id}\t{name}\tbooks/{remote}\t{chapters} chapter(s)\t{root}",
            id = book.id,
            name = book.name,
            remote = book.remote_path,
            root = book.root_path.display(),
        ));
    }

    let mut stdout = std::io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{line}").context("write status")?;
    }
    Ok(())
}
