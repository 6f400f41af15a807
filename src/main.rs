use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    booksync::logging::init().context("init logging")?;

    let cli = booksync::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = booksync::commands::resolve_config(&cli.global).context("resolve config")?;
    tracing::debug!(data_dir = %config.data_dir.display(), "resolved config");

    match cli.command {
        booksync::cli::Command::Doc(args) => {
            booksync::commands::doc(&config, args).await.context("doc")?;
        }
        booksync::cli::Command::Book(args) => {
            booksync::commands::book(&config, args).await.context("book")?;
        }
        booksync::cli::Command::Status => {
            booksync::commands::status(&config).await.context("status")?;
        }
    }

    Ok(())
}
