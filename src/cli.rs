use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::store::index::BookStrategy;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the `BOOKSYNC_*` environment.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Directory holding the local index.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Publish into this directory instead of a bucket.
    #[arg(long, global = true, conflicts_with = "gcs_bucket")]
    pub remote_dir: Option<PathBuf>,

    /// Publish into this Google Cloud Storage bucket.
    #[arg(long, global = true)]
    pub gcs_bucket: Option<String>,

    /// Extra attempts after a failed upload.
    #[arg(long, global = true)]
    pub upload_retries: Option<usize>,

    /// Per-attempt upload timeout.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub upload_timeout_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish a single Markdown document and print its share payload.
    Doc(DocArgs),
    /// Mirror a directory of Markdown chapters as a book.
    Book(BookArgs),
    /// List known books.
    Status,
}

#[derive(Debug, Args)]
pub struct DocArgs {
    /// Markdown file to publish.
    #[arg(long)]
    pub path: PathBuf,

    /// Do not print the share payload.
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct BookArgs {
    /// YAML book description (name, remote_path, root, ...).
    #[arg(long, conflicts_with_all = ["root", "name", "remote_path", "ignore", "strategy", "book_id"])]
    pub config: Option<PathBuf>,

    /// Book root directory.
    #[arg(long, required_unless_present = "config")]
    pub root: Option<PathBuf>,

    /// Book title.
    #[arg(long, required_unless_present = "config")]
    pub name: Option<String>,

    /// Remote namespace under `books/`.
    #[arg(long, required_unless_present = "config")]
    pub remote_path: Option<String>,

    /// Paths under the root to skip (comma-separated or repeated).
    #[arg(long, value_delimiter = ',')]
    pub ignore: Vec<String>,

    #[arg(long, value_enum)]
    pub strategy: Option<BookStrategy>,

    /// Sync an existing book by id instead of looking it up by root.
    #[arg(long)]
    pub book_id: Option<u64>,
}
