mod cli;

use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Commands};
use tracing::info;

use epubvault::api::{self, AppState};
use epubvault::config::Config;
use epubvault::fixtures::EpubFixture;
use epubvault::observability::init_tracing;
use epubvault::pipeline;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };
    init_tracing(&config.telemetry.log_filter);

    match cli.command {
        Commands::Serve(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            let state = AppState::from_config(config)?;
            api::run(address, state).await?;
        }
        Commands::Process(args) => {
            let book_id = args.id.unwrap_or_else(pipeline::new_book_id);
            let archive = tokio::fs::read(&args.file).await?;
            let state = AppState::from_config(config)?;

            let book = state
                .orchestrator
                .process(&book_id, Bytes::from(archive))
                .await?;
            info!(
                book_id = %book.id,
                title = %book.metadata.title,
                chapters = book.chapters.len(),
                "Book processed"
            );
            state.library.ledger().persist()?;
            println!("{}", book.id);
        }
        Commands::Sync(args) => {
            let state = AppState::from_config(config)?;
            let report = state.sync.force_sync(args.book_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            state.library.ledger().persist()?;
        }
        Commands::Demo => {
            let state = AppState::from_config(config)?;
            let book_id = pipeline::new_book_id();
            let archive = EpubFixture::sample().try_build()?;

            state
                .orchestrator
                .process(&book_id, Bytes::from(archive))
                .await?;
            let stored = state.library.get(&book_id).await?;
            println!("{}", stored.index);
            state.library.ledger().persist()?;
        }
    }

    Ok(())
}
