use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "epubvault")]
#[command(about = "EPUB to HTML converter with a local library and cloud sync", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $EPUBVAULT_CONFIG or config/epubvault.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Process one EPUB file into the local library
    Process(ProcessArgs),
    /// Upload unsynced books to remote storage and wait for the result
    Sync(SyncArgs),
    /// Process a generated sample book and print its index
    Demo,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct ProcessArgs {
    /// Path to the .epub archive
    pub file: PathBuf,

    /// Book id to store it under; a UUIDv7 is generated when omitted
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// Sync only this book
    #[arg(long)]
    pub book_id: Option<String>,
}
