//! epubvault: converts EPUB archives into stand-alone HTML chapters, keeps
//! them in a local Fjall library and replicates them to object storage.

pub mod api;
pub mod config;
pub mod epub;
pub mod fixtures;
pub mod humanize;
pub mod ledger;
pub mod library;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod render;
pub mod storage;
pub mod sync;
