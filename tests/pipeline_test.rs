use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tempfile::TempDir;

use epubvault::config::SyncConfig;
use epubvault::fixtures::{EpubFixture, TocStyle};
use epubvault::ledger::LedgerStore;
use epubvault::library::Library;
use epubvault::observability::Metrics;
use epubvault::pipeline::{BatchItem, Orchestrator, PipelineError, ProcessingState};
use epubvault::render::chapter_file_name;
use epubvault::storage::StorageClient;
use epubvault::sync::{ManualConnectivity, SyncEngine};

fn build_orchestrator(dir: &TempDir) -> Arc<Orchestrator> {
    let ledger = LedgerStore::open(dir.path().join("ledger")).expect("Failed to open ledger");
    let metrics = Arc::new(Metrics::new());
    let sync = Arc::new(SyncEngine::new(
        ledger.clone(),
        StorageClient::in_memory(),
        Arc::new(ManualConnectivity::new(false)),
        metrics.clone(),
        SyncConfig::default(),
    ));
    Arc::new(Orchestrator::new(Library::new(ledger, sync), metrics))
}

#[tokio::test]
async fn test_two_chapter_book_end_to_end() {
    let dir = TempDir::new().unwrap();
    let orchestrator = build_orchestrator(&dir);

    let archive = EpubFixture::new("Test Book")
        .author("Test Author")
        .chapter("Opening", "<p>First words.</p>")
        .chapter("Closing", "<p>Last words.</p>")
        .toc_style(TocStyle::Ncx)
        .build();

    let book = orchestrator
        .process("test-book", Bytes::from(archive))
        .await
        .unwrap();
    assert_eq!(book.metadata.title, "Test Book");
    assert_eq!(book.chapters.len(), 2);
    assert_eq!(book.toc.len(), 2);

    let stored = orchestrator.library().get("test-book").await.unwrap();
    assert_eq!(stored.record.metadata.title, "Test Book");
    assert_eq!(stored.record.metadata.creators[0].name, "Test Author");
    assert!(stored.index.contains("Table of Contents"));
    for chapter_id in &stored.record.chapter_ids {
        assert!(
            stored.index.contains(&chapter_file_name(chapter_id)),
            "index links {chapter_id}"
        );
    }

    let html = orchestrator
        .library()
        .get_chapter("test-book", &stored.record.chapter_ids[1])
        .await
        .unwrap();
    assert!(html.contains("Last words."));

    let catalog = orchestrator.library().catalog().unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].author, "Test Author");
}

#[tokio::test]
async fn test_concurrent_processing_rejected() {
    let dir = TempDir::new().unwrap();
    let orchestrator = build_orchestrator(&dir);
    let archive = Bytes::from(EpubFixture::sample().build());

    let handle = orchestrator.submit("shared", archive.clone()).unwrap();
    let err = orchestrator
        .process("shared", archive.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Concurrency(ref id) if id == "shared"));

    handle.await.unwrap();
    assert_eq!(orchestrator.status("shared").state, ProcessingState::Processed);

    // Released once the first run finishes.
    orchestrator.process("shared", archive).await.unwrap();
    assert_eq!(orchestrator.stats().completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_respects_limit() {
    let dir = TempDir::new().unwrap();
    let orchestrator = build_orchestrator(&dir);
    let fixture = (1..=40).fold(EpubFixture::new("Long Book"), |fixture, n| {
        fixture.chapter(format!("Part {n}"), format!("<p>Body {n}</p>").repeat(50))
    });
    let archive = Bytes::from(fixture.build());

    let done = Arc::new(AtomicBool::new(false));
    let watcher = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let done = Arc::clone(&done);
        async move {
            let mut observed = 0;
            while !done.load(Ordering::SeqCst) {
                observed = observed.max(orchestrator.stats().in_flight);
                tokio::task::yield_now().await;
            }
            observed
        }
    });

    let items = (0..12)
        .map(|i| BatchItem::new(format!("book-{i}"), archive.clone()))
        .collect();
    let report = orchestrator.process_batch(items, 3).await;
    done.store(true, Ordering::SeqCst);
    let observed = watcher.await.unwrap();

    assert_eq!(report.succeeded.len(), 12);
    assert!(report.failed.is_empty());
    assert!(observed <= 3, "saw {observed} books processing at once");
    assert!((1..=3).contains(&report.peak_concurrency));
    assert_eq!(orchestrator.stats().in_flight, 0);
    assert_eq!(orchestrator.library().stats().unwrap().book_count, 12);
}

#[tokio::test]
async fn test_untitled_chapters_get_positional_titles() {
    let dir = TempDir::new().unwrap();
    let orchestrator = build_orchestrator(&dir);

    let untitled = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head></head><body><p>No heading here.</p></body></html>"#;
    let archive = EpubFixture::new("Untitled")
        .raw_chapter(untitled)
        .raw_chapter(untitled)
        .toc_style(TocStyle::None)
        .build();

    let book = orchestrator
        .process("untitled", Bytes::from(archive))
        .await
        .unwrap();

    let titles: Vec<_> = book.chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Chapter 1", "Chapter 2"]);
    assert_eq!(book.toc.len(), 2);
}
