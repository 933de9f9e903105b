use std::sync::mpsc;
use std::thread;

use document_core::{
    AnchorMovementType, DocumentError, StringComparison, TextDocument, TextSource,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_background_snapshot_and_offset_translation() {
    init_tracing();
    let mut doc = TextDocument::new("let value = compute();");
    let provider = doc.snapshot_provider();

    // A background task finds an offset in the snapshot it took.
    let worker = thread::spawn(move || {
        let snapshot = provider.create_snapshot();
        let offset = snapshot
            .index_of_str("compute", 0, snapshot.text_length(), StringComparison::Ordinal)
            .unwrap()
            .unwrap();
        (snapshot, offset)
    });
    let (snapshot, offset) = worker.join().unwrap();
    assert_eq!(offset, 12);

    // Meanwhile the owner edited the document.
    doc.insert(0, "    ").unwrap();
    doc.replace(8, 5, "result").unwrap();
    assert_eq!(&*doc.text().unwrap(), "    let result = compute();");

    let current = doc.version().unwrap();
    let moved = snapshot
        .version()
        .unwrap()
        .move_offset_to(&current, offset, AnchorMovementType::Default)
        .unwrap();
    assert_eq!(moved, 17);
    assert_eq!(doc.get_text(moved, 7).unwrap(), "compute");
}

#[test]
fn test_provider_sees_completed_changes_only() {
    init_tracing();
    let mut doc = TextDocument::new("a");
    let provider = doc.snapshot_provider();
    let (tx, rx) = mpsc::channel();
    doc.subscribe_changing(move |_, _| {
        tx.send(provider.create_snapshot().text().unwrap().to_string())
            .unwrap();
    });
    doc.insert(1, "b").unwrap();
    doc.insert(2, "c").unwrap();
    let seen: Vec<String> = rx.try_iter().collect();
    assert_eq!(seen, vec!["a", "ab"]);
}

#[test]
fn test_foreign_thread_is_rejected() {
    init_tracing();
    let doc = TextDocument::new("owned");
    let owner = doc.owner_thread();
    let provider = doc.snapshot_provider();

    let result = thread::spawn(move || {
        let mut doc = doc;
        let edit = doc.insert(0, "x");
        let text = doc.text().map(|t| t.to_string());
        let transfer = doc.set_owner_thread(None);
        (edit, text, transfer, doc)
    })
    .join()
    .unwrap();

    assert_eq!(result.0, Err(DocumentError::WrongThread));
    assert_eq!(result.1, Err(DocumentError::WrongThread));
    assert_eq!(result.2, Err(DocumentError::WrongThread));
    assert_eq!(provider.owner_thread(), owner);
    assert_eq!(&*result.3.text().unwrap(), "owned");
}

#[test]
fn test_ownership_transfer() {
    init_tracing();
    let mut doc = TextDocument::new("shared");
    let provider = doc.snapshot_provider();
    doc.set_owner_thread(None).unwrap();
    assert!(provider.owner_thread().is_none());

    let doc = thread::spawn(move || {
        let mut doc = doc;
        doc.set_owner_thread(Some(thread::current().id())).unwrap();
        doc.insert(6, " text").unwrap();
        doc.set_owner_thread(None).unwrap();
        doc
    })
    .join()
    .unwrap();

    let mut doc = doc;
    doc.set_owner_thread(Some(thread::current().id())).unwrap();
    assert_eq!(provider.owner_thread(), Some(thread::current().id()));
    assert_eq!(&*doc.text().unwrap(), "shared text");
    assert_eq!(&*provider.create_snapshot().text().unwrap(), "shared text");
}
