use std::fs::{self, File};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use rasff_harvest::corpus::{CorpusMerger, CorpusSource, build_corpus};
use rasff_harvest::error::RasffError;
use rasff_harvest::store::Store;

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    (temp, Store::new(root))
}

fn write_shard(store: &Store, index: usize, body: &str) {
    Store::write_bytes_atomic(&store.shard_path(index), body.as_bytes()).unwrap();
}

#[test]
fn merges_shards_in_file_name_order() {
    let (_temp, store) = temp_store();
    write_shard(&store, 2, "<?xml version=\"1.0\"?>\n<entry>two</entry>");
    write_shard(&store, 1, "<?xml version=\"1.0\"?>\n<entry>one</entry>");

    let corpus = build_corpus(&store, false).unwrap();
    assert_eq!(corpus.source(), CorpusSource::Built { shards: 2 });
    let content = corpus.content();
    assert!(!content.contains("<?xml"));
    assert!(content.find("one").unwrap() < content.find("two").unwrap());
    assert_eq!(
        fs::read_to_string(store.corpus_path().as_std_path()).unwrap(),
        content
    );
}

#[test]
fn existing_corpus_is_served_unchanged() {
    let (_temp, store) = temp_store();
    write_shard(&store, 1, "<entry>fresh</entry>");
    Store::write_bytes_atomic(&store.corpus_path(), b"<Data><entry>old</entry></Data>").unwrap();
    let past = SystemTime::now() - Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(store.shard_path(1).as_std_path())
        .unwrap()
        .set_modified(past)
        .unwrap();

    let corpus = build_corpus(&store, false).unwrap();
    assert_eq!(corpus.source(), CorpusSource::Cached);
    assert_eq!(corpus.content(), "<Data><entry>old</entry></Data>");
    assert!(corpus.staleness().is_none());
}

#[test]
fn newer_shard_marks_cached_corpus_stale() {
    let (_temp, store) = temp_store();
    Store::write_bytes_atomic(&store.corpus_path(), b"<Data></Data>").unwrap();
    write_shard(&store, 1, "<entry>new</entry>");
    let future = SystemTime::now() + Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(store.shard_path(1).as_std_path())
        .unwrap()
        .set_modified(future)
        .unwrap();

    let corpus = build_corpus(&store, false).unwrap();
    assert_eq!(corpus.source(), CorpusSource::Cached);
    let stale = corpus.staleness().unwrap();
    assert_eq!(stale.newer_shards, vec![store.shard_path(1)]);
}

#[test]
fn force_rebuild_ignores_existing_corpus() {
    let (_temp, store) = temp_store();
    Store::write_bytes_atomic(&store.corpus_path(), b"<Data></Data>").unwrap();
    write_shard(&store, 1, "<entry>new</entry>");

    let corpus = build_corpus(&store, true).unwrap();
    assert_eq!(corpus.source(), CorpusSource::Built { shards: 1 });
    assert!(corpus.content().contains("<entry>new</entry>"));
}

#[test]
fn no_shards_and_no_corpus() {
    let (_temp, store) = temp_store();
    let err = build_corpus(&store, false).unwrap_err();
    assert_matches!(err, RasffError::NoShards(_));
}

#[test]
fn second_build_reuses_corpus_without_io() {
    let (temp, store) = temp_store();
    write_shard(&store, 1, "<entry>one</entry>");
    let merger = CorpusMerger::new(store.clone());

    let first = merger.build().unwrap();
    fs::remove_dir_all(temp.path().join("data")).unwrap();
    let second = merger.build().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn rebuild_replaces_memoized_corpus() {
    let (_temp, store) = temp_store();
    write_shard(&store, 1, "<entry>one</entry>");
    let merger = CorpusMerger::new(store.clone());

    let first = merger.build().unwrap();
    write_shard(&store, 2, "<entry>two</entry>");
    let rebuilt = merger.rebuild().unwrap();
    let third = merger.build().unwrap();

    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert!(Arc::ptr_eq(&rebuilt, &third));
    assert!(rebuilt.content().contains("two"));
}
