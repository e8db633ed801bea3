use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use rasff_harvest::domain::ReferenceId;
use rasff_harvest::error::RasffError;
use rasff_harvest::store::{ReferenceList, Store};

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    (temp, Store::new(root))
}

fn ids(values: &[&str]) -> Vec<ReferenceId> {
    values.iter().map(|value| value.parse().unwrap()).collect()
}

#[test]
fn missing_reference_list() {
    let (_temp, store) = temp_store();
    assert_eq!(store.load_references().unwrap(), ReferenceList::Missing);
}

#[test]
fn empty_reference_list() {
    let (_temp, store) = temp_store();
    store.ensure_root().unwrap();
    fs::write(store.references_path().as_std_path(), "\n\n").unwrap();
    assert_eq!(store.load_references().unwrap(), ReferenceList::Empty);
}

#[test]
fn corrupt_reference_list_reports_line() {
    let (_temp, store) = temp_store();
    store.ensure_root().unwrap();
    fs::write(
        store.references_path().as_std_path(),
        "2019.0001\n2019 0002\n",
    )
    .unwrap();
    let err = store.load_references().unwrap_err();
    assert_matches!(err, RasffError::CorruptReferenceList { line: 2, .. });
}

#[test]
fn save_references_appends_unseen_only() {
    let (_temp, store) = temp_store();
    assert_eq!(store.save_references(&ids(&["2019.0002", "2019.0001"])).unwrap(), 2);
    assert_eq!(
        store
            .save_references(&ids(&["2019.0001", "2019.0003", "2019.0003"]))
            .unwrap(),
        3
    );
    assert_eq!(
        store.load_references().unwrap(),
        ReferenceList::Loaded(ids(&["2019.0002", "2019.0001", "2019.0003"]))
    );
}

#[test]
fn failed_references_and_shard_bookkeeping() {
    let (_temp, store) = temp_store();
    Store::write_bytes_atomic(&store.shard_path(1), b"<a/>").unwrap();
    Store::write_bytes_atomic(&store.shard_path(3), b"<b/>").unwrap();
    Store::write_bytes_atomic(&store.error_path(1), b"2019.0004\n2019.0005").unwrap();
    Store::write_bytes_atomic(&store.error_path(3), b"2019.0006").unwrap();

    assert_eq!(store.last_shard_index().unwrap(), 3);
    assert_eq!(
        store.load_failed_references().unwrap(),
        ids(&["2019.0004", "2019.0005", "2019.0006"])
    );

    store.clear_error_files(3).unwrap();
    assert!(store.load_failed_references().unwrap().is_empty());
    assert_eq!(store.list_shards().unwrap().len(), 2);

    store.clear_shards().unwrap();
    assert!(store.list_shards().unwrap().is_empty());
    assert_eq!(store.last_shard_index().unwrap(), 0);
}

#[test]
fn clear_error_files_keeps_later_numbers() {
    let (_temp, store) = temp_store();
    Store::write_bytes_atomic(&store.error_path(2), b"2019.0001").unwrap();
    Store::write_bytes_atomic(&store.error_path(5), b"2019.0002").unwrap();

    store.clear_error_files(4).unwrap();

    assert!(!store.error_path(2).as_std_path().exists());
    assert_eq!(store.load_failed_references().unwrap(), ids(&["2019.0002"]));
}

#[test]
fn shards_listed_in_numeric_order() {
    let (_temp, store) = temp_store();
    for index in [10, 2, 1, 11] {
        Store::write_bytes_atomic(&store.shard_path(index), b"<a/>").unwrap();
    }
    Store::write_bytes_atomic(&store.error_path(10), b"2019.0010").unwrap();
    Store::write_bytes_atomic(&store.error_path(9), b"2019.0009").unwrap();

    let shards = store.list_shards().unwrap();
    let expected: Vec<Utf8PathBuf> = [1, 2, 10, 11].iter().map(|i| store.shard_path(*i)).collect();
    assert_eq!(shards, expected);
    assert_eq!(store.last_shard_index().unwrap(), 11);
    assert_eq!(
        store.load_failed_references().unwrap(),
        ids(&["2019.0009", "2019.0010"])
    );
}
