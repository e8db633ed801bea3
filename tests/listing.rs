use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;

use rasff_harvest::domain::ReferenceId;
use rasff_harvest::error::RasffError;
use rasff_harvest::listing::{ListingPages, list_references};
use rasff_harvest::output::JsonOutput;
use rasff_harvest::portal::PortalClient;

/// Serves canned listing pages keyed by row offset; unknown offsets fail.
#[derive(Default)]
struct MockListing {
    pages: HashMap<usize, String>,
    requested: Mutex<Vec<usize>>,
}

impl MockListing {
    fn with_page(mut self, offset: usize, references: &[&str]) -> Self {
        self.pages.insert(offset, table(references));
        self
    }

    fn requested(&self) -> Vec<usize> {
        self.requested.lock().unwrap().clone()
    }
}

impl PortalClient for MockListing {
    fn fetch_listing(&self, offset: usize) -> Result<String, RasffError> {
        self.requested.lock().unwrap().push(offset);
        self.pages
            .get(&offset)
            .cloned()
            .ok_or(RasffError::PortalStatus {
                status: 500,
                message: "server error".to_string(),
            })
    }

    fn fetch_notification(&self, _reference: &ReferenceId) -> Result<String, RasffError> {
        Err(RasffError::PortalHttp("not implemented".to_string()))
    }
}

fn table(references: &[&str]) -> String {
    let rows: String = references
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            format!(
                "<tr><td>{index}</td><td>alert</td><td>01/05/2019</td><td>{reference}</td><td>x</td></tr>"
            )
        })
        .collect();
    format!("<table><thead><tr><th>#</th></tr></thead><tbody>{rows}</tbody></table>")
}

fn ids(values: &[&str]) -> Vec<ReferenceId> {
    values.iter().map(|value| value.parse().unwrap()).collect()
}

fn as_strs(references: &[ReferenceId]) -> Vec<&str> {
    references.iter().map(ReferenceId::as_str).collect()
}

#[test]
fn short_page_ends_pagination() {
    let client = MockListing::default()
        .with_page(1, &["A1", "A2"])
        .with_page(3, &["A3"]);
    let outcome = list_references(&client, &[], 1, 2, &JsonOutput);

    assert_eq!(as_strs(&outcome.references), vec!["A1", "A2", "A3"]);
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.discovered, 3);
    assert!(outcome.error.is_none());
    assert_eq!(client.requested(), vec![1, 3]);
}

#[test]
fn empty_page_ends_pagination() {
    let client = MockListing::default()
        .with_page(1, &["A1", "A2"])
        .with_page(3, &[]);
    let outcome = list_references(&client, &[], 1, 2, &JsonOutput);
    assert_eq!(outcome.references.len(), 2);
    assert!(outcome.error.is_none());
}

#[test]
fn failure_keeps_collected_references() {
    let client = MockListing::default().with_page(1, &["A1", "A2"]);
    let outcome = list_references(&client, &[], 1, 2, &JsonOutput);

    assert_eq!(as_strs(&outcome.references), vec!["A1", "A2"]);
    assert_matches!(outcome.error, Some(RasffError::Pagination { offset: 3, .. }));
}

#[test]
fn known_references_come_first_without_duplicates() {
    let client = MockListing::default().with_page(1, &["B", "C"]);
    let known = ids(&["A", "B", "A"]);
    let outcome = list_references(&client, &known, 1, 100, &JsonOutput);

    assert_eq!(as_strs(&outcome.references), vec!["A", "B", "C"]);
    assert_eq!(outcome.discovered, 1);
}

#[test]
fn pages_expose_offset_and_done() {
    let client = MockListing::default()
        .with_page(1, &["A1", "A2"])
        .with_page(3, &["A3"]);
    let mut pages = ListingPages::new(&client, 1, 2);
    assert_eq!(pages.offset(), 1);

    let first = pages.next().unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(pages.offset(), 3);
    assert!(!pages.is_done());

    pages.next().unwrap().unwrap();
    assert!(pages.is_done());
    assert!(pages.next().is_none());
}
