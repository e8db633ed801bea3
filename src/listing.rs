use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::ReferenceId;
use crate::error::RasffError;
use crate::portal::PortalClient;
use crate::progress::{ProgressEvent, ProgressSink};

/// 1-based column of the listing table holding the notification reference.
const REFERENCE_COLUMN: usize = 4;

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b[^>]*>").expect("valid tag pattern")
});

/// Lazily requests listing pages. Stops after a short page or the first failed request.
pub struct ListingPages<'a, C: PortalClient + ?Sized> {
    client: &'a C,
    page_size: usize,
    offset: usize,
    done: bool,
}

impl<'a, C: PortalClient + ?Sized> ListingPages<'a, C> {
    pub fn new(client: &'a C, first_row: usize, page_size: usize) -> Self {
        Self {
            client,
            page_size,
            offset: first_row,
            done: false,
        }
    }

    /// Row offset of the next request.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<C: PortalClient + ?Sized> Iterator for ListingPages<'_, C> {
    type Item = Result<Vec<ReferenceId>, RasffError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.client.fetch_listing(self.offset) {
            Ok(html) => {
                let page = parse_reference_table(&html);
                self.offset += page.len();
                if page.len() < self.page_size {
                    self.done = true;
                }
                Some(Ok(page))
            }
            Err(err) => {
                self.done = true;
                Some(Err(RasffError::Pagination {
                    offset: self.offset,
                    reason: err.to_string(),
                }))
            }
        }
    }
}

#[derive(Debug)]
pub struct ListingOutcome {
    /// `known` followed by every newly discovered reference, without duplicates.
    pub references: Vec<ReferenceId>,
    pub discovered: usize,
    pub pages: usize,
    pub error: Option<RasffError>,
}

pub fn list_references<C: PortalClient + ?Sized>(
    client: &C,
    known: &[ReferenceId],
    first_row: usize,
    page_size: usize,
    sink: &dyn ProgressSink,
) -> ListingOutcome {
    let mut seen: HashSet<ReferenceId> = HashSet::with_capacity(known.len());
    let mut references = Vec::with_capacity(known.len());
    for reference in known {
        if seen.insert(reference.clone()) {
            references.push(reference.clone());
        }
    }
    let known_count = references.len();

    let mut pages = ListingPages::new(client, first_row, page_size);
    let mut page_count = 0usize;
    let mut error = None;
    while let Some(page) = pages.next() {
        match page {
            Ok(page) => {
                page_count += 1;
                let found = page.len();
                for reference in page {
                    if seen.insert(reference.clone()) {
                        references.push(reference);
                    }
                }
                sink.event(ProgressEvent::message(format!(
                    "listing offset={} found={found} done={}",
                    pages.offset(),
                    pages.is_done()
                )));
            }
            Err(err) => {
                tracing::warn!(error = %err, "listing stopped early");
                error = Some(err);
            }
        }
    }

    ListingOutcome {
        discovered: references.len() - known_count,
        references,
        pages: page_count,
        error,
    }
}

/// Extracts the reference column from every body row of the listing table.
pub fn parse_reference_table(html: &str) -> Vec<ReferenceId> {
    let mut references = Vec::new();
    let mut in_body = false;
    let mut in_cell = false;
    let mut cell = 0usize;
    let mut text = String::new();
    let mut cursor = 0usize;

    for caps in TAG.captures_iter(html) {
        let Some(tag) = caps.get(0) else { continue };
        if in_cell && cell == REFERENCE_COLUMN {
            text.push_str(&html[cursor..tag.start()]);
        }
        cursor = tag.end();

        let closing = &caps[1] == "/";
        let name = caps[2].to_ascii_lowercase();
        match (closing, name.as_str()) {
            (false, "tbody") => in_body = true,
            (true, "tbody") => {
                finish_cell(&mut text, &mut in_cell, cell, &mut references);
                in_body = false;
            }
            (false, "tr") if in_body => {
                finish_cell(&mut text, &mut in_cell, cell, &mut references);
                cell = 0;
            }
            (false, "td") if in_body => {
                finish_cell(&mut text, &mut in_cell, cell, &mut references);
                cell += 1;
                in_cell = true;
            }
            (true, "td" | "tr") if in_body => {
                finish_cell(&mut text, &mut in_cell, cell, &mut references);
            }
            _ => {}
        }
    }
    references
}

fn finish_cell(text: &mut String, in_cell: &mut bool, cell: usize, out: &mut Vec<ReferenceId>) {
    if *in_cell && cell == REFERENCE_COLUMN {
        let value = decode_entities(text.trim());
        if !value.is_empty() {
            match value.parse::<ReferenceId>() {
                Ok(reference) => out.push(reference),
                Err(_) => tracing::debug!(value, "skipping unreadable reference cell"),
            }
        }
    }
    text.clear();
    *in_cell = false;
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fourth_cell_of_body_rows_only() {
        let html = r##"
            <table>
              <thead><tr><th>a</th><th>b</th><th>c</th><th>Reference</th></tr></thead>
              <tbody>
                <tr><td>1</td><td>x</td><td>y</td><td> 2019.0001 </td><td>z</td></tr>
                <tr class="odd"><td>2</td><td>x</td><td>y</td><td><a href="#">2019.0002</a></td></tr>
                <tr><td>3</td><td>only three</td><td>cells</td></tr>
              </tbody>
            </table>
            <td>outside</td><td>b</td><td>c</td><td>9999.9999</td>"##;
        let refs = parse_reference_table(html);
        let refs: Vec<&str> = refs.iter().map(ReferenceId::as_str).collect();
        assert_eq!(refs, vec!["2019.0001", "2019.0002"]);
    }

    #[test]
    fn empty_reference_cell_is_skipped() {
        let html = "<tbody><tr><td>1</td><td></td><td></td><td>&nbsp;</td></tr></tbody>";
        assert!(parse_reference_table(html).is_empty());
    }
}
