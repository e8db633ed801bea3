//! Turns the merged corpus into alert, hazard and origin rows.
//!
//! The corpus is read with `quick-xml` as a stream of events. Each direct child of the
//! synthetic root is collected into a small element tree, converted, and dropped before
//! the next one is read.

use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;

use crate::config::{MalformedPolicy, ParseOptions};
use crate::domain::{Alert, Hazard, Origin, ReferenceId, sanitize_country};
use crate::error::RasffError;

/// Substring of the notification type that marks an alert notification.
pub const ALERT_MARKER: &str = "-  alert  -";
pub const DATE_FORMAT: &str = "%d/%m/%Y";
const ORIGINAL_SOURCE_FLAG: &str = "1";
const UNKNOWN_REFERENCE: &str = "<unknown>";

#[derive(Debug, Default, Clone, Serialize)]
pub struct ParseReport {
    pub entries: usize,
    pub informational: usize,
    pub after_boundary: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ParsedCorpus {
    pub alerts: Vec<Alert>,
    pub hazards: Vec<Hazard>,
    pub origins: Vec<Origin>,
    pub report: ParseReport,
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|child| child.text.trim())
            .filter(|text| !text.is_empty())
    }

    fn children_of(&self, name: &str) -> impl Iterator<Item = &Element> {
        self.child(name)
            .into_iter()
            .flat_map(|child| child.children.iter())
    }
}

enum Admission {
    Admitted(Box<EntryRows>),
    Informational,
    AfterBoundary,
}

struct EntryRows {
    alert: Alert,
    hazards: Vec<Hazard>,
    origins: Vec<Origin>,
}

pub fn parse_corpus(xml: &str, options: &ParseOptions) -> Result<ParsedCorpus, RasffError> {
    let mut parsed = ParsedCorpus::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // stack[0] is the synthetic root; its children are handled one at a time.
    let mut stack: Vec<Element> = Vec::new();
    loop {
        let event = reader.read_event().map_err(|err| {
            RasffError::Xml(format!("at byte {}: {err}", reader.error_position()))
        })?;
        match event {
            Event::Start(start) => stack.push(Element::from_start(&start)),
            Event::Empty(start) => {
                let element = Element::from_start(&start);
                close_element(element, &mut stack, options, &mut parsed)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| RasffError::Xml("unbalanced closing tag".to_string()))?;
                if stack.is_empty() {
                    break;
                }
                close_element(element, &mut stack, options, &mut parsed)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    match text.unescape() {
                        Ok(value) => top.text.push_str(&value),
                        Err(_) => top.text.push_str(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(RasffError::Xml("unexpected end of corpus".to_string()));
    }

    tracing::info!(
        entries = parsed.report.entries,
        alerts = parsed.alerts.len(),
        hazards = parsed.hazards.len(),
        origins = parsed.origins.len(),
        skipped = parsed.report.skipped.len(),
        "corpus parsed"
    );
    Ok(parsed)
}

fn close_element(
    element: Element,
    stack: &mut Vec<Element>,
    options: &ParseOptions,
    parsed: &mut ParsedCorpus,
) -> Result<(), RasffError> {
    match stack.len() {
        0 => Ok(()),
        1 => {
            parsed.report.entries += 1;
            match read_entry(&element, options) {
                Ok(Admission::Admitted(rows)) => {
                    let EntryRows {
                        alert,
                        hazards,
                        origins,
                    } = *rows;
                    parsed.alerts.push(alert);
                    parsed.hazards.extend(hazards);
                    parsed.origins.extend(origins);
                    Ok(())
                }
                Ok(Admission::Informational) => {
                    parsed.report.informational += 1;
                    Ok(())
                }
                Ok(Admission::AfterBoundary) => {
                    parsed.report.after_boundary += 1;
                    Ok(())
                }
                Err(err @ RasffError::MalformedRecord { .. })
                    if options.malformed == MalformedPolicy::Skip =>
                {
                    tracing::warn!(error = %err, "skipping malformed notification");
                    parsed.report.skipped.push(err.to_string());
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        _ => {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(element);
            }
            Ok(())
        }
    }
}

fn read_entry(entry: &Element, options: &ParseOptions) -> Result<Admission, RasffError> {
    let notification = entry
        .child("Notification")
        .ok_or_else(|| malformed(UNKNOWN_REFERENCE, "Notification", ""))?;
    let details = notification
        .child("Details")
        .ok_or_else(|| malformed(UNKNOWN_REFERENCE, "Details", ""))?;
    let label = details.child_text("Reference").unwrap_or(UNKNOWN_REFERENCE);

    let kind = required(details, "NotificationType", label)?;
    if !kind.contains(ALERT_MARKER) {
        return Ok(Admission::Informational);
    }

    let date_text = required(details, "DateOfCase", label)?;
    let date = parse_date(date_text).ok_or_else(|| malformed(label, "DateOfCase", date_text))?;
    if !options.end.admits(date) {
        return Ok(Admission::AfterBoundary);
    }

    let reference_text = required(details, "Reference", label)?;
    let reference: ReferenceId = reference_text
        .parse()
        .map_err(|_| malformed(label, "Reference", reference_text))?;
    let country = sanitize_country(required(details, "NotificationFrom", label)?);

    let alert = Alert {
        reference: reference.clone(),
        country,
        date,
        subject: optional(details, "Subject"),
        risk: optional(details, "RiskDecision"),
        action: optional(details, "ActionTaken"),
        distribution_status: optional(details, "DistributionStatus"),
        product_category: optional(details, "ProductCategory"),
        product: optional(details, "Product"),
    };

    let mut origins = Vec::new();
    for row in notification.children_of("Flagged") {
        if row.child_text("Orig") != Some(ORIGINAL_SOURCE_FLAG) {
            continue;
        }
        let country = required(row, "Country", label)?;
        origins.push(Origin {
            reference: reference.clone(),
            country: sanitize_country(country),
        });
    }

    let hazards = notification
        .children_of("Hazards")
        .map(|row| Hazard {
            reference: reference.clone(),
            substance: optional(row, "Substance"),
            category: optional(row, "Category"),
        })
        .collect();

    Ok(Admission::Admitted(Box::new(EntryRows {
        alert,
        hazards,
        origins,
    })))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

fn required<'a>(
    element: &'a Element,
    field: &'static str,
    reference: &str,
) -> Result<&'a str, RasffError> {
    element
        .child_text(field)
        .ok_or_else(|| malformed(reference, field, ""))
}

fn optional(element: &Element, field: &str) -> String {
    element.child_text(field).unwrap_or_default().to_string()
}

fn malformed(reference: &str, field: &'static str, value: &str) -> RasffError {
    RasffError::MalformedRecord {
        reference: reference.to_string(),
        field,
        value: value.to_string(),
    }
}
