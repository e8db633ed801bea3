use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CorpusResult, FetchResult, RefreshResult};
use crate::domain::{Alert, Origin};
use crate::parser::ParseReport;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::query::{CategoryCatalog, Pies};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Serialize)]
pub struct AlertsOutput<'a> {
    pub count: usize,
    pub alerts: &'a [&'a Alert],
    pub parse: &'a ParseReport,
}

#[derive(Debug, Serialize)]
pub struct OriginsOutput<'a> {
    pub count: usize,
    pub by_country: BTreeMap<String, usize>,
    pub origins: &'a [&'a Origin],
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_refresh(result: &RefreshResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_corpus(result: &CorpusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_alerts(result: &AlertsOutput<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_counts(counts: &BTreeMap<String, usize>) -> io::Result<()> {
        Self::print_json(counts)
    }

    pub fn print_origins(result: &OriginsOutput<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_catalog(catalog: &CategoryCatalog) -> io::Result<()> {
        Self::print_json(catalog)
    }

    pub fn print_pies(pies: &Pies) -> io::Result<()> {
        Self::print_json(pies)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
