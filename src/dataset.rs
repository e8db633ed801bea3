use crate::config::ParseOptions;
use crate::corpus::Corpus;
use crate::domain::{Alert, Hazard, Origin};
use crate::error::RasffError;
use crate::parser::{ParseReport, ParsedCorpus, parse_corpus};
use crate::query::QueryEngine;

/// Parsed, read-only tables derived from one corpus.
#[derive(Debug)]
pub struct Dataset {
    alerts: Vec<Alert>,
    hazards: Vec<Hazard>,
    origins: Vec<Origin>,
    report: ParseReport,
}

impl Dataset {
    pub fn from_corpus(corpus: &Corpus, options: &ParseOptions) -> Result<Self, RasffError> {
        let parsed = parse_corpus(corpus.content(), options)?;
        Ok(Self::from(parsed))
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    pub fn report(&self) -> &ParseReport {
        &self.report
    }

    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(self)
    }
}

impl From<ParsedCorpus> for Dataset {
    fn from(parsed: ParsedCorpus) -> Self {
        Self {
            alerts: parsed.alerts,
            hazards: parsed.hazards,
            origins: parsed.origins,
            report: parsed.report,
        }
    }
}
