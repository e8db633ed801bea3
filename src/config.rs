use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::EndBoundary;
use crate::error::RasffError;

pub const DEFAULT_CONFIG_FILE: &str = "rasff.json";
pub const DEFAULT_PORTAL_URL: &str = "https://webgate.ec.europa.eu/rasff-window/portal/";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_FIRST_ROW: usize = 1;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_END_YEAR: i32 = 2020;
pub const DEFAULT_END_MONTH: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub portal: PortalSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub dataset: DatasetSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PortalSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub first_row: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FetchSection {
    #[serde(default)]
    pub workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatasetSection {
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub end_month: Option<u32>,
    #[serde(default)]
    pub malformed: Option<MalformedPolicy>,
}

/// What the parser does with a notification whose required fields cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub base_url: String,
    pub page_size: usize,
    pub first_row: usize,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PORTAL_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            first_row: DEFAULT_FIRST_ROW,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub end: EndBoundary,
    pub malformed: MalformedPolicy,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub portal: PortalSettings,
    pub workers: usize,
    pub parse: ParseOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `rasff.json` in the working directory when no path is given.
    /// Only an explicitly requested file has to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, RasffError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RasffError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RasffError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RasffError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let defaults = PortalSettings::default();

        let page_size = config.portal.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(RasffError::InvalidConfig(
                "portal.page_size must be positive".to_string(),
            ));
        }
        let workers = config.fetch.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(RasffError::InvalidWorkerCount);
        }

        let portal = PortalSettings {
            base_url: config.portal.base_url.unwrap_or(defaults.base_url),
            page_size,
            first_row: config.portal.first_row.unwrap_or(defaults.first_row),
            timeout: config
                .portal
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: config.portal.max_retries.unwrap_or(defaults.max_retries),
            retry_base_delay: config
                .portal
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
        };

        let end = EndBoundary::new(
            config.dataset.end_year.unwrap_or(DEFAULT_END_YEAR),
            config.dataset.end_month.unwrap_or(DEFAULT_END_MONTH),
        )?;

        Ok(ResolvedConfig {
            schema_version,
            data_dir: Utf8PathBuf::from(config.data_dir.as_deref().unwrap_or(DEFAULT_DATA_DIR)),
            portal,
            workers,
            parse: ParseOptions {
                end,
                malformed: config.dataset.malformed.unwrap_or_default(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.workers, DEFAULT_WORKERS);
        assert_eq!(resolved.portal.page_size, 100);
        assert_eq!(resolved.portal.first_row, 1);
        assert_eq!(resolved.data_dir, Utf8PathBuf::from("data"));
        assert_eq!(resolved.parse.malformed, MalformedPolicy::Abort);
        assert_eq!(
            resolved.parse.end.first_excluded(),
            chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
    }
}
