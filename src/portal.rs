use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::PortalSettings;
use crate::domain::ReferenceId;
use crate::error::RasffError;

/// Transport for the two portal endpoints. Implementations are shared by all fetch workers.
pub trait PortalClient: Send + Sync {
    /// HTML listing page starting at row `offset`.
    fn fetch_listing(&self, offset: usize) -> Result<String, RasffError>;
    /// Raw XML document of one notification.
    fn fetch_notification(&self, reference: &ReferenceId) -> Result<String, RasffError>;
}

#[derive(Clone)]
pub struct PortalHttpClient {
    client: Client,
    base_url: String,
    max_retries: usize,
    retry_base_delay: Duration,
}

impl PortalHttpClient {
    pub fn new(settings: &PortalSettings) -> Result<Self, RasffError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("rasff-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RasffError::PortalHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| RasffError::PortalHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            max_retries: settings.max_retries,
            retry_base_delay: settings.retry_base_delay,
        })
    }

    fn read_text(response: Response) -> Result<String, RasffError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .map(|body| truncate(&body, 200))
                .unwrap_or_else(|_| "portal request failed".to_string());
            return Err(RasffError::PortalStatus { status, message });
        }
        response
            .text()
            .map_err(|err| RasffError::PortalHttp(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, RasffError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        self.back_off(attempt, &format!("status {status}"));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        self.back_off(attempt, &err.to_string());
                        attempt += 1;
                        continue;
                    }
                    return Err(RasffError::PortalHttp(err.to_string()));
                }
            }
        }
    }

    fn back_off(&self, attempt: usize, reason: &str) {
        let delay = self.retry_base_delay * (attempt as u32 + 1);
        tracing::debug!(attempt, ?delay, reason, "retrying portal request");
        thread::sleep(delay);
    }
}

impl PortalClient for PortalHttpClient {
    fn fetch_listing(&self, offset: usize) -> Result<String, RasffError> {
        let start_row = offset.to_string();
        let response = self.send_with_retries(|| {
            self.client.get(&self.base_url).query(&[
                ("event", "notificationsList"),
                ("StartRow", start_row.as_str()),
            ])
        })?;
        Self::read_text(response)
    }

    fn fetch_notification(&self, reference: &ReferenceId) -> Result<String, RasffError> {
        let response = self.send_with_retries(|| {
            self.client.get(&self.base_url).query(&[
                ("event", "DetailsToXML"),
                ("NOTIF_REFERENCE", reference.as_str()),
            ])
        })?;
        Self::read_text(response)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
