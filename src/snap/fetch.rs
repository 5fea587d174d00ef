use crate::error::FetchError;
use crate::snap::config::UpstreamConfig;
use crate::snap::key::Slot;
use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;

pub trait ContentFetcher {
    fn fetch(&self, slot: Slot) -> Result<Value, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    upstream: UpstreamConfig,
}

impl HttpFetcher {
    pub fn new(upstream: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(upstream.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            upstream: upstream.clone(),
        })
    }
}

impl ContentFetcher for HttpFetcher {
    fn fetch(&self, slot: Slot) -> Result<Value, FetchError> {
        let label = slot.label();
        let url = self.upstream.url_for(&label);
        let transport = |message: String| FetchError::Transport {
            slot: label.clone(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| transport(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            return Err(transport(format!(
                "{url}: upstream answered {}",
                response.status()
            )));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && !is_json_content_type(content_type)
        {
            return Err(FetchError::UnexpectedContentType {
                slot: label.clone(),
                content_type: content_type.to_string(),
            });
        }

        let body = response
            .text()
            .map_err(|err| transport(format!("{url}: failed to read body: {err}")))?;
        parse_body(&body).map_err(|message| FetchError::Parse {
            slot: label.clone(),
            message,
        })
    }
}

fn is_json_content_type(raw: &str) -> bool {
    let media = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media == "application/json" || media.ends_with("+json") || media == "text/json"
}

/// Upstream sometimes drops the outer array delimiters. Wraps the body once; never loops.
fn repair_missing_brackets(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.ends_with(']') {
        format!("[{trimmed}")
    } else {
        format!("[{trimmed}]")
    }
}

/// Direct parse, then exactly one repaired reparse. The error names the direct failure.
pub fn parse_body(body: &str) -> Result<Value, String> {
    let direct_err = match serde_json::from_str::<Value>(body) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    serde_json::from_str::<Value>(&repair_missing_brackets(body))
        .map_err(|repair_err| format!("{direct_err} (repair attempt: {repair_err})"))
}
