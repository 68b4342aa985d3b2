//! OpenAI-style asynchronous batch protocol.
//!
//! Flow: build a JSONL file of per-request inputs, upload it via `/v1/files`,
//! create a batch job via `/v1/batches`, poll `/v1/batches/{id}` with
//! progressive backoff, then download the output file and split it back into
//! per-request results.
//!
//! Resume: `BatchOptions::existing_batch_id` skips upload and creation and
//! goes straight to polling — callers persist the id they receive through
//! `on_batch_created` and pass it back after a crash or retry.
//!
//! Polling tolerates up to 3 consecutive 5xx responses and 4 consecutive
//! network errors before giving up; a healthy poll resets both counters.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error_handler::{
    AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, Result, make_snippet,
};

const POLL_BASE: Duration = Duration::from_secs(10);
const POLL_FACTOR: f64 = 1.5;
const POLL_CAP: Duration = Duration::from_secs(600);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_CONSECUTIVE_5XX: u32 = 3;
const MAX_CONSECUTIVE_NETWORK: u32 = 4;

/// One JSONL line of a batch input file.
#[derive(Debug, Serialize)]
pub struct BatchLine {
    pub custom_id: String,
    pub method: &'static str,
    pub url: &'static str,
    pub body: Value,
}

/// Per-request outcome of a completed batch.
///
/// Batch semantics differ from sync calls: a malformed or failed item is an
/// `Err` entry here, never a whole-batch failure.
#[derive(Debug)]
pub struct BatchItem {
    pub custom_id: String,
    pub result: std::result::Result<Value, String>,
}

/// Caller-side knobs for one batch run.
#[derive(Default)]
pub struct BatchOptions {
    /// Resume polling an already-created batch, skipping upload and create.
    pub existing_batch_id: Option<String>,
    /// Invoked with the batch id right after creation so the caller can
    /// persist it for resume.
    pub on_batch_created: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Overall deadline for polling (default 24h).
    pub deadline: Option<Duration>,
    /// First poll interval (default 10s); grows ×1.5 per poll up to 10min.
    pub poll_base: Option<Duration>,
}

/// Minimal client for the `/v1/files` + `/v1/batches` surface.
///
/// Expects a `reqwest::Client` preconfigured with auth headers (the owning
/// provider service builds it that way).
pub struct BatchClient {
    http: reqwest::Client,
    base: String,
}

impl BatchClient {
    pub fn new(http: reqwest::Client, base: String) -> Self {
        Self { http, base }
    }

    /// Runs one batch end to end and returns per-request results keyed by
    /// `custom_id`. `endpoint` is the per-line target, e.g.
    /// `/v1/chat/completions` or `/v1/embeddings`.
    pub async fn run(
        &self,
        endpoint: &'static str,
        lines: Vec<BatchLine>,
        opts: BatchOptions,
    ) -> Result<Vec<BatchItem>> {
        let batch_id = match &opts.existing_batch_id {
            Some(id) => {
                info!(batch_id = %id, "resuming existing batch at polling stage");
                id.clone()
            }
            None => {
                let file_id = self.upload_input(&lines).await?;
                let id = self.create_batch(&file_id, endpoint).await?;
                if let Some(cb) = &opts.on_batch_created {
                    cb(&id);
                }
                id
            }
        };

        let deadline = opts.deadline.unwrap_or(DEFAULT_DEADLINE);
        let poll_base = opts.poll_base.unwrap_or(POLL_BASE);
        let output_file_id = self.poll_until_done(&batch_id, deadline, poll_base).await?;
        let raw = self.download_file(&output_file_id).await?;
        Ok(parse_output_jsonl(&raw))
    }

    /// Serialises the lines to JSONL and uploads them with `purpose=batch`.
    async fn upload_input(&self, lines: &[BatchLine]) -> Result<String> {
        let mut jsonl = String::new();
        for line in lines {
            jsonl.push_str(&serde_json::to_string(line).map_err(|e| {
                ProviderError::new(Provider::OpenAI, ProviderErrorKind::Decode(e.to_string()))
            })?);
            jsonl.push('\n');
        }

        let url = format!("{}/v1/files", self.base);
        debug!(lines = lines.len(), bytes = jsonl.len(), "uploading batch input file");

        let form = reqwest::multipart::Form::new().text("purpose", "batch").part(
            "file",
            reqwest::multipart::Part::text(jsonl)
                .file_name("batch.jsonl")
                .mime_str("application/jsonl")?,
        );

        let resp = self.http.post(&url).multipart(form).send().await?;
        let resp = self.check(resp, &url).await?;
        let parsed: FileCreated = decode(resp).await?;
        Ok(parsed.id)
    }

    async fn create_batch(&self, input_file_id: &str, endpoint: &'static str) -> Result<String> {
        let url = format!("{}/v1/batches", self.base);
        let body = BatchCreate {
            input_file_id,
            endpoint,
            completion_window: "24h",
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        let resp = self.check(resp, &url).await?;
        let parsed: BatchState = decode(resp).await?;
        info!(batch_id = %parsed.id, endpoint, "batch created");
        Ok(parsed.id)
    }

    /// Polls with progressive backoff until the batch reaches a terminal
    /// state. Returns the output file id on `completed`.
    async fn poll_until_done(
        &self,
        batch_id: &str,
        deadline: Duration,
        poll_base: Duration,
    ) -> Result<String> {
        let url = format!("{}/v1/batches/{}", self.base, batch_id);
        let started = Instant::now();
        let mut interval = poll_base;
        let mut consecutive_5xx: u32 = 0;
        let mut consecutive_network: u32 = 0;

        loop {
            if started.elapsed() > deadline {
                return Err(ProviderError::new(
                    Provider::OpenAI,
                    ProviderErrorKind::BatchDeadline(batch_id.to_string()),
                )
                .into());
            }

            tokio::time::sleep(interval).await;
            interval = Duration::from_secs_f64((interval.as_secs_f64() * POLL_FACTOR).min(POLL_CAP.as_secs_f64()));

            let resp = match self.http.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    consecutive_network += 1;
                    warn!(batch_id, consecutive_network, error = %e, "batch poll network error");
                    if consecutive_network >= MAX_CONSECUTIVE_NETWORK {
                        return Err(AiLlmError::HttpTransport(e));
                    }
                    continue;
                }
            };
            consecutive_network = 0;

            if resp.status().is_server_error() {
                consecutive_5xx += 1;
                warn!(batch_id, consecutive_5xx, status = %resp.status(), "batch poll 5xx");
                if consecutive_5xx >= MAX_CONSECUTIVE_5XX {
                    let status = resp.status();
                    let snippet = make_snippet(&resp.text().await.unwrap_or_default());
                    return Err(ProviderError::new(
                        Provider::OpenAI,
                        ProviderErrorKind::HttpStatus(HttpError {
                            status,
                            url: url.clone(),
                            snippet,
                        }),
                    )
                    .into());
                }
                continue;
            }
            consecutive_5xx = 0;

            let resp = self.check(resp, &url).await?;
            let state: BatchState = decode(resp).await?;
            debug!(batch_id, status = %state.status, "batch poll");

            match state.status.as_str() {
                "completed" => {
                    return state.output_file_id.ok_or_else(|| {
                        ProviderError::new(
                            Provider::OpenAI,
                            ProviderErrorKind::Decode(
                                "completed batch without output_file_id".into(),
                            ),
                        )
                        .into()
                    });
                }
                "failed" | "expired" | "cancelled" => {
                    let message = state
                        .errors
                        .and_then(|e| e.data.into_iter().next())
                        .map(|e| e.message)
                        .unwrap_or_else(|| "no error detail provided".into());
                    return Err(ProviderError::new(
                        Provider::OpenAI,
                        ProviderErrorKind::BatchFailed {
                            id: batch_id.to_string(),
                            status: state.status,
                            message,
                        },
                    )
                    .into());
                }
                _ => continue,
            }
        }
    }

    async fn download_file(&self, file_id: &str) -> Result<String> {
        let url = format!("{}/v1/files/{}/content", self.base, file_id);
        let resp = self.http.get(&url).send().await?;
        let resp = self.check(resp, &url).await?;
        Ok(resp.text().await?)
    }

    async fn check(&self, resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let snippet = make_snippet(&resp.text().await.unwrap_or_default());
        Err(ProviderError::new(
            Provider::OpenAI,
            ProviderErrorKind::HttpStatus(HttpError {
                status,
                url: url.to_string(),
                snippet,
            }),
        )
        .into())
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    resp.json::<T>().await.map_err(|e| {
        ProviderError::new(Provider::OpenAI, ProviderErrorKind::Decode(e.to_string())).into()
    })
}

/// Splits a downloaded output file into per-request results.
///
/// Each JSONL line carries `{custom_id, response: {status_code, body}, error}`.
/// Unparseable lines are dropped with a warning rather than failing the batch.
pub fn parse_output_jsonl(raw: &str) -> Vec<BatchItem> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: OutputLine = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping unparseable batch output line");
                continue;
            }
        };

        let result = if let Some(err) = parsed.error {
            Err(err.message)
        } else {
            match parsed.response {
                Some(r) if (200..300).contains(&r.status_code) => Ok(r.body),
                Some(r) => Err(format!("item returned status {}", r.status_code)),
                None => Err("item had neither response nor error".into()),
            }
        };

        out.push(BatchItem {
            custom_id: parsed.custom_id,
            result,
        });
    }
    out
}

/* ----------------------------- wire shapes ----------------------------- */

#[derive(Debug, Serialize)]
struct BatchCreate<'a> {
    input_file_id: &'a str,
    endpoint: &'static str,
    completion_window: &'static str,
}

#[derive(Debug, Deserialize)]
struct FileCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchState {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    data: Vec<BatchErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    custom_id: String,
    #[serde(default)]
    response: Option<OutputResponse>,
    #[serde(default)]
    error: Option<OutputError>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    status_code: u16,
    body: Value,
}

#[derive(Debug, Deserialize)]
struct OutputError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lines_split_into_ok_and_err() {
        let raw = concat!(
            r#"{"custom_id":"1","response":{"status_code":200,"body":{"x":1}}}"#,
            "\n",
            r#"{"custom_id":"2","error":{"message":"boom"}}"#,
            "\n",
            r#"{"custom_id":"3","response":{"status_code":500,"body":{}}}"#,
            "\n",
            "not json\n",
        );
        let items = parse_output_jsonl(raw);
        assert_eq!(items.len(), 3);
        assert!(items[0].result.is_ok());
        assert_eq!(items[1].result.as_ref().unwrap_err(), "boom");
        assert!(items[2].result.is_err());
    }

    #[test]
    fn batch_line_serialises_to_protocol_shape() {
        let line = BatchLine {
            custom_id: "42".into(),
            method: "POST",
            url: "/v1/chat/completions",
            body: serde_json::json!({"model": "m"}),
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["custom_id"], "42");
        assert_eq!(json["url"], "/v1/chat/completions");
    }
}
