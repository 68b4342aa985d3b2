//! GitHub provider (REST v3) for pull request listing, files and diffs.
//!
//! Endpoints used:
//!   * GET  /repos/{owner}/{repo}/pulls?state=open&per_page=100&page=N
//!   * GET  /repos/{owner}/{repo}/pulls/{number}
//!   * GET  /repos/{owner}/{repo}/pulls/{number}/files
//!   * GET  /repos/{owner}/{repo}/pulls/{number} (Accept: vnd.github.diff)
//!   * POST /repos/{owner}/{repo}/issues/{number}/comments
//!   * PATCH /repos/{owner}/{repo}/pulls/{number}
//!
//! All calls go through [`rate_limited_http::RateLimitedClient`]. On top of
//! the reactive 429/403 retries, the client throttles proactively: when
//! `x-ratelimit-remaining` drops below a small buffer it sleeps until the
//! advertised reset before issuing the next request.

mod errors;
pub mod types;

pub use errors::{GitHubError, GitHubResult};
pub use types::{PrDiff, PrFile, PullRequest};

use std::time::Duration;

use chrono::{DateTime, Utc};
use rate_limited_http::RateLimitedClient;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::Serialize;
use tracing::{debug, info, warn};

const PAGE_SIZE: usize = 100;
const API_VERSION: &str = "2022-11-28";
/// Remaining-call buffer below which the client sleeps until reset.
const RATE_LIMIT_BUFFER: i64 = 5;

/// GitHub HTTP client wrapper.
#[derive(Clone)]
pub struct GitHubClient {
    http: RateLimitedClient,
    base_api: String,
    token: String,
    /// Diffs larger than this (bytes) raise [`GitHubError::DiffTooLarge`].
    max_diff_bytes: usize,
}

impl GitHubClient {
    /// Constructs a GitHub client with a shared rate-limited HTTP instance.
    pub fn new(http: RateLimitedClient, base_api: String, token: String) -> Self {
        debug!("Creating GitHubClient with base_api={}", base_api);
        Self {
            http,
            base_api,
            token,
            max_diff_bytes: 1024 * 1024,
        }
    }

    /// Overrides the oversized-diff threshold.
    pub fn with_max_diff_bytes(mut self, bytes: usize) -> Self {
        self.max_diff_bytes = bytes;
        self
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .inner()
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", "pr-dedup-backend/0.1")
    }

    async fn send(&self, builder: RequestBuilder) -> GitHubResult<Response> {
        let request = builder
            .build()
            .map_err(|e| GitHubError::Validation(e.to_string()))?;
        let url = request.url().to_string();

        let response = self
            .http
            .execute_with(request, Some(&ratelimit_reset_backoff))
            .await?;

        self.throttle_if_low(&response).await;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(GitHubError::Unauthorized),
            StatusCode::NOT_FOUND => Err(GitHubError::NotFound(url)),
            s if !s.is_success() && s != StatusCode::NOT_MODIFIED => {
                let status = s.as_u16();
                let snippet = snippet_of(&response.text().await.unwrap_or_default());
                Err(GitHubError::Api {
                    status,
                    url,
                    snippet,
                })
            }
            _ => Ok(response),
        }
    }

    /// Sleeps until the advertised reset when the remaining quota is nearly
    /// exhausted, so bulk ingestion does not run into hard 403s.
    async fn throttle_if_low(&self, response: &Response) {
        let remaining = header_i64(response, "x-ratelimit-remaining");
        if let Some(remaining) = remaining {
            if remaining <= RATE_LIMIT_BUFFER {
                let wait = header_i64(response, "x-ratelimit-reset")
                    .map(secs_until_epoch)
                    .unwrap_or_else(|| Duration::from_secs(1));
                warn!(
                    remaining,
                    wait_secs = wait.as_secs(),
                    "github quota nearly exhausted, throttling"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Lists open PRs, newest pages first per GitHub default ordering.
    ///
    /// Pagination: page size 100, continue while the last page is full.
    /// `max` caps the total number of PRs returned.
    pub async fn list_open_prs(
        &self,
        owner: &str,
        repo: &str,
        max: Option<usize>,
    ) -> GitHubResult<Vec<PullRequest>> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        let mut out = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls?state=open&per_page={}&page={}",
                self.base_api, owner, repo, PAGE_SIZE, page
            );
            debug!("GitHub list_open_prs: {}", url);

            let raw: Vec<GitHubPr> = self
                .send(self.request(Method::GET, &url))
                .await?
                .json()
                .await?;
            let fetched = raw.len();
            out.extend(raw.into_iter().map(PullRequest::from));

            if let Some(cap) = max {
                if out.len() >= cap {
                    out.truncate(cap);
                    break;
                }
            }
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        info!(owner, repo, count = out.len(), "listed open pull requests");
        Ok(out)
    }

    /// Fetches metadata for a single PR.
    pub async fn fetch_pr(&self, owner: &str, repo: &str, number: i64) -> GitHubResult<PullRequest> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        let url = format!("{}/repos/{}/{}/pulls/{}", self.base_api, owner, repo, number);
        debug!("GitHub fetch_pr: {}", url);

        let raw: GitHubPr = self
            .send(self.request(Method::GET, &url))
            .await?
            .json()
            .await?;
        Ok(raw.into())
    }

    /// Fetches the changed-file list of a PR (paginated like the PR list).
    pub async fn get_pr_files(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> GitHubResult<Vec<PrFile>> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        let mut out = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{}/files?per_page={}&page={}",
                self.base_api, owner, repo, number, PAGE_SIZE, page
            );
            debug!("GitHub get_pr_files: {}", url);

            let raw: Vec<GitHubPrFile> = self
                .send(self.request(Method::GET, &url))
                .await?
                .json()
                .await?;
            let fetched = raw.len();
            out.extend(raw.into_iter().map(|f| PrFile {
                path: f.filename,
                status: f.status,
                additions: f.additions,
                deletions: f.deletions,
            }));

            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(out)
    }

    /// Fetches the raw unified diff of a PR with ETag revalidation.
    ///
    /// Returns `Ok(None)` on 304 (the caller keeps its prior hash). Raises
    /// [`GitHubError::DiffTooLarge`] when the body exceeds the limit; the
    /// ingester then records file paths only.
    pub async fn get_pr_diff(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        etag: Option<&str>,
    ) -> GitHubResult<Option<PrDiff>> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        let url = format!("{}/repos/{}/{}/pulls/{}", self.base_api, owner, repo, number);
        debug!("GitHub get_pr_diff: {} (etag={:?})", url, etag);

        let mut builder = self
            .request(Method::GET, &url)
            .header("Accept", "application/vnd.github.diff");
        if let Some(tag) = etag {
            builder = builder.header("If-None-Match", tag);
        }

        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("GitHub diff unchanged (304) for #{number}");
            return Ok(None);
        }

        let new_etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Content-length is advisory; re-check the actual body size.
        if let Some(len) = response.content_length() {
            if len as usize > self.max_diff_bytes {
                return Err(GitHubError::DiffTooLarge {
                    bytes: len as usize,
                    limit: self.max_diff_bytes,
                });
            }
        }

        let body = response.text().await?;
        if body.len() > self.max_diff_bytes {
            return Err(GitHubError::DiffTooLarge {
                bytes: body.len(),
                limit: self.max_diff_bytes,
            });
        }

        Ok(Some(PrDiff {
            body,
            etag: new_etag,
        }))
    }

    /// Posts a comment and closes the PR.
    ///
    /// The detection pipeline never calls this; it exists for the outer API
    /// layer acting on a ranked recommendation.
    pub async fn close_pr_with_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        comment: &str,
    ) -> GitHubResult<()> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        let comment_url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_api, owner, repo, number
        );
        self.send(
            self.request(Method::POST, &comment_url)
                .json(&CommentCreate { body: comment }),
        )
        .await?;

        let pr_url = format!("{}/repos/{}/{}/pulls/{}", self.base_api, owner, repo, number);
        self.send(
            self.request(Method::PATCH, &pr_url)
                .json(&StatePatch { state: "closed" }),
        )
        .await?;

        info!(owner, repo, number, "closed pull request with comment");
        Ok(())
    }
}

/// Backoff extractor for the rate limiter: honours `x-ratelimit-reset`
/// on throttled responses before generic Retry-After handling kicks in.
fn ratelimit_reset_backoff(response: &Response) -> Option<Duration> {
    let remaining = header_i64(response, "x-ratelimit-remaining")?;
    if remaining > 0 {
        return None;
    }
    header_i64(response, "x-ratelimit-reset").map(secs_until_epoch)
}

fn header_i64(response: &Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
}

fn secs_until_epoch(reset_epoch: i64) -> Duration {
    let now = Utc::now().timestamp();
    Duration::from_secs((reset_epoch - now).max(1) as u64)
}

fn validate_segment(s: &str) -> GitHubResult<()> {
    if s.is_empty() || s.contains('/') || s.contains(char::is_whitespace) {
        return Err(GitHubError::Validation(format!(
            "invalid owner/repo segment '{s}'"
        )));
    }
    Ok(())
}

fn snippet_of(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/* ----------------------------- wire shapes ----------------------------- */

/// GitHub PR response (subset).
#[derive(Debug, Deserialize)]
struct GitHubPr {
    number: i64,
    title: String,
    body: Option<String>,
    state: String,
    user: GitHubUser,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubPrFile {
    filename: String,
    status: String,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

#[derive(Debug, Serialize)]
struct CommentCreate<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct StatePatch<'a> {
    state: &'a str,
}

impl From<GitHubPr> for PullRequest {
    fn from(raw: GitHubPr) -> Self {
        PullRequest {
            number: raw.number,
            title: raw.title,
            body: raw.body,
            author: raw.user.login,
            state: raw.state,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            merged_at: raw.merged_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_validation_rejects_paths() {
        assert!(validate_segment("octocat").is_ok());
        assert!(validate_segment("octo/cat").is_err());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("octo cat").is_err());
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let s = snippet_of(&long);
        assert!(s.len() < 210);
        assert!(s.ends_with('…'));
    }
}
