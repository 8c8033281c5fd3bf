use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::fetch::{ContestRecord, FetchClient, FetchError, SubmitRecord};
use crate::http_client::build_http_client;

const CODEFORCES_RATING_URL: &str = "https://codeforces.com/api/user.rating";
const CODEFORCES_STATUS_URL: &str = "https://codeforces.com/api/user.status";
const ATCODER_USERS_URL: &str = "https://atcoder.jp/users";
const CODEFORCES: &str = "codeforces";
const BODY_SNIPPET_CHARS: usize = 160;

/// Talks to codeforces and atcoder directly and to an optional crawl-service
/// proxy for every other platform.
pub struct HttpFetchClient {
    client: Client,
    crawl_service: Option<String>,
}

impl HttpFetchClient {
    pub fn new(timeout: Duration, crawl_service: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            crawl_service,
        })
    }

    fn fetch_response(
        &self,
        platform: &str,
        req: RequestBuilder,
    ) -> Result<(StatusCode, String), FetchError> {
        let resp = req
            .send()
            .context("request failed")
            .map_err(|err| FetchError::unavailable(platform, err))?;
        let status = resp.status();
        let body = resp
            .text()
            .context("failed reading body")
            .map_err(|err| FetchError::unavailable(platform, err))?;
        Ok((status, body))
    }

    fn fetch_body(&self, platform: &str, req: RequestBuilder) -> Result<String, FetchError> {
        let (status, body) = self.fetch_response(platform, req)?;
        if !status.is_success() {
            return Err(http_error(platform, status, &body));
        }
        Ok(body)
    }

    fn fetch_codeforces<T>(
        &self,
        url: &str,
        handle: &str,
        parse: fn(&str) -> Result<T>,
    ) -> Result<T, FetchError> {
        let req = self.client.get(url).query(&[("handle", handle)]);
        let (status, body) = self.fetch_response(CODEFORCES, req)?;
        codeforces_outcome(status, &body, parse)
    }

    fn via_service<T>(
        &self,
        endpoint: &str,
        platform: &str,
        handle: &str,
        parse: fn(&str) -> Result<T>,
    ) -> Result<T, FetchError> {
        let Some(base) = self.crawl_service.as_deref() else {
            return Err(FetchError::Unsupported {
                platform: platform.to_string(),
            });
        };
        let req = self
            .client
            .get(format!("{base}/{endpoint}"))
            .query(&[("platform", platform), ("handle", handle)]);
        let body = self.fetch_body(platform, req)?;
        parse(&body).map_err(|err| FetchError::malformed(platform, err))
    }
}

impl FetchClient for HttpFetchClient {
    fn fetch_contest_record(
        &self,
        platform: &str,
        handle: &str,
    ) -> Result<ContestRecord, FetchError> {
        match platform {
            CODEFORCES => {
                self.fetch_codeforces(CODEFORCES_RATING_URL, handle, parse_codeforces_rating_json)
            }
            "atcoder" => {
                let url = atcoder_history_url(handle).map_err(|err| FetchError::unavailable(platform, err))?;
                let body = self.fetch_body(platform, self.client.get(url))?;
                parse_atcoder_history_json(&body).map_err(|err| FetchError::malformed(platform, err))
            }
            _ => self.via_service("contest-record", platform, handle, parse_service_contest_json),
        }
    }

    fn fetch_submit_record(&self, platform: &str, handle: &str) -> Result<SubmitRecord, FetchError> {
        match platform {
            CODEFORCES => {
                self.fetch_codeforces(CODEFORCES_STATUS_URL, handle, parse_codeforces_status_json)
            }
            _ => self.via_service("submit-record", platform, handle, parse_service_submit_json),
        }
    }
}

fn http_error(platform: &str, status: StatusCode, body: &str) -> FetchError {
    FetchError::unavailable(platform, format!("http {status}: {}", snippet(body)))
}

/// Codeforces reports API errors (unknown handle and the like) with a 4xx
/// status and a `FAILED` envelope; those are malformed answers, not outages.
fn codeforces_outcome<T>(
    status: StatusCode,
    body: &str,
    parse: fn(&str) -> Result<T>,
) -> Result<T, FetchError> {
    if !status.is_success() && codeforces_failure_comment(body).is_none() {
        return Err(http_error(CODEFORCES, status, body));
    }
    parse(body).map_err(|err| FetchError::malformed(CODEFORCES, err))
}

fn codeforces_failure_comment(raw: &str) -> Option<String> {
    let envelope: CodeforcesEnvelope<IgnoredAny> = serde_json::from_str(raw.trim()).ok()?;
    (envelope.status != "OK").then(|| envelope.comment.unwrap_or(envelope.status))
}

fn atcoder_history_url(handle: &str) -> Result<Url> {
    let mut url = Url::parse(ATCODER_USERS_URL).context("invalid atcoder base url")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("atcoder base url cannot take segments"))?
        .push(handle)
        .push("history")
        .push("json");
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct CodeforcesEnvelope<T> {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeforcesRatingChange {
    new_rating: i64,
}

#[derive(Debug, Deserialize)]
struct CodeforcesSubmission {
    #[serde(default)]
    verdict: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AtcoderHistoryEntry {
    is_rated: bool,
    new_rating: i64,
}

#[derive(Debug, Deserialize)]
struct ServiceContestRecord {
    #[serde(default)]
    rating: i64,
    #[serde(default)]
    length: u32,
}

#[derive(Debug, Deserialize)]
struct ServiceSubmitRecord {
    #[serde(default)]
    accept_count: u32,
    #[serde(default)]
    submit_count: u32,
}

fn codeforces_result<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let envelope: CodeforcesEnvelope<T> =
        serde_json::from_str(raw.trim()).context("invalid codeforces json")?;
    if envelope.status != "OK" {
        let reason = envelope.comment.unwrap_or(envelope.status);
        bail!("codeforces api error: {reason}");
    }
    envelope.result.context("codeforces response has no result")
}

/// Latest rating (0 when unrated) and number of rated contests.
pub fn parse_codeforces_rating_json(raw: &str) -> Result<ContestRecord> {
    let changes: Vec<CodeforcesRatingChange> = codeforces_result(raw)?;
    Ok(ContestRecord {
        rating: changes.last().map(|c| c.new_rating).unwrap_or(0),
        contest_count: saturating_count(changes.len()),
    })
}

/// Accepted submissions over all submissions.
pub fn parse_codeforces_status_json(raw: &str) -> Result<SubmitRecord> {
    let submissions: Vec<CodeforcesSubmission> = codeforces_result(raw)?;
    let accepted = submissions
        .iter()
        .filter(|s| s.verdict.as_deref() == Some("OK"))
        .count();
    Ok(SubmitRecord {
        accepted_count: saturating_count(accepted),
        submitted_count: saturating_count(submissions.len()),
    })
}

pub fn parse_atcoder_history_json(raw: &str) -> Result<ContestRecord> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(ContestRecord {
            rating: 0,
            contest_count: 0,
        });
    }
    let history: Vec<AtcoderHistoryEntry> =
        serde_json::from_str(trimmed).context("invalid atcoder history json")?;
    let rated: Vec<&AtcoderHistoryEntry> = history.iter().filter(|e| e.is_rated).collect();
    Ok(ContestRecord {
        rating: rated.last().map(|e| e.new_rating).unwrap_or(0),
        contest_count: saturating_count(rated.len()),
    })
}

pub fn parse_service_contest_json(raw: &str) -> Result<ContestRecord> {
    let record: ServiceContestRecord =
        serde_json::from_str(raw.trim()).context("invalid contest-record json")?;
    Ok(ContestRecord {
        rating: record.rating,
        contest_count: record.length,
    })
}

pub fn parse_service_submit_json(raw: &str) -> Result<SubmitRecord> {
    let record: ServiceSubmitRecord =
        serde_json::from_str(raw.trim()).context("invalid submit-record json")?;
    Ok(SubmitRecord {
        accepted_count: record.accept_count,
        submitted_count: record.submit_count,
    })
}

fn saturating_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(BODY_SNIPPET_CHARS).collect();
    format!("{cut}…")
}
