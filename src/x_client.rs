//! X API Search Client
//! It calls the recent search endpoint and handles rate-limit signaling.
//! Define it as trait and implement it for the testability(using mock)
use std::thread::sleep;
use std::time::Duration;

use anyhow::Result;
use chrono::{FixedOffset, TimeZone};
use log::{info, warn};
use serde::Deserialize;
use url::Url;

use crate::config::Config;
use crate::x_object::SearchResponse;

const SEARCH_URL: &str = "https://api.x.com/2/tweets/search/recent";

/// How long a 429 response blocks the invocation before it gives up.
/// The bot is meant for a 1-5 minute scheduler cadence, so one minute is
/// enough for the next trigger to find the window reset.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of one search request.
/// `RateLimited` is a deferral, not an error, the caller ends the run quietly.
#[derive(Clone, Debug)]
pub enum FetchOutcome {
    Page(SearchResponse),
    RateLimited,
}

#[cfg(test)]
use mockall::{automock, predicate::*};
#[cfg_attr(test, automock)]
pub trait SearchClientTrait {
    fn fetch(&self, since_id: Option<String>) -> Result<FetchOutcome>;
}

/// X Search Client
/// It needs to know the endpoint, the bearer token and the search query
pub struct XSearchClient {
    agent: ureq::Agent,
    endpoint: Url,
    bearer_token: String,
    query: String,
}

impl XSearchClient {
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint = Url::parse(SEARCH_URL)?;
        let agent: ureq::Agent = ureq::AgentBuilder::new()
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(5))
            .build();

        Ok(XSearchClient {
            agent,
            endpoint,
            bearer_token: config.bearer_token.clone(),
            query: config.query.clone(),
        })
    }
}

impl SearchClientTrait for XSearchClient {
    /// Retrieve the tweets matching the configured query, newest page first.
    /// It will get at most 50 tweets(fixed value) plus the referenced
    /// users/media as side-loaded entities.
    /// * since_id: fetch only tweets with an id strictly greater than this
    fn fetch(&self, since_id: Option<String>) -> Result<FetchOutcome> {
        match &since_id {
            Some(id) => info!("Pull the tweets after the previous id: {}", id),
            None => info!("No previous id is found. Pull the latest tweets"),
        }

        let mut request = self
            .agent
            .request_url("GET", &self.endpoint)
            .query("query", &self.query)
            .query("max_results", "50")
            .query("tweet.fields", "created_at,lang,public_metrics,author_id")
            .query("user.fields", "name,username,profile_image_url")
            .query("media.fields", "url,preview_image_url,type")
            .query("expansions", "author_id,attachments.media_keys")
            .set(
                "Authorization",
                &format!("Bearer {}", self.bearer_token),
            );
        if let Some(id) = &since_id {
            request = request.query("since_id", id);
        }

        match request.call() {
            Ok(response) => {
                log_rate_limit_headers(&response);
                let page: SearchResponse = serde_json::from_reader(response.into_reader())?;
                info!("Got a search response page");
                Ok(FetchOutcome::Page(page))
            }
            Err(ureq::Error::Status(429, response)) => {
                log_rate_limit_headers(&response);
                warn!("Rate limit reached (HTTP 429)");
                log_rate_limit_error_body(response);
                info!(
                    "Wait {} seconds, the next scheduled run will retry",
                    RATE_LIMIT_BACKOFF.as_secs()
                );
                sleep(RATE_LIMIT_BACKOFF);
                Ok(FetchOutcome::RateLimited)
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(anyhow::anyhow!(
                    "Search request failed with HTTP {}: {}",
                    code,
                    body
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Flush the rate limit headers when the endpoint sends them.
/// The reset timestamp is shown at UTC+9 for the operators, it has no
/// effect on the control flow.
fn log_rate_limit_headers(response: &ureq::Response) {
    if let Some(limit) = response.header("x-rate-limit-limit") {
        info!("Rate limit: {}", limit);
    }
    if let Some(remaining) = response.header("x-rate-limit-remaining") {
        info!("Remaining requests: {}", remaining);
    }
    if let Some(reset) = response.header("x-rate-limit-reset") {
        if let Ok(timestamp) = reset.parse::<i64>() {
            let jst = FixedOffset::east_opt(9 * 3600)
                .and_then(|offset| offset.timestamp_opt(timestamp, 0).single());
            if let Some(jst) = jst {
                info!(
                    "Rate limit resets at: JST {}",
                    jst.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
}

/// A 429 body may carry `{errors:[{code,message}]}` detail, worth logging
fn log_rate_limit_error_body(response: ureq::Response) {
    match serde_json::from_reader::<_, ApiErrorBody>(response.into_reader()) {
        Ok(body) => {
            for error in body.errors {
                warn!(
                    "Error detail - code: {:?}, message: {:?}",
                    error.code, error.message
                );
            }
        }
        Err(e) => warn!("Failed to parse the error response: {}", e),
    }
}
