//! Process configuration
//! Everything is read from the environment exactly once at startup and
//! carried in a plain struct, so the components never touch `std::env`.
use std::env;
use std::path::PathBuf;

use anyhow::Result;

pub const DEFAULT_STATE_FILE: &str = "since_id.txt";
pub const DEFAULT_CURSOR_SECRET: &str = "xfwd-since-id";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug)]
pub struct Config {
    /// Bearer token for the X API
    pub bearer_token: String,
    /// Discord webhook URL receiving the forwarded tweets
    pub webhook_url: String,
    /// Search query passed through to the recent search endpoint
    pub query: String,
    /// Local file holding the raw cursor string
    pub state_file: PathBuf,
    /// Name of the remote secret holding the cursor
    pub cursor_secret: String,
    /// GCP project identity, required for the remote cursor tier
    pub project_id: Option<String>,
    /// True when running on Cloud Run (`K_SERVICE` is set there)
    pub hosted: bool,
    /// Port for the HTTP trigger surface
    pub port: u16,
}

impl Config {
    /// Build the configuration from the environment.
    /// Fails listing every missing required variable, before any network call.
    pub fn from_env() -> Result<Config> {
        let bearer_token = env::var("XFWD_BEARER_TOKEN").ok();
        let webhook_url = env::var("XFWD_WEBHOOK_URL").ok();
        let query = env::var("XFWD_QUERY").ok();

        let missing = missing_required(&bearer_token, &webhook_url, &query);
        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "Please confirm the following environment variables are defined: {}",
                missing.join(", ")
            ));
        }

        let port = match env::var("PORT").ok() {
            Some(raw) => raw.parse()?,
            None => DEFAULT_PORT,
        };

        Ok(Config {
            // missing_required ruled the None cases out above
            bearer_token: bearer_token.unwrap_or_default(),
            webhook_url: webhook_url.unwrap_or_default(),
            query: query.unwrap_or_default(),
            state_file: env::var("XFWD_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_FILE)),
            cursor_secret: env::var("XFWD_CURSOR_SECRET")
                .unwrap_or_else(|_| DEFAULT_CURSOR_SECRET.to_string()),
            project_id: env::var("GOOGLE_CLOUD_PROJECT").ok(),
            hosted: env::var("K_SERVICE").is_ok(),
            port,
        })
    }
}

/// Pure validation over the raw values, an empty string counts as missing.
fn missing_required(
    bearer_token: &Option<String>,
    webhook_url: &Option<String>,
    query: &Option<String>,
) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if bearer_token.as_deref().map_or(true, str::is_empty) {
        missing.push("XFWD_BEARER_TOKEN");
    }
    if webhook_url.as_deref().map_or(true, str::is_empty) {
        missing.push("XFWD_WEBHOOK_URL");
    }
    if query.as_deref().map_or(true, str::is_empty) {
        missing.push("XFWD_QUERY");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::missing_required;

    #[test]
    fn all_required_present() {
        let token = Some("token".to_string());
        let webhook = Some("https://discord.com/api/webhooks/1/a".to_string());
        let query = Some("#rust".to_string());
        assert!(missing_required(&token, &webhook, &query).is_empty());
    }

    #[test]
    fn absent_and_empty_both_count_as_missing() {
        let token: Option<String> = None;
        let webhook = Some(String::new());
        let query = Some("#rust".to_string());
        let missing = missing_required(&token, &webhook, &query);
        assert_eq!(missing, vec!["XFWD_BEARER_TOKEN", "XFWD_WEBHOOK_URL"]);
    }
}
