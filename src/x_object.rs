//! X API search response object definition
use serde::{Deserialize, Serialize};

/// One page of the recent search endpoint.
/// A page without matches comes back without a `data` key at all,
/// so both top-level fields default to empty.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<Tweet>,
    #[serde(default)]
    pub includes: Includes,
}

/// Side-loaded entities, joined to tweets by foreign key
/// (`author_id` -> users, `attachments.media_keys` -> media).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,
    pub profile_image_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Tweet {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: String,
    pub public_metrics: PublicMetrics,
    pub attachments: Option<Attachments>,
}

/// Will be used for the likes/retweets footer on the embed
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PublicMetrics {
    pub retweet_count: u32,
    pub reply_count: u32,
    pub like_count: u32,
    pub quote_count: u32,
}

/// Will be used for resolving the attached media
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Attachments {
    pub media_keys: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Media {
    pub media_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    pub preview_image_url: Option<String>,
}
