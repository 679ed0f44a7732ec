//! Discord webhook client and the tweet -> embed transformation
//! The webhook is behind a trait for the testability(using mock)
use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use log::info;
use serde::Serialize;
use url::Url;

use crate::config::Config;
use crate::x_object::{Media, Tweet, User};

/// Discord caps an embed description at 4096 chars, we stay under it
const DESCRIPTION_LIMIT: usize = 4000;

/// Placeholder for an author missing from the side-loaded users
const UNKNOWN_USERNAME: &str = "unknown";

/// One Discord embed, derived from one tweet. Never stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub description: String,
    pub author: EmbedAuthor,
    pub footer: EmbedFooter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

/// Webhook request body, absent keys are omitted entirely
#[derive(Serialize)]
struct WebhookBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embeds: Option<Vec<Embed>>,
}

#[cfg(test)]
use mockall::{automock, predicate::*};
#[cfg_attr(test, automock)]
pub trait WebhookTrait {
    fn post(&self, content: Option<String>, embed: Option<Embed>) -> Result<()>;
}

pub struct DiscordWebhook {
    agent: ureq::Agent,
    url: Url,
}

impl DiscordWebhook {
    pub fn new(config: &Config) -> Result<Self> {
        let url = Url::parse(&config.webhook_url)?;
        let agent: ureq::Agent = ureq::AgentBuilder::new()
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .build();
        Ok(DiscordWebhook { agent, url })
    }
}

impl WebhookTrait for DiscordWebhook {
    /// POST one message to the webhook. Non-2xx is an error and there is
    /// no retry in here, the caller decides what a failed forward means.
    fn post(&self, content: Option<String>, embed: Option<Embed>) -> Result<()> {
        let body = WebhookBody {
            content,
            embeds: embed.map(|e| vec![e]),
        };

        info!("Posting to Discord...");
        self.agent
            .request_url("POST", &self.url)
            .send_json(body)
            .map_err(|e| anyhow::anyhow!("Failed to post to Discord: {}", e))?;
        info!("Posted to Discord");
        Ok(())
    }
}

/// Map one tweet plus its joined user/media records into an embed.
/// * users_idx: side-loaded users keyed by id
/// * media_idx: side-loaded media keyed by media_key
pub fn to_embed(
    tweet: &Tweet,
    users_idx: &HashMap<String, &User>,
    media_idx: &HashMap<String, &Media>,
) -> Embed {
    let author = users_idx.get(&tweet.author_id);
    let username = author.map_or(UNKNOWN_USERNAME, |user| user.username.as_str());

    // 最初のphotoだけを画像として採用する, photo以外のmediaはスキップして探し続ける
    let mut image = None;
    if let Some(attachments) = &tweet.attachments {
        for media_key in &attachments.media_keys {
            if let Some(media) = media_idx.get(media_key) {
                if media.kind == "photo" {
                    image = media
                        .url
                        .clone()
                        .or_else(|| media.preview_image_url.clone())
                        .map(|url| EmbedImage { url });
                    break;
                }
            }
        }
    }

    let description: String = html_escape::decode_html_entities(&tweet.text)
        .chars()
        .take(DESCRIPTION_LIMIT)
        .collect();

    Embed {
        title: format!("@{}", username),
        url: format!("https://x.com/{}/status/{}", username, tweet.id),
        description,
        author: EmbedAuthor {
            name: author.map_or_else(|| username.to_string(), |user| user.name.clone()),
            url: format!("https://x.com/{}", username),
            icon_url: author.and_then(|user| user.profile_image_url.clone()),
        },
        footer: EmbedFooter {
            text: format!(
                "likes: {}  rt: {}",
                tweet.public_metrics.like_count, tweet.public_metrics.retweet_count
            ),
        },
        image,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::x_object::{Attachments, Media, PublicMetrics, Tweet, User};

    use super::to_embed;

    fn tweet(text: &str) -> Tweet {
        Tweet {
            id: "100".to_string(),
            author_id: "7".to_string(),
            text: text.to_string(),
            created_at: "2024-05-01T00:00:00.000Z".to_string(),
            public_metrics: PublicMetrics {
                retweet_count: 2,
                reply_count: 0,
                like_count: 5,
                quote_count: 0,
            },
            attachments: None,
        }
    }

    fn user() -> User {
        User {
            id: "7".to_string(),
            name: "Asai".to_string(),
            username: "asai".to_string(),
            profile_image_url: Some("https://pbs.example/7.jpg".to_string()),
        }
    }

    #[test]
    fn decodes_html_entities_in_the_text() {
        let tw = tweet("Test &amp; tweet");
        let author = user();
        let users_idx = HashMap::from([("7".to_string(), &author)]);
        let embed = to_embed(&tw, &users_idx, &HashMap::new());
        assert_eq!(embed.description, "Test & tweet");
    }

    #[test]
    fn truncates_long_text_to_the_discord_limit() {
        let tw = tweet(&"a".repeat(5000));
        let embed = to_embed(&tw, &HashMap::new(), &HashMap::new());
        assert_eq!(embed.description.chars().count(), 4000);
    }

    #[test]
    fn picks_the_first_photo_even_behind_a_video() {
        let mut tw = tweet("with media");
        tw.attachments = Some(Attachments {
            media_keys: vec!["mk1".to_string(), "mk2".to_string()],
        });
        let video = Media {
            media_key: "mk1".to_string(),
            kind: "video".to_string(),
            url: None,
            preview_image_url: Some("https://img.example/v.jpg".to_string()),
        };
        let photo = Media {
            media_key: "mk2".to_string(),
            kind: "photo".to_string(),
            url: Some("U".to_string()),
            preview_image_url: None,
        };
        let media_idx =
            HashMap::from([("mk1".to_string(), &video), ("mk2".to_string(), &photo)]);
        let embed = to_embed(&tw, &HashMap::new(), &media_idx);
        assert_eq!(embed.image.unwrap().url, "U");
    }

    #[test]
    fn no_photo_means_no_image_field() {
        let mut tw = tweet("video only");
        tw.attachments = Some(Attachments {
            media_keys: vec!["mk1".to_string()],
        });
        let video = Media {
            media_key: "mk1".to_string(),
            kind: "video".to_string(),
            url: Some("https://video.example/v.mp4".to_string()),
            preview_image_url: None,
        };
        let media_idx = HashMap::from([("mk1".to_string(), &video)]);
        let embed = to_embed(&tw, &HashMap::new(), &media_idx);
        assert_eq!(embed.image, None);
    }

    #[test]
    fn unknown_author_gets_the_placeholder() {
        let tw = tweet("orphan tweet");
        let embed = to_embed(&tw, &HashMap::new(), &HashMap::new());
        assert_eq!(embed.title, "@unknown");
        assert_eq!(embed.url, "https://x.com/unknown/status/100");
        assert_eq!(embed.author.name, "unknown");
        assert_eq!(embed.author.icon_url, None);
    }

    #[test]
    fn footer_shows_likes_and_retweets() {
        let tw = tweet("metrics");
        let embed = to_embed(&tw, &HashMap::new(), &HashMap::new());
        assert_eq!(embed.footer.text, "likes: 5  rt: 2");
    }
}
