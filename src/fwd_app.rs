//! App module tying the clients together into one pipeline pass
//! pub methods are expected to call from [`#main`] or the trigger server
use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;
use log::info;

use crate::cursor_store::{CursorStore, SecretStore};
use crate::discord_client::{to_embed, WebhookTrait};
use crate::x_client::{FetchOutcome, SearchClientTrait};
use crate::x_object::Tweet;

/// Build a lookup map over side-loaded entities, keyed by the given field.
/// Last write wins on a duplicate key, which the API should never produce.
pub fn index_by<'a, T, F>(items: &'a [T], key: F) -> HashMap<String, &'a T>
where
    F: Fn(&T) -> &str,
{
    items
        .iter()
        .map(|item| (key(item).to_string(), item))
        .collect()
}

/// Numeric order for decimal id strings.
/// Plain string order breaks as soon as the ids differ in digit count,
/// so compare the length first.
fn compare_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Run one fetch and forward pass
///
/// Load the cursor, fetch the tweets newer than it, forward them oldest
/// first and persist the max id as the next cursor. A rate-limited fetch or
/// an empty page ends the run quietly with no cursor mutation. A failed
/// forward aborts the run before the cursor is saved, so the next triggered
/// run re-fetches the same batch instead of silently dropping tweets.
/// * x_client: X search client with a valid bearer token
/// * webhook: Discord webhook client
/// * cursor_store: cursor storage with its tiers already wired
pub fn fetch_and_forward<S: SecretStore>(
    x_client: &impl SearchClientTrait,
    webhook: &impl WebhookTrait,
    cursor_store: &CursorStore<S>,
) -> Result<()> {
    info!("Start to fetch and forward the tweets");

    let since_id = cursor_store.load();
    let page = match x_client.fetch(since_id)? {
        FetchOutcome::Page(page) => page,
        FetchOutcome::RateLimited => return Ok(()),
    };

    if page.data.is_empty() {
        info!("No new tweets");
        return Ok(());
    }

    let users_idx = index_by(&page.includes.users, |user| user.id.as_str());
    let media_idx = index_by(&page.includes.media, |media| media.media_key.as_str());

    info!(
        "Got: {} tweets, {} users, {} media",
        page.data.len(),
        page.includes.users.len(),
        page.includes.media.len()
    );

    // 古い順に送る(Discord上で読みやすくするため)
    let mut tweets: Vec<&Tweet> = page.data.iter().collect();
    tweets.sort_by(|a, b| compare_ids(&a.id, &b.id));

    let total = tweets.len();
    for (i, tweet) in tweets.iter().enumerate() {
        let username = users_idx
            .get(&tweet.author_id)
            .map_or("unknown", |user| user.username.as_str());
        info!("Forwarding tweet {} / {}: @{}", i + 1, total, username);
        let embed = to_embed(tweet, &users_idx, &media_idx);
        webhook.post(None, Some(embed))?;
    }

    // 次回用に最大IDを保存
    if let Some(newest) = tweets.last() {
        cursor_store.save(&newest.id)?;
    }
    info!("Finished the pass. Forwarded {} tweets", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;
    use serde_json::json;

    use crate::cursor_store::{CursorStore, MockSecretStore};
    use crate::discord_client::MockWebhookTrait;
    use crate::x_client::{FetchOutcome, MockSearchClientTrait};
    use crate::x_object::{SearchResponse, User};

    use super::{compare_ids, fetch_and_forward, index_by};

    fn file_store(dir: &tempfile::TempDir) -> CursorStore<MockSecretStore> {
        CursorStore::new(
            None,
            "xfwd-since-id".to_string(),
            dir.path().join("since_id.txt"),
        )
    }

    fn page_with_ids(ids: &[&str]) -> SearchResponse {
        let data: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "author_id": "7",
                    "text": format!("tweet {}", id),
                    "created_at": "2024-05-01T00:00:00.000Z",
                    "public_metrics": {
                        "retweet_count": 0,
                        "reply_count": 0,
                        "like_count": 0,
                        "quote_count": 0
                    }
                })
            })
            .collect();
        serde_json::from_value(json!({
            "data": data,
            "includes": {
                "users": [{ "id": "7", "name": "Asai", "username": "asai" }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn index_by_of_empty_input_is_empty() {
        let users: Vec<User> = Vec::new();
        assert!(index_by(&users, |user| user.id.as_str()).is_empty());
    }

    #[test]
    fn index_by_keys_every_record() {
        let page: SearchResponse = serde_json::from_value(json!({
            "includes": {
                "users": [
                    { "id": "1", "name": "One", "username": "one" },
                    { "id": "2", "name": "Two", "username": "two" }
                ]
            }
        }))
        .unwrap();
        let idx = index_by(&page.includes.users, |user| user.id.as_str());
        assert_eq!(idx.len(), 2);
        assert_eq!(idx["1"].username, "one");
        assert_eq!(idx["2"].username, "two");
    }

    #[test]
    fn ids_of_differing_digit_counts_order_numerically() {
        let mut ids = vec!["10", "9", "100"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["9", "10", "100"]);
    }

    #[test]
    fn forwards_oldest_first_and_saves_the_max_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);

        let mut x_client = MockSearchClientTrait::new();
        let page = page_with_ids(&["125", "122", "124"]);
        x_client
            .expect_fetch()
            .times(1)
            .returning(move |_| Ok(FetchOutcome::Page(page.clone())));

        let mut webhook = MockWebhookTrait::new();
        let mut seq = Sequence::new();
        for expected in ["122", "124", "125"] {
            let suffix = format!("/status/{}", expected);
            webhook
                .expect_post()
                .times(1)
                .in_sequence(&mut seq)
                .withf(move |_, embed| {
                    embed.as_ref().map_or(false, |e| e.url.ends_with(&suffix))
                })
                .returning(|_, _| Ok(()));
        }

        fetch_and_forward(&x_client, &webhook, &store).unwrap();
        assert_eq!(store.load(), Some("125".to_string()));
    }

    #[test]
    fn rate_limited_fetch_forwards_nothing_and_keeps_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);

        let mut x_client = MockSearchClientTrait::new();
        x_client
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(FetchOutcome::RateLimited));

        let mut webhook = MockWebhookTrait::new();
        webhook.expect_post().times(0);

        fetch_and_forward(&x_client, &webhook, &store).unwrap();
        assert!(!dir.path().join("since_id.txt").exists());
    }

    #[test]
    fn empty_page_keeps_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        std::fs::write(dir.path().join("since_id.txt"), "50").unwrap();

        let mut x_client = MockSearchClientTrait::new();
        x_client
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(FetchOutcome::Page(SearchResponse::default())));

        let mut webhook = MockWebhookTrait::new();
        webhook.expect_post().times(0);

        fetch_and_forward(&x_client, &webhook, &store).unwrap();
        assert_eq!(store.load(), Some("50".to_string()));
    }

    #[test]
    fn failed_forward_aborts_before_the_cursor_advances() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);

        let mut x_client = MockSearchClientTrait::new();
        let page = page_with_ids(&["122", "125"]);
        x_client
            .expect_fetch()
            .times(1)
            .returning(move |_| Ok(FetchOutcome::Page(page.clone())));

        let mut webhook = MockWebhookTrait::new();
        webhook
            .expect_post()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("webhook is gone")));

        let result = fetch_and_forward(&x_client, &webhook, &store);
        assert!(result.is_err());
        assert!(!dir.path().join("since_id.txt").exists());
    }
}
