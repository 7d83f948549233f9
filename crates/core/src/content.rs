//! Content source client: fetches the post text that gets narrated.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ReelError, Result};
use crate::types::PostContent;

/// Capability boundary for fetching post content. The pipeline only depends
/// on this trait, so tests run against a deterministic stub.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, post_reference: &str) -> Result<PostContent>;
}

/// Reddit JSON API client. A post URL with a `.json` suffix returns two
/// listings: the post itself and its top-level comment tree.
pub struct RedditClient {
    client: reqwest::Client,
    user_agent: String,
    max_comments: usize,
}

impl RedditClient {
    pub fn new(max_comments: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: "storyreel/0.1".to_string(),
            max_comments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    #[serde(default)]
    data: ChildData,
}

#[derive(Debug, Default, Deserialize)]
struct ChildData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    body: String,
}

fn is_tombstone(text: &str) -> bool {
    matches!(text.trim(), "[removed]" | "[deleted]")
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn fetch(&self, post_reference: &str) -> Result<PostContent> {
        let url = format!("{}.json", post_reference.trim_end_matches('/'));
        let unavailable = |reason: String| ReelError::ContentUnavailable {
            reference: post_reference.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        let listings: Vec<Listing> = response.json().await?;
        let post = listings
            .first()
            .and_then(|l| l.data.children.first())
            .ok_or_else(|| unavailable("empty post listing".to_string()))?;

        if is_tombstone(&post.data.selftext) {
            return Err(unavailable("post removed or deleted".to_string()));
        }

        let comments = listings
            .get(1)
            .map(|l| {
                l.data
                    .children
                    .iter()
                    .map(|c| c.data.body.clone())
                    .filter(|body| !body.trim().is_empty() && !is_tombstone(body))
                    .take(self.max_comments)
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!(
            id = %post.data.id,
            title = %post.data.title,
            "fetched post content"
        );

        Ok(PostContent {
            id: post.data.id.clone(),
            title: post.data.title.clone(),
            body: post.data.selftext.clone(),
            comments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_detection() {
        assert!(is_tombstone("[removed]"));
        assert!(is_tombstone(" [deleted] "));
        assert!(!is_tombstone("a real comment"));
    }

    #[test]
    fn listing_parse_extracts_post_and_comments() {
        let json = r#"[
            {"data": {"children": [{"data": {"id": "x1", "title": "T", "selftext": "B"}}]}},
            {"data": {"children": [
                {"data": {"body": "first comment"}},
                {"data": {"body": "[removed]"}},
                {"data": {"body": "second comment"}}
            ]}}
        ]"#;
        let listings: Vec<Listing> = serde_json::from_str(json).unwrap();
        assert_eq!(listings[0].data.children[0].data.title, "T");
        assert_eq!(listings[1].data.children.len(), 3);
    }
}
