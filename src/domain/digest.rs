//! Usage: Broadcast mail content (RSS headline digest + placeholder assistant note).

use crate::shared::error::{AppError, AppResult};
use rand::seq::SliceRandom;
use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;

pub(crate) const HEADLINE_LIMIT: usize = 5;

const PLACEHOLDER_SENTENCES: &[&str] = &[
    "Sunny skies expected today.",
    "Markets edged slightly higher this morning.",
    "Tip: Ctrl+Shift+V pastes without formatting.",
];

pub(crate) trait NewsSource {
    fn headlines(&self, limit: usize) -> impl Future<Output = AppResult<Vec<String>>> + Send;
}

#[derive(Debug, Clone)]
pub(crate) struct RssFeed {
    client: reqwest::Client,
    url: String,
}

impl RssFeed {
    pub(crate) fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl NewsSource for RssFeed {
    async fn headlines(&self, limit: usize) -> AppResult<Vec<String>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::new("HTTP_ERROR", format!("news feed request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::new(
                "HTTP_ERROR",
                format!("news feed returned status={}", status.as_u16()),
            ));
        }
        let xml = response
            .text()
            .await
            .map_err(|e| AppError::new("HTTP_ERROR", format!("news feed read failed: {e}")))?;
        Ok(parse_rss_titles(&xml, limit))
    }
}

static ITEM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<item\b[^>]*>(.*?)</item>").expect("rss item regex is valid")
});

static TITLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<title\b[^>]*>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</title>")
        .expect("rss title regex is valid")
});

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Titles of the first `limit` `<item>` entries, in feed order.
pub(crate) fn parse_rss_titles(xml: &str, limit: usize) -> Vec<String> {
    ITEM_REGEX
        .captures_iter(xml)
        .filter_map(|item| {
            let body = item.get(1)?.as_str();
            let title = TITLE_REGEX.captures(body)?;
            let text = title.get(1).or_else(|| title.get(2))?.as_str();
            let text = decode_entities(text.trim());
            (!text.is_empty()).then_some(text)
        })
        .take(limit)
        .collect()
}

pub(crate) fn placeholder_sentence() -> &'static str {
    PLACEHOLDER_SENTENCES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
}

pub(crate) fn compose_broadcast_body(headlines: &[String], note: &str) -> String {
    let digest = headlines
        .iter()
        .map(|title| format!("- {title}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Latest news:\n{digest}\n\nAssistant note:\n{note}")
}
