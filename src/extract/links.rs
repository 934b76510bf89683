use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

pub const DEFAULT_LINK_LIMIT: usize = 50;
const MAX_TEXT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundLink {
    pub href: String,
    pub text: String,
}

/// Anchors in document order, deduplicated by exact `href`. Scanning stops as
/// soon as `limit` links are collected.
pub fn extract(document: &Html, limit: usize) -> Vec<OutboundLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    if limit == 0 {
        return links;
    }

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let href = match anchor.value().attr("href") {
            Some(h) if !h.is_empty() => h,
            _ => continue,
        };
        if !seen.insert(href) {
            continue;
        }

        let text: String = anchor.text().collect::<String>();
        links.push(OutboundLink {
            href: href.to_string(),
            text: text.trim().chars().take(MAX_TEXT_CHARS).collect(),
        });

        if links.len() >= limit {
            break;
        }
    }

    links
}
