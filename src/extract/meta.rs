use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

static META_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").unwrap());

/// App-link URI schemes that embed a numeric id, scanned in this order.
static APP_LINK_PATTERNS: LazyLock<Vec<(IdKind, Regex)>> = LazyLock::new(|| {
    vec![
        (IdKind::Profile, Regex::new(r"fb://profile/(?P<id>\d+)").unwrap()),
        (IdKind::Page, Regex::new(r"fb://page/(?P<id>\d+)").unwrap()),
    ]
});

const APP_LINK_PREFIX: &str = "al:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Profile,
    Page,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Profile => "profile",
            IdKind::Page => "page",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericId {
    #[serde(rename = "type")]
    pub kind: IdKind,
    pub id: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSignals {
    pub meta: IndexMap<String, String>,
    pub numeric_ids: Vec<NumericId>,
}

/// Walk every `<meta>` in document order. Keys come from `property`, falling
/// back to `name`; a later tag with the same lowercased key overwrites the value
/// but keeps the key's original position.
pub fn extract(document: &Html) -> MetaSignals {
    let mut signals = MetaSignals::default();

    for tag in document.select(&META_SELECTOR) {
        let attrs = tag.value();
        let key = attrs
            .attr("property")
            .filter(|k| !k.is_empty())
            .or_else(|| attrs.attr("name").filter(|k| !k.is_empty()));
        let content = attrs.attr("content").filter(|c| !c.is_empty());
        let (Some(key), Some(content)) = (key, content) else {
            continue;
        };

        let key = key.to_lowercase();
        if key.starts_with(APP_LINK_PREFIX) {
            scan_app_link(&key, content, &mut signals.numeric_ids);
        }
        signals.meta.insert(key, content.trim().to_string());
    }

    signals
}

fn scan_app_link(key: &str, value: &str, out: &mut Vec<NumericId>) {
    for (kind, re) in APP_LINK_PATTERNS.iter() {
        if let Some(caps) = re.captures(value) {
            out.push(NumericId {
                kind: *kind,
                id: caps["id"].to_string(),
                source: format!("meta[{}]", key),
            });
        }
    }
}
