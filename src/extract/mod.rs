pub mod links;
pub mod meta;

use html5ever::driver::ParseOpts;
use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use indexmap::IndexMap;
use scraper::{Html, HtmlTreeSink};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use links::{OutboundLink, DEFAULT_LINK_LIMIT};
pub use meta::{IdKind, MetaSignals, NumericId};

/// A value paired with the metadata key it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sourced {
    pub value: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractedSignals {
    #[serde(default)]
    pub meta: IndexMap<String, String>,
    #[serde(default)]
    pub numeric_ids: Vec<NumericId>,
    #[serde(default)]
    pub outbound_links: Vec<OutboundLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<Sourced>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Sourced>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<Sourced>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Parse with scripting disabled, so `<noscript>` children become elements
/// rather than raw text.
pub(crate) fn parse_document(html: &str) -> Html {
    let opts = ParseOpts {
        tree_builder: TreeBuilderOpts {
            scripting_enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    html5ever::parse_document(HtmlTreeSink::new(Html::new_document()), opts).one(html)
}

pub fn extract_meta(html: &str) -> MetaSignals {
    meta::extract(&parse_document(html))
}

pub fn extract_links(html: &str, limit: usize) -> Vec<OutboundLink> {
    links::extract(&parse_document(html), limit)
}

/// Extract signals from a captured page with the default link cap.
pub fn extract(html: &str, base_url: Option<&str>) -> ExtractedSignals {
    extract_with_limit(html, base_url, DEFAULT_LINK_LIMIT)
}

pub fn extract_with_limit(html: &str, base_url: Option<&str>, link_limit: usize) -> ExtractedSignals {
    let document = parse_document(html);
    let MetaSignals { meta, numeric_ids } = meta::extract(&document);
    let outbound_links = links::extract(&document, link_limit);

    debug!(
        meta = meta.len(),
        numeric_ids = numeric_ids.len(),
        links = outbound_links.len(),
        "Extracted signals"
    );

    ExtractedSignals {
        display_name: opengraph(&meta, "og:title"),
        description: opengraph(&meta, "og:description"),
        profile_image_url: opengraph(&meta, "og:image"),
        base_url: base_url.filter(|u| !u.is_empty()).map(str::to_string),
        meta,
        numeric_ids,
        outbound_links,
    }
}

fn opengraph(meta: &IndexMap<String, String>, key: &str) -> Option<Sourced> {
    meta.get(key).map(|value| Sourced {
        value: value.clone(),
        source: format!("opengraph:{}", key),
    })
}

// ── Tests ──
