use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static FACEBOOK_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(www\.)?facebook\.com/(?P<path>.+)$").unwrap()
});

const CANONICAL_PREFIX: &str = "https://www.facebook.com/";

/// Short-link hosts that only ever serve videos.
const VIDEO_HOSTS: &[&str] = &["fb.watch"];

/// Hosts the fetch adapter is allowed to contact.
pub const RECOGNIZED_HOSTS: &[&str] = &["facebook.com", "fb.com", "fb.watch"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Unknown,
    Video,
    Profile,
    Post,
    PageOrProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlClassification {
    pub input_url: String,
    pub normalized_url: String,
    pub host: String,
    pub entity_type: EntityType,
    pub vanity: Option<String>,
    pub numeric_id: Option<String>,
    pub possible_post_id: Option<String>,
}

impl UrlClassification {
    fn unknown(url: &str, host: String) -> Self {
        Self {
            input_url: url.to_string(),
            normalized_url: url.to_string(),
            host,
            entity_type: EntityType::Unknown,
            vanity: None,
            numeric_id: None,
            possible_post_id: None,
        }
    }
}

struct PathRule {
    kind: EntityType,
    applies: fn(&str) -> bool,
}

/// Checked top to bottom against the canonical path; first match wins.
const PATH_RULES: &[PathRule] = &[
    PathRule { kind: EntityType::Profile, applies: is_profile_php },
    PathRule { kind: EntityType::Post, applies: has_posts_segment },
    PathRule { kind: EntityType::PageOrProfile, applies: has_first_segment },
];

fn is_profile_php(path: &str) -> bool {
    path.starts_with("profile.php")
}

fn has_posts_segment(path: &str) -> bool {
    path.contains("/posts/")
}

fn has_first_segment(path: &str) -> bool {
    first_segment(path).is_some()
}

/// Classify a Facebook URL for routing and evidence. Never fails: anything
/// unrecognized comes back as `EntityType::Unknown` with the input untouched.
pub fn classify(url: &str) -> UrlClassification {
    let trimmed = url.trim();
    let parsed = parse_lenient(trimmed);
    let host_name = parsed
        .as_ref()
        .and_then(|u| u.host_str())
        .unwrap_or("")
        .to_lowercase();
    let host = match parsed.as_ref().and_then(Url::port) {
        Some(port) => format!("{}:{}", host_name, port),
        None => host_name.clone(),
    };

    let mut result = UrlClassification::unknown(url, host);

    if VIDEO_HOSTS.iter().any(|d| host_matches(&host_name, d)) {
        result.entity_type = EntityType::Video;
        return result;
    }

    let Some(caps) = FACEBOOK_URL_RE.captures(trimmed) else {
        return result;
    };

    // The captured path keeps any query string, so profile.php?id=… survives normalization.
    let path = caps["path"].trim_matches('/');
    result.normalized_url = format!("{}{}", CANONICAL_PREFIX, path);

    let Some(rule) = PATH_RULES.iter().find(|r| (r.applies)(path)) else {
        return result;
    };
    result.entity_type = rule.kind;

    match rule.kind {
        EntityType::Profile => {
            result.numeric_id = parsed.as_ref().and_then(id_query_param);
        }
        EntityType::Post => {
            result.vanity = first_segment(path).map(str::to_string);
            result.possible_post_id = path
                .rsplit('/')
                .find(|seg| is_all_digits(seg))
                .map(str::to_string);
        }
        EntityType::PageOrProfile => {
            result.vanity = first_segment(path).map(str::to_string);
        }
        EntityType::Unknown | EntityType::Video => {}
    }

    result
}

/// Like `Url::parse`, but scheme-relative input (`//host/path`) is read as https
/// so its host still counts.
fn parse_lenient(url: &str) -> Option<Url> {
    match url.strip_prefix("//") {
        Some(rest) => Url::parse(&format!("https://{}", rest)).ok(),
        None => Url::parse(url).ok(),
    }
}

/// True when the URL's host is one of `RECOGNIZED_HOSTS` or a subdomain of one.
pub fn is_facebook_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    RECOGNIZED_HOSTS.iter().any(|d| host_matches(&host, d))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn first_segment(path: &str) -> Option<&str> {
    path.split('/').next().filter(|s| !s.is_empty())
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn id_query_param(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == "id" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}
