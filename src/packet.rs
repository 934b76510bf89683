use serde::{Deserialize, Serialize};

use crate::classify::{classify, UrlClassification};
use crate::extract::{ExtractedSignals, IdKind, OutboundLink, Sourced};

pub const RECOMMENDED_FOLLOWUPS: [&str; 4] = [
    "Preserve the URL, HTML capture, and hash if time-sensitive.",
    "Submit a Meta preservation request referencing numeric IDs or vanity URL.",
    "Cross-pivot outbound links and display name across other social platforms.",
    "Request account records via legal process if authorized.",
];

pub const DISCLAIMER: &str = "OSINT derived from public Facebook content or investigator-provided capture. \
     No access controls bypassed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    FacebookVanity,
    FacebookNumericId,
    FacebookProfileId,
    FacebookPageId,
}

impl From<IdKind> for IdentifierType {
    fn from(kind: IdKind) -> Self {
        match kind {
            IdKind::Profile => IdentifierType::FacebookProfileId,
            IdKind::Page => IdentifierType::FacebookPageId,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: IdentifierType,
    pub value: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<Sourced>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Sourced>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<Sourced>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_links: Option<Vec<OutboundLink>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadPacket {
    pub target_url: String,
    pub normalized: UrlClassification,
    pub identifiers: Vec<Identifier>,
    pub public_profile_signals: ProfileSignals,
    pub recommended_followups: Vec<String>,
    pub disclaimer: String,
}

/// Classify `target_url` and correlate it with the extracted signals.
pub fn build_lead_packet(target_url: &str, signals: &ExtractedSignals) -> LeadPacket {
    build_packet(target_url, classify(target_url), signals)
}

/// Identifiers are appended URL-first, then in extraction order. Nothing is
/// deduplicated across sources: a vanity and a numeric id for the same entity
/// both stay.
pub fn build_packet(
    target_url: &str,
    classification: UrlClassification,
    signals: &ExtractedSignals,
) -> LeadPacket {
    let mut identifiers = Vec::new();

    if let Some(vanity) = classification.vanity.as_ref().filter(|v| !v.is_empty()) {
        identifiers.push(Identifier {
            kind: IdentifierType::FacebookVanity,
            value: vanity.clone(),
            source: "url".to_string(),
        });
    }

    if let Some(id) = classification.numeric_id.as_ref().filter(|v| !v.is_empty()) {
        identifiers.push(Identifier {
            kind: IdentifierType::FacebookNumericId,
            value: id.clone(),
            source: "url_query".to_string(),
        });
    }

    identifiers.extend(signals.numeric_ids.iter().map(|n| Identifier {
        kind: n.kind.into(),
        value: n.id.clone(),
        source: n.source.clone(),
    }));

    let public_profile_signals = ProfileSignals {
        display_name: signals.display_name.clone(),
        description: signals.description.clone(),
        profile_image_url: signals.profile_image_url.clone(),
        outbound_links: Some(signals.outbound_links.clone()).filter(|l| !l.is_empty()),
    };

    LeadPacket {
        target_url: target_url.to_string(),
        normalized: classification,
        identifiers,
        public_profile_signals,
        recommended_followups: RECOMMENDED_FOLLOWUPS.iter().map(|s| s.to_string()).collect(),
        disclaimer: DISCLAIMER.to_string(),
    }
}
