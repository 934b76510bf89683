//! Public-content Facebook lead packets: classify a URL, extract signals from a
//! lawful HTML capture, and correlate both into a provenance-tagged packet.

pub mod classify;
pub mod extract;
pub mod fetch;
pub mod packet;
pub mod pipeline;

pub use classify::{classify as classify_url, EntityType, UrlClassification};
pub use extract::{extract as extract_signals, ExtractedSignals};
pub use fetch::{fetch_public_html, FetchConfig, FetchOutcome};
pub use packet::{build_lead_packet, build_packet, LeadPacket};
pub use pipeline::{investigate, run_batch, Investigation};
