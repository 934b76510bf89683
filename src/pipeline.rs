use std::time::Instant;

use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::extract::extract_with_limit;
use crate::fetch::{self, CaptureMeta, FetchConfig, FetchOutcome, FetchedPage};
use crate::packet::{build_lead_packet, LeadPacket};

/// One URL run through fetch → extract → assemble.
#[derive(Debug, Clone, Serialize)]
pub struct Investigation {
    pub target_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet: Option<LeadPacket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Investigation {
    fn failed(target_url: &str, error: String) -> Self {
        Self {
            target_url: target_url.to_string(),
            capture: None,
            packet: None,
            error: Some(error),
        }
    }
}

/// Extract and assemble from a capture already in hand. The final URL after
/// redirects is echoed as the signals' base URL.
pub fn process_capture(target_url: &str, page: &FetchedPage, link_limit: usize) -> Investigation {
    let signals = extract_with_limit(&page.html, Some(&page.capture.final_url), link_limit);
    Investigation {
        target_url: target_url.to_string(),
        capture: Some(page.capture.clone()),
        packet: Some(build_lead_packet(target_url, &signals)),
        error: None,
    }
}

fn from_outcome(target_url: &str, outcome: Result<FetchOutcome>, link_limit: usize) -> Investigation {
    match outcome {
        Ok(FetchOutcome::Fetched(page)) => process_capture(target_url, &page, link_limit),
        Ok(FetchOutcome::Rejected(r)) => Investigation::failed(target_url, r.error),
        Err(e) => Investigation::failed(target_url, format!("{:#}", e)),
    }
}

pub async fn investigate(
    client: &reqwest::Client,
    url: &str,
    config: &FetchConfig,
    link_limit: usize,
) -> Investigation {
    let outcome = fetch::fetch_public_html(client, url, config).await;
    from_outcome(url, outcome, link_limit)
}

/// Two phases: fetch everything concurrently, then extract and assemble in
/// parallel. Output order matches `urls`.
pub async fn run_batch(
    client: &reqwest::Client,
    urls: Vec<String>,
    config: &FetchConfig,
    concurrency: usize,
    link_limit: usize,
) -> Result<Vec<Investigation>> {
    let t_fetch = Instant::now();
    info!("Batch: fetching {} URLs (concurrency {})", urls.len(), concurrency);
    let fetched = fetch::fetch_many(client, urls, config, concurrency).await?;
    info!("Fetched in {:.1}s", t_fetch.elapsed().as_secs_f64());

    let t_process = Instant::now();
    let investigations: Vec<Investigation> = fetched
        .into_par_iter()
        .map(|(url, outcome)| from_outcome(&url, outcome, link_limit))
        .collect();
    info!(
        "Assembled {} packets in {:.1}s",
        investigations.iter().filter(|i| i.packet.is_some()).count(),
        t_process.elapsed().as_secs_f64()
    );

    Ok(investigations)
}
