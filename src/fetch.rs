use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use encoding_rs::{CoderResult, Encoding, UTF_8};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::classify::is_facebook_url;

pub const DEFAULT_USER_AGENT: &str = "mmip-facebook-public-intel/0.1 (compliance-first)";
pub const DEFAULT_MAX_BYTES: usize = 2_000_000;
pub const DEFAULT_CONCURRENCY: usize = 10;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const MAX_REDIRECTS: usize = 10;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

const NOT_FACEBOOK: &str = "Not a Facebook URL";

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_bytes: DEFAULT_MAX_BYTES,
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

impl FetchConfig {
    /// Build the shared HTTP client. No cookies, no credentials.
    pub fn client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );

        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("Failed to create HTTP client")
    }
}

/// Transport metadata for one capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub final_url: String,
    pub status_code: u16,
    pub fetched_at_unix: i64,
    pub sha256: String,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    #[serde(flatten)]
    pub capture: CaptureMeta,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub error: String,
    pub input_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FetchOutcome {
    Fetched(FetchedPage),
    Rejected(Rejection),
}

/// Fetch a page only if it is publicly reachable without authentication.
/// Hosts outside the recognized domains are rejected before any request is made.
pub async fn fetch_public_html(
    client: &reqwest::Client,
    url: &str,
    config: &FetchConfig,
) -> Result<FetchOutcome> {
    if !is_facebook_url(url) {
        warn!(url = %url, "Refusing to fetch non-Facebook URL");
        return Ok(FetchOutcome::Rejected(Rejection {
            error: NOT_FACEBOOK.to_string(),
            input_url: url.to_string(),
        }));
    }

    fetch_with_retry(client, url, config)
        .await
        .map(FetchOutcome::Fetched)
}

/// Retry 429 and 5xx with exponential backoff. After `max_retries` the last
/// capture is returned as is.
async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    config: &FetchConfig,
) -> Result<FetchedPage> {
    let mut attempt = 0;
    loop {
        let page = fetch_once(client, url, config.max_bytes).await?;
        let status = page.capture.status_code;

        if !should_retry(status) || attempt >= config.max_retries {
            if !(200..300).contains(&status) {
                warn!(url = %url, status, "Non-success status, keeping capture");
            }
            return Ok(page);
        }

        let backoff = config.base_backoff * 2u32.pow(attempt);
        warn!(
            "HTTP {} on {} (attempt {}/{}), backing off {:.1}s",
            status,
            url,
            attempt + 1,
            config.max_retries,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

fn should_retry(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

async fn fetch_once(client: &reqwest::Client, url: &str, max_bytes: usize) -> Result<FetchedPage> {
    debug!(url = %url, "HTTP fetch starting");
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("HTTP request failed for {}", url))?;

    let final_url = response.url().to_string();
    let status_code = response.status().as_u16();
    let content_type = header_value(response.headers(), CONTENT_TYPE);
    let cache_control = header_value(response.headers(), CACHE_CONTROL);

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?
    {
        body.extend_from_slice(&chunk);
        if body.len() >= max_bytes {
            debug!(url = %url, max_bytes, "Body cap reached, dropping remainder");
            break;
        }
    }

    let encoding = charset_encoding(content_type.as_deref());
    let html = decode_capped(body, max_bytes, encoding);
    Ok(FetchedPage {
        capture: CaptureMeta {
            final_url,
            status_code,
            fetched_at_unix: Utc::now().timestamp(),
            sha256: sha256_hex(&html),
            content_type,
            cache_control,
        },
        html,
    })
}

fn header_value(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Encoding named by the `charset` parameter of a Content-Type value.
/// Missing or unknown labels fall back to UTF-8.
fn charset_encoding(content_type: Option<&str>) -> &'static Encoding {
    content_type
        .and_then(|ct| {
            ct.split(';').skip(1).find_map(|param| {
                let (name, value) = param.split_once('=')?;
                name.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"'))
            })
        })
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8)
}

/// Cut the body to `max_bytes` and decode it. An incomplete sequence at the
/// end (a character split by the cut) is dropped; invalid sequences elsewhere
/// become U+FFFD. A BOM overrides `encoding`.
pub fn decode_capped(mut bytes: Vec<u8>, max_bytes: usize, encoding: &'static Encoding) -> String {
    bytes.truncate(max_bytes);
    let mut decoder = encoding.new_decoder();
    let mut text = String::with_capacity(bytes.len());
    let mut src = bytes.as_slice();
    loop {
        // `last = false` keeps a trailing partial sequence buffered instead of replacing it.
        let (result, read, _) = decoder.decode_to_string(src, &mut text, false);
        src = &src[read..];
        match result {
            CoderResult::InputEmpty => return text,
            CoderResult::OutputFull => text.reserve(
                decoder
                    .max_utf8_buffer_length(src.len())
                    .unwrap_or(src.len())
                    .max(4),
            ),
        }
    }
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Fetch many URLs concurrently. Results come back in input order.
pub async fn fetch_many(
    client: &reqwest::Client,
    urls: Vec<String>,
    config: &FetchConfig,
    concurrency: usize,
) -> Result<Vec<(String, Result<FetchOutcome>)>> {
    let total = urls.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let config = Arc::new(config.clone());

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Workers send (index, url, outcome); the receive loop below reorders them.
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(usize, String, Result<FetchOutcome>)>(concurrency.max(1) * 2);

    for (idx, url) in urls.into_iter().enumerate() {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let config = Arc::clone(&config);
        let tx = tx.clone();

        tokio::spawn(async move {
            let outcome = match sem.acquire_owned().await {
                Ok(_permit) => fetch_public_html(&client, &url, &config).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = &outcome {
                warn!("Fetch failed for {}: {:#}", url, e);
            }
            let _ = tx.send((idx, url, outcome)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut results = Vec::with_capacity(total);
    let mut errors = 0usize;
    while let Some(item) = rx.recv().await {
        if !matches!(item.2, Ok(FetchOutcome::Fetched(_))) {
            errors += 1;
        }
        results.push(item);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} URLs ({} ok, {} failed or rejected)", total, total - errors, errors);

    results.sort_by_key(|(idx, _, _)| *idx);
    Ok(results
        .into_iter()
        .map(|(_, url, outcome)| (url, outcome))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const UTF8_HTML: &str = "text/html; charset=utf-8";

    /// Local HTTP server. The nth connection gets the nth canned
    /// `(status, content type, body)`; the last one repeats. Returns the URL
    /// and a request counter.
    async fn serve_sequence(responses: Vec<(u16, &'static str, Vec<u8>)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, content_type, body) = &responses[n.min(responses.len() - 1)];
                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\n\
                     Cache-Control: private, no-cache\r\nContent-Length: {}\r\n\
                     Connection: close\r\n\r\n",
                    status,
                    if *status == 200 { "OK" } else { "Error" },
                    content_type,
                    body.len(),
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/janedoe", addr), hits)
    }

    async fn serve(body: &'static str) -> String {
        serve_sequence(vec![(200, UTF8_HTML, body.as_bytes().to_vec())]).await.0
    }

    fn fast_retry(max_retries: u32) -> FetchConfig {
        FetchConfig {
            max_retries,
            base_backoff: Duration::from_millis(1),
            ..FetchConfig::default()
        }
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn decode_keeps_short_bodies() {
        assert_eq!(decode_capped(b"<html>".to_vec(), 100, UTF_8), "<html>");
    }

    #[test]
    fn decode_drops_split_char() {
        let bytes = "abé".as_bytes().to_vec(); // é is two bytes
        assert_eq!(decode_capped(bytes.clone(), 3, UTF_8), "ab");
        assert_eq!(decode_capped(bytes, 4, UTF_8), "abé");
    }

    #[test]
    fn decode_replaces_invalid_bytes() {
        assert_eq!(decode_capped(vec![b'a', 0xff, b'b'], 10, UTF_8), "a\u{fffd}b");
    }

    #[test]
    fn decode_drops_split_char_after_invalid_byte() {
        assert_eq!(decode_capped(vec![0xff, b'a', 0xc3], 10, UTF_8), "\u{fffd}a");
    }

    #[test]
    fn decode_uses_declared_charset() {
        let latin1 = charset_encoding(Some("text/html; charset=ISO-8859-1"));
        assert_eq!(decode_capped(b"Jos\xe9".to_vec(), 100, latin1), "José");
    }

    #[test]
    fn charset_from_content_type() {
        assert_eq!(charset_encoding(None), UTF_8);
        assert_eq!(charset_encoding(Some("text/html")), UTF_8);
        assert_eq!(charset_encoding(Some("text/html; charset=bogus")), UTF_8);
        assert_eq!(
            charset_encoding(Some("text/html; Charset=\"windows-1251\"")),
            encoding_rs::WINDOWS_1251
        );
        assert_eq!(
            charset_encoding(Some("text/html;charset=latin1")),
            encoding_rs::WINDOWS_1252
        );
    }

    #[test]
    fn sha256_of_empty() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn retryable_statuses() {
        assert!(should_retry(429));
        assert!(should_retry(503));
        assert!(!should_retry(200));
        assert!(!should_retry(404));
    }

    #[tokio::test]
    async fn rejects_before_network() {
        let client = FetchConfig::default().client().unwrap();
        let out = fetch_public_html(&client, "https://example.com/janedoe", &FetchConfig::default())
            .await
            .unwrap();
        assert_eq!(
            out,
            FetchOutcome::Rejected(Rejection {
                error: "Not a Facebook URL".into(),
                input_url: "https://example.com/janedoe".into(),
            })
        );
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["error"], "Not a Facebook URL");
        assert!(v.get("html").is_none());
    }

    #[tokio::test]
    async fn captures_body_and_headers() {
        let url = serve("<html><head><title>x</title></head></html>").await;
        let client = local_client();
        let page = fetch_once(&client, &url, DEFAULT_MAX_BYTES).await.unwrap();
        assert_eq!(page.capture.status_code, 200);
        assert_eq!(page.capture.final_url, url);
        assert_eq!(page.html, "<html><head><title>x</title></head></html>");
        assert_eq!(page.capture.sha256, sha256_hex(&page.html));
        assert_eq!(page.capture.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert_eq!(page.capture.cache_control.as_deref(), Some("private, no-cache"));
        assert!(page.capture.fetched_at_unix > 0);
    }

    #[tokio::test]
    async fn caps_body() {
        let url = serve("0123456789abcdef").await;
        let client = local_client();
        let page = fetch_once(&client, &url, 10).await.unwrap();
        assert_eq!(page.html, "0123456789");
        assert_eq!(page.capture.sha256, sha256_hex("0123456789"));
    }

    #[tokio::test]
    async fn decodes_latin1_capture() {
        let body = b"<meta property=\"og:title\" content=\"Jos\xe9\">".to_vec();
        let (url, _) = serve_sequence(vec![(200, "text/html; charset=iso-8859-1", body)]).await;
        let page = fetch_once(&local_client(), &url, DEFAULT_MAX_BYTES).await.unwrap();
        assert_eq!(page.html, "<meta property=\"og:title\" content=\"José\">");
        assert_eq!(page.capture.sha256, sha256_hex(&page.html));

        let signals = crate::extract::extract(&page.html, None);
        assert_eq!(signals.display_name.map(|d| d.value).as_deref(), Some("José"));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (url, hits) = serve_sequence(vec![
            (503, UTF8_HTML, b"busy".to_vec()),
            (503, UTF8_HTML, b"busy".to_vec()),
            (200, UTF8_HTML, b"ok".to_vec()),
        ])
        .await;
        let page = fetch_with_retry(&local_client(), &url, &fast_retry(3)).await.unwrap();
        assert_eq!(page.capture.status_code, 200);
        assert_eq!(page.html, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_capture_when_retries_run_out() {
        let (url, hits) = serve_sequence(vec![(503, UTF8_HTML, b"still busy".to_vec())]).await;
        let page = fetch_with_retry(&local_client(), &url, &fast_retry(2)).await.unwrap();
        assert_eq!(page.capture.status_code, 503);
        assert_eq!(page.html, "still busy");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve_sequence(vec![(404, UTF8_HTML, b"gone".to_vec())]).await;
        let page = fetch_with_retry(&local_client(), &url, &fast_retry(3)).await.unwrap();
        assert_eq!(page.capture.status_code, 404);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_many_keeps_input_order() {
        let client = FetchConfig::default().client().unwrap();
        let urls = vec![
            "https://example.com/a".to_string(),
            "ftp://nowhere/b".to_string(),
            "not a url".to_string(),
        ];
        let results = fetch_many(&client, urls.clone(), &FetchConfig::default(), 2)
            .await
            .unwrap();
        let got: Vec<&str> = results.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(got, urls.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(results
            .iter()
            .all(|(_, o)| matches!(o, Ok(FetchOutcome::Rejected(_)))));
    }
}
