//! Source fetchers that turn upstream news into uniform [`Record`]s.
//!
//! This crate provides:
//! - [`Fetcher`]: the zero-argument "give me a batch" interface
//! - [`RssFetcher`]: RSS 2.0 feeds (rekt.news, crypto.news, ...)
//! - [`NewscatcherFetcher`]: the Newscatcher search API
//! - [`fetchers_from_config`]: the configured source list, in run order

mod feed;
mod ident;
mod newscatcher;

use std::time::Duration;

use async_trait::async_trait;
use cryptfeed_shared::{AppConfig, CollectionName, CryptfeedError, Record, Result};
use reqwest::{Client, RequestBuilder};
use tracing::warn;

pub use feed::RssFetcher;
pub use newscatcher::NewscatcherFetcher;

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("cryptfeed/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept from a source (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// A source of candidate records for one collection.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short human-readable source name.
    fn name(&self) -> &str;

    /// Collection this source feeds.
    fn collection(&self) -> &CollectionName;

    /// Where the source is fetched from, for display.
    fn source_url(&self) -> &str;

    /// Fetch the current batch. May be empty.
    async fn fetch(&self) -> Result<Vec<Record>>;
}

/// Build the shared HTTP client used by every fetcher.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(timeout)
        .build()
        .map_err(|e| CryptfeedError::Network(format!("failed to build HTTP client: {e}")))
}

/// Build every enabled source from config, in the order runs visit them:
/// RSS feeds as listed, then Newscatcher.
pub fn fetchers_from_config(config: &AppConfig, client: &Client) -> Result<Vec<Box<dyn Fetcher>>> {
    let mut fetchers: Vec<Box<dyn Fetcher>> = Vec::new();

    for feed in &config.feeds {
        let collection = CollectionName::new(feed.collection.as_str())?;
        fetchers.push(Box::new(RssFetcher::new(client.clone(), collection, &feed.url)));
    }

    if config.newscatcher.enabled {
        fetchers.push(Box::new(NewscatcherFetcher::from_config(
            client.clone(),
            &config.newscatcher,
        )?));
    }

    Ok(fetchers)
}

/// Send a request and return the body, rejecting non-2xx and oversized responses.
async fn fetch_body(request: RequestBuilder, url: &str) -> Result<String> {
    let mut response = request
        .send()
        .await
        .map_err(|e| CryptfeedError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 403 || status.as_u16() == 422 {
            warn!(%url, %status, body = %truncate(&body, 512), "source rejected request");
        }
        return Err(CryptfeedError::Network(format!("{url}: HTTP {status}")));
    }

    // Check content-length if available
    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(too_large(url, len));
        }
    }

    // Chunked responses carry no length, so count while reading.
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| CryptfeedError::Network(format!("{url}: failed to read body: {e}")))?
    {
        if (body.len() + chunk.len()) as u64 > MAX_RESPONSE_SIZE {
            return Err(too_large(url, body.len() + chunk.len()));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn too_large(url: &str, len: impl std::fmt::Display) -> CryptfeedError {
    CryptfeedError::validation(format!(
        "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
    ))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_sources_in_run_order() {
        let config = AppConfig::default();
        let client = http_client(Duration::from_secs(5)).unwrap();
        let fetchers = fetchers_from_config(&config, &client).expect("build fetchers");

        let names: Vec<&str> = fetchers.iter().map(|f| f.collection().as_str()).collect();
        assert_eq!(names, vec!["rekt_news", "crypto_news", "newscatcher_news"]);
        assert_eq!(fetchers[0].source_url(), "https://rekt.news/rss/feed.xml");
    }

    #[test]
    fn disabled_newscatcher_is_skipped() {
        let mut config = AppConfig::default();
        config.newscatcher.enabled = false;
        let client = http_client(Duration::from_secs(5)).unwrap();
        let fetchers = fetchers_from_config(&config, &client).unwrap();
        assert_eq!(fetchers.len(), 2);
    }

    #[test]
    fn bad_collection_name_fails_fast() {
        let mut config = AppConfig::default();
        config.feeds[0].collection = "bad name".into();
        let client = http_client(Duration::from_secs(5)).unwrap();
        assert!(fetchers_from_config(&config, &client).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn fetch_body_rejects_http_errors() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/missing"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = http_client(Duration::from_secs(5)).unwrap();
        let url = format!("{}/missing", server.uri());
        let err = fetch_body(client.get(&url), &url).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    /// Serve one response whose body is `chunks` chunks of `chunk_size` bytes,
    /// sent with chunked transfer encoding and no Content-Length.
    async fn serve_chunked(chunks: usize, chunk_size: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let head = "HTTP/1.1 200 OK\r\n\
                        Content-Type: application/rss+xml\r\n\
                        Transfer-Encoding: chunked\r\n\
                        Connection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let data = vec![b'x'; chunk_size];
            for _ in 0..chunks {
                let frame = format!("{chunk_size:x}\r\n");
                // The client hangs up once it has seen enough.
                if socket.write_all(frame.as_bytes()).await.is_err()
                    || socket.write_all(&data).await.is_err()
                    || socket.write_all(b"\r\n").await.is_err()
                {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });

        format!("http://{addr}/feed")
    }

    #[tokio::test]
    async fn fetch_body_bounds_chunked_responses() {
        let url = serve_chunked(12, 1024 * 1024).await;
        let client = http_client(Duration::from_secs(10)).unwrap();

        let err = fetch_body(client.get(&url), &url).await.unwrap_err();
        assert!(matches!(err, CryptfeedError::Validation { .. }), "{err}");
        assert!(err.to_string().contains("response too large"));
    }

    #[tokio::test]
    async fn fetch_body_reads_small_chunked_responses() {
        let url = serve_chunked(3, 1000).await;
        let client = http_client(Duration::from_secs(10)).unwrap();

        let body = fetch_body(client.get(&url), &url).await.expect("body");
        assert_eq!(body.len(), 3000);
    }
}
