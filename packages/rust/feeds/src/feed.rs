//! RSS 2.0 feed fetcher.

use async_trait::async_trait;
use chrono::DateTime;
use cryptfeed_shared::{CollectionName, CryptfeedError, Record, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::ident::derive_article_id;
use crate::{Fetcher, fetch_body};

/// Fetches one RSS feed and maps its items onto records.
pub struct RssFetcher {
    client: Client,
    collection: CollectionName,
    url: String,
}

impl RssFetcher {
    pub fn new(client: Client, collection: CollectionName, url: impl Into<String>) -> Self {
        Self {
            client,
            collection,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    fn name(&self) -> &str {
        "rss"
    }

    fn collection(&self) -> &CollectionName {
        &self.collection
    }

    fn source_url(&self) -> &str {
        &self.url
    }

    #[instrument(skip_all, fields(collection = %self.collection, url = %self.url))]
    async fn fetch(&self) -> Result<Vec<Record>> {
        let body = fetch_body(self.client.get(&self.url), &self.url).await?;
        let records = parse_feed(&body, self.collection.as_str())?;
        info!(items = records.len(), "feed fetched");
        Ok(records)
    }
}

/// Parse an RSS document into records tagged with `source`.
pub(crate) fn parse_feed(xml: &str, source: &str) -> Result<Vec<Record>> {
    let channel = rss::Channel::read_from(xml.as_bytes())
        .map_err(|e| CryptfeedError::parse(format!("invalid RSS feed: {e}")))?;

    let records = channel
        .items()
        .iter()
        .filter_map(|item| {
            let record = item_to_record(item, source);
            if record.is_none() {
                debug!(title = ?item.title(), "skipping feed item without link or title");
            }
            record
        })
        .collect();

    Ok(records)
}

fn item_to_record(item: &rss::Item, source: &str) -> Option<Record> {
    let id = derive_article_id(
        item.guid().map(|g| g.value()),
        item.link(),
        item.title(),
    )?;

    let author = item.author().map(str::to_string).or_else(|| {
        item.dublin_core_ext()
            .and_then(|dc| dc.creators().first().cloned())
    });

    let tags: Vec<Value> = item
        .categories()
        .iter()
        .map(|c| Value::String(c.name().to_string()))
        .collect();

    let published_at = item
        .pub_date()
        .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
        .map(|dt| dt.to_rfc3339());

    Some(
        Record::new(id)
            .with("title", opt_string(item.title()))
            .with("link", opt_string(item.link()))
            .with("published", opt_string(item.pub_date()))
            .with("published_at", published_at.map_or(Value::Null, Value::String))
            .with("summary", opt_string(item.description()))
            .with("author", author.map_or(Value::Null, Value::String))
            .with("tags", Value::Array(tags))
            .with("image", opt_string(item_image(item)))
            .with("source", source),
    )
}

/// Enclosure URL, else the first `media:thumbnail` URL.
fn item_image(item: &rss::Item) -> Option<&str> {
    if let Some(enclosure) = item.enclosure() {
        return Some(enclosure.url());
    }
    item.extensions()
        .get("media")
        .and_then(|media| media.get("thumbnail"))
        .and_then(|thumbs| thumbs.first())
        .and_then(|thumb| thumb.attrs().get("url"))
        .map(String::as_str)
}

fn opt_string(s: Option<&str>) -> Value {
    s.map_or(Value::Null, |s| Value::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const REKT_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Rekt</title>
    <link>https://rekt.news/</link>
    <description>DeFi post-mortems</description>
    <item>
      <title>Euler Finance - REKT</title>
      <link>https://rekt.news/euler-rekt/</link>
      <pubDate>Mon, 13 Mar 2023 00:00:00 GMT</pubDate>
      <description>Euler got drained.</description>
      <enclosure url="https://rekt.news/img/euler.png" type="image/png" length="0"/>
    </item>
    <item>
      <title>Mango Markets - REKT</title>
      <link>https://rekt.news/mango-rekt/?utm_source=rss</link>
      <description>Oracle manipulation.</description>
    </item>
    <item>
      <description>No title, no link.</description>
    </item>
  </channel>
</rss>"#;

    const CRYPTO_NEWS_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>crypto.news</title>
    <link>https://crypto.news/</link>
    <description>News</description>
    <item>
      <title>Bitcoin ETF inflows climb</title>
      <link>https://crypto.news/bitcoin-etf-inflows/</link>
      <guid isPermaLink="false">https://crypto.news/?p=1001</guid>
      <dc:creator>Jane Doe</dc:creator>
      <category>Bitcoin</category>
      <category>ETF</category>
      <pubDate>Tue, 14 May 2024 10:30:00 +0000</pubDate>
      <description>Inflows rose for a third day.</description>
      <media:thumbnail url="https://crypto.news/img/etf.jpg"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rekt_items() {
        let records = parse_feed(REKT_FEED, "rekt_news").expect("parse");
        assert_eq!(records.len(), 2, "item without link or title is skipped");

        let euler = &records[0];
        assert_eq!(euler.get("title").unwrap(), "Euler Finance - REKT");
        assert_eq!(euler.get("image").unwrap(), "https://rekt.news/img/euler.png");
        assert_eq!(euler.get("source").unwrap(), "rekt_news");
        assert_eq!(
            euler.get("published_at").unwrap(),
            "2023-03-13T00:00:00+00:00"
        );
        assert_eq!(euler.id().as_str().len(), 64);

        let mango = &records[1];
        assert_eq!(mango.get("image").unwrap(), &Value::Null);
        assert_eq!(mango.get("published").unwrap(), &Value::Null);
        assert_ne!(mango.id(), euler.id());
    }

    #[test]
    fn link_ids_ignore_tracking_params() {
        let records = parse_feed(REKT_FEED, "rekt_news").unwrap();
        let expected = derive_article_id(None, Some("https://rekt.news/mango-rekt"), None).unwrap();
        assert_eq!(records[1].id(), &expected);
    }

    #[test]
    fn parses_crypto_news_extensions() {
        let records = parse_feed(CRYPTO_NEWS_FEED, "crypto_news").expect("parse");
        assert_eq!(records.len(), 1);

        let item = &records[0];
        assert_eq!(item.id().as_str(), "https://crypto.news/?p=1001");
        assert_eq!(item.get("author").unwrap(), "Jane Doe");
        assert_eq!(
            item.get("tags").unwrap(),
            &serde_json::json!(["Bitcoin", "ETF"])
        );
        assert_eq!(item.get("image").unwrap(), "https://crypto.news/img/etf.jpg");
    }

    #[test]
    fn rejects_non_rss() {
        let err = parse_feed("<html><body>nope</body></html>", "x").unwrap_err();
        assert!(err.to_string().contains("invalid RSS"));
    }

    #[tokio::test]
    async fn fetches_feed_over_http() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/rss/feed.xml"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(REKT_FEED),
            )
            .mount(&server)
            .await;

        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher = RssFetcher::new(
            client,
            CollectionName::new("rekt_news").unwrap(),
            format!("{}/rss/feed.xml", server.uri()),
        );

        let records = fetcher.fetch().await.expect("fetch");
        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.collection().as_str(), "rekt_news");
    }

    #[tokio::test]
    async fn server_error_is_a_fetch_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher = RssFetcher::new(
            client,
            CollectionName::new("crypto_news").unwrap(),
            format!("{}/feed/", server.uri()),
        );

        let err = fetcher.fetch().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
