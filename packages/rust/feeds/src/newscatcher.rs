//! Newscatcher search API fetcher.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use cryptfeed_shared::{
    CollectionName, CryptfeedError, ID_FIELD, NewscatcherConfig, Record, Result, resolve_secret,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{Fetcher, fetch_body};

/// Search response envelope. Articles are kept as raw JSON.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: String,
    #[serde(default)]
    articles: Vec<Value>,
}

/// Pulls recent articles matching a query from Newscatcher.
pub struct NewscatcherFetcher {
    client: Client,
    collection: CollectionName,
    endpoint: String,
    api_key_env: String,
    api_key: Option<String>,
    query: String,
    search_in: String,
    lookback_days: u32,
    lang: Option<String>,
    countries: Option<String>,
}

impl NewscatcherFetcher {
    /// Build from config. A missing API key is not an error here; the
    /// source fails on fetch instead so other sources still run.
    pub fn from_config(client: Client, config: &NewscatcherConfig) -> Result<Self> {
        let api_key = match resolve_secret(&config.api_key_env) {
            Ok(key) => Some(key),
            Err(_) => {
                warn!(env = %config.api_key_env, "Newscatcher API key not set");
                None
            }
        };

        Ok(Self {
            client,
            collection: CollectionName::new(config.collection.as_str())?,
            endpoint: format!("{}/api/search", config.base_url.trim_end_matches('/')),
            api_key_env: config.api_key_env.clone(),
            api_key,
            query: config.query.clone(),
            search_in: config.search_in.clone(),
            lookback_days: config.lookback_days,
            lang: non_blank(config.lang.as_deref()),
            countries: non_blank(config.countries.as_deref()),
        })
    }

    /// Use an explicit API key instead of the environment.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn from_date(&self) -> String {
        (Utc::now() - ChronoDuration::days(i64::from(self.lookback_days)))
            .format("%Y/%m/%d")
            .to_string()
    }
}

#[async_trait]
impl Fetcher for NewscatcherFetcher {
    fn name(&self) -> &str {
        "newscatcher"
    }

    fn collection(&self) -> &CollectionName {
        &self.collection
    }

    fn source_url(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip_all, fields(collection = %self.collection))]
    async fn fetch(&self) -> Result<Vec<Record>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            CryptfeedError::config(format!(
                "Newscatcher API key not found. Set the {} environment variable.",
                self.api_key_env
            ))
        })?;

        let from = self.from_date();
        let mut params = vec![
            ("q", self.query.as_str()),
            ("search_in", self.search_in.as_str()),
            ("sort_by", "date"),
            ("page", "1"),
            ("from_", from.as_str()),
            ("is_paid_content", "false"),
        ];
        if let Some(lang) = &self.lang {
            params.push(("lang", lang.as_str()));
        }
        if let Some(countries) = &self.countries {
            params.push(("countries", countries.as_str()));
        }

        let request = self
            .client
            .get(&self.endpoint)
            .header("x-api-token", api_key)
            .query(&params);

        let body = fetch_body(request, &self.endpoint).await?;
        let records = parse_search_response(&body)?;
        info!(articles = records.len(), "newscatcher search fetched");
        Ok(records)
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Map a search response onto records, using each article's `id` as identifier.
fn parse_search_response(body: &str) -> Result<Vec<Record>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| CryptfeedError::parse(format!("invalid Newscatcher response: {e}")))?;

    if response.status != "ok" {
        return Err(CryptfeedError::Network(format!(
            "Newscatcher returned status '{}'",
            response.status
        )));
    }

    let mut records = Vec::with_capacity(response.articles.len());
    for article in response.articles {
        let Value::Object(mut fields) = article else {
            warn!("skipping non-object article");
            continue;
        };
        let Some(id) = fields.remove("id") else {
            warn!(title = ?fields.get("title"), "skipping article without id");
            continue;
        };
        fields.insert(ID_FIELD.to_string(), id);
        match Record::try_from(fields) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "skipping article with unusable id"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(base_url: &str) -> NewscatcherConfig {
        NewscatcherConfig {
            base_url: base_url.to_string(),
            // Use a unique env var name to avoid interfering with other tests
            api_key_env: "CRYPTFEED_TEST_NONEXISTENT_NEWS_KEY".into(),
            ..NewscatcherConfig::default()
        }
    }

    #[test]
    fn maps_article_ids() {
        let body = r#"{
            "status": "ok",
            "articles": [
                {"id": "a1b2", "title": "DeFi TVL rebounds", "rank": 120, "media": null},
                {"id": 77, "title": "Numeric id"},
                {"title": "No id at all"},
                {"id": "", "title": "Blank id"},
                "not an object"
            ]
        }"#;
        let records = parse_search_response(body).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id().as_str(), "a1b2");
        assert_eq!(records[0].get("rank").unwrap(), 120);
        assert!(records[0].get("id").is_none());
        assert_eq!(records[1].id().as_str(), "77");
    }

    #[test]
    fn non_ok_status_is_an_error() {
        let err = parse_search_response(r#"{"status": "error", "articles": []}"#).unwrap_err();
        assert!(err.to_string().contains("status 'error'"));
        assert!(parse_search_response("not json").is_err());
    }

    #[test]
    fn from_date_uses_lookback() {
        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher = NewscatcherFetcher::from_config(client, &test_config("http://x")).unwrap();
        let expected = (Utc::now() - ChronoDuration::days(30)).format("%Y/%m/%d").to_string();
        assert_eq!(fetcher.from_date(), expected);
    }

    #[tokio::test]
    async fn missing_api_key_fails_fetch() {
        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher =
            NewscatcherFetcher::from_config(client, &test_config("http://127.0.0.1:9")).unwrap();
        let err = fetcher.fetch().await.unwrap_err();
        assert!(err.to_string().contains("CRYPTFEED_TEST_NONEXISTENT_NEWS_KEY"));
    }

    #[tokio::test]
    async fn fetches_search_results() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/search"))
            .and(wiremock::matchers::header("x-api-token", "test-key"))
            .and(wiremock::matchers::query_param("sort_by", "date"))
            .and(wiremock::matchers::query_param("q", "DeFi, Cryptocurrency, NFTs"))
            .and(wiremock::matchers::query_param_is_missing("lang"))
            .and(wiremock::matchers::query_param_is_missing("countries"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "articles": [{"id": "n-1", "title": "Stablecoin supply grows"}]
            })))
            .mount(&server)
            .await;

        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher = NewscatcherFetcher::from_config(client, &test_config(&server.uri()))
            .unwrap()
            .with_api_key("test-key");

        let records = fetcher.fetch().await.expect("fetch");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id().as_str(), "n-1");
        assert_eq!(fetcher.collection().as_str(), "newscatcher_news");
    }

    #[tokio::test]
    async fn sends_configured_language_and_country_filters() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/api/search"))
            .and(wiremock::matchers::query_param("lang", "en,de"))
            .and(wiremock::matchers::query_param("countries", "US, GB"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "articles": [{"id": "n-2", "title": "MiCA enforcement starts"}]
            })))
            .mount(&server)
            .await;

        let config = NewscatcherConfig {
            lang: Some("en,de".into()),
            countries: Some("US, GB".into()),
            ..test_config(&server.uri())
        };
        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher = NewscatcherFetcher::from_config(client, &config)
            .unwrap()
            .with_api_key("test-key");

        let records = fetcher.fetch().await.expect("fetch");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id().as_str(), "n-2");
    }

    #[tokio::test]
    async fn forbidden_is_a_fetch_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/api/search"))
            .respond_with(
                wiremock::ResponseTemplate::new(403).set_body_string(r#"{"message":"bad key"}"#),
            )
            .mount(&server)
            .await;

        let client = crate::http_client(Duration::from_secs(5)).unwrap();
        let fetcher = NewscatcherFetcher::from_config(client, &test_config(&server.uri()))
            .unwrap()
            .with_api_key("wrong");

        let err = fetcher.fetch().await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
