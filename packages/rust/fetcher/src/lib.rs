//! Chapter fetching through the public reddit JSON API.
//!
//! [`RedditFetcher`] is the [`ContentFetcher`] the raw store is filled
//! with. Requests are issued one at a time, each preceded by the configured
//! politeness delay.

mod thread;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use chaptersync_shared::{ContentFetcher, FetchedChapter, RedditConfig, Result, SyncError};

pub use thread::{PART_SEPARATOR, extract_chapter};

/// Maximum number of redirects to follow per request.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// RedditFetcher
// ---------------------------------------------------------------------------

/// Fetches a submission and its author's continuation replies.
#[derive(Debug, Clone)]
pub struct RedditFetcher {
    client: Client,
    api_base: Url,
    delay: Duration,
}

impl RedditFetcher {
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        let api_base = Url::parse(&config.api_base).map_err(|e| {
            SyncError::config(format!("invalid reddit api_base '{}': {e}", config.api_base))
        })?;

        Ok(Self {
            client,
            api_base,
            delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    /// The JSON endpoint serving the thread behind `chapter_url`.
    ///
    /// Only the path of the chapter URL is kept; it is re-rooted on the
    /// configured API base so that tests and mirrors can stand in for reddit.
    fn thread_endpoint(&self, chapter_url: &str) -> Result<Url> {
        let parsed = Url::parse(chapter_url)
            .map_err(|e| SyncError::fetch(chapter_url, format!("invalid chapter URL: {e}")))?;

        let path = parsed.path().trim_end_matches('/');
        if path.is_empty() {
            return Err(SyncError::fetch(chapter_url, "chapter URL has no path"));
        }

        let mut endpoint = self.api_base.clone();
        endpoint.set_path(&format!("{path}.json"));
        endpoint.set_query(Some("raw_json=1"));
        Ok(endpoint)
    }
}

impl ContentFetcher for RedditFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<FetchedChapter> {
        let endpoint = self.thread_endpoint(url)?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        debug!(%endpoint, "fetching thread");
        let response = self
            .client
            .get(endpoint.as_str())
            .send()
            .await
            .map_err(|e| SyncError::fetch(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::fetch(url, format!("HTTP {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SyncError::fetch(url, format!("malformed thread JSON: {e}")))?;

        let chapter = extract_chapter(&body).map_err(|msg| SyncError::fetch(url, msg))?;
        debug!(
            id = %chapter.id,
            revision = %chapter.revision,
            bytes = chapter.text.len(),
            "chapter fetched"
        );
        Ok(chapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaptersync_shared::Revision;

    const CHAPTER_URL: &str =
        "https://www.reddit.com/r/HFY/comments/bbb222/a_job_for_a_deathworlder_chapter_2/";

    fn fetcher(api_base: &str) -> RedditFetcher {
        RedditFetcher::new(&RedditConfig {
            api_base: api_base.to_string(),
            request_delay_ms: 0,
            ..RedditConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_reroots_chapter_path() {
        let f = fetcher("http://127.0.0.1:9999");
        let endpoint = f.thread_endpoint(CHAPTER_URL).unwrap();
        assert_eq!(
            endpoint.as_str(),
            "http://127.0.0.1:9999/r/HFY/comments/bbb222/a_job_for_a_deathworlder_chapter_2.json?raw_json=1"
        );
    }

    #[test]
    fn endpoint_rejects_bad_urls() {
        let f = fetcher("https://www.reddit.com");
        assert!(matches!(
            f.thread_endpoint("not a url").unwrap_err(),
            SyncError::Fetch { .. }
        ));
        assert!(f.thread_endpoint("https://www.reddit.com/").is_err());
    }

    #[tokio::test]
    async fn fetch_with_mock_server() {
        let server = wiremock::MockServer::start().await;
        let body = std::fs::read_to_string("../../../fixtures/reddit/thread.json")
            .expect("read thread fixture");

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(
                "/r/HFY/comments/bbb222/a_job_for_a_deathworlder_chapter_2.json",
            ))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(body, "application/json"),
            )
            .mount(&server)
            .await;

        let chapter = fetcher(&server.uri()).fetch(CHAPTER_URL).await.unwrap();
        assert_eq!(chapter.id, "bbb222");
        assert_eq!(chapter.title, "A Job for a Deathworlder - Chapter 2");
        assert_eq!(chapter.revision, Revision(1700003600));
        assert_eq!(chapter.text.matches(PART_SEPARATOR).count(), 1);
        assert!(chapter.text.ends_with("To be continued."));
    }

    #[tokio::test]
    async fn http_error_is_fetch_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(&server.uri()).fetch(CHAPTER_URL).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn malformed_json_is_fetch_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = fetcher(&server.uri()).fetch(CHAPTER_URL).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
