//! Remote content retrieval

use crate::cache::config::CacheConfig;
use crate::cache::key::CacheKey;
use crate::cache::types::Description;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// Source of descriptions, typically a remote web site
///
/// Implementations may be slow and may fail. Cancellation is handled by the
/// caller dropping the returned future, so implementations should only hold
/// resources that are released on drop.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<Description>;
}

/// Fetches `<base_url>/<key>` over HTTP and extracts the paragraphs of the
/// page's main content block
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    paragraph: Regex,
    tag: Regex,
}

impl HttpFetcher {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CacheError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            paragraph: Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p>")
                .map_err(|e| CacheError::ConfigError(e.to_string()))?,
            tag: Regex::new(r"(?s)<[^>]*>").map_err(|e| CacheError::ConfigError(e.to_string()))?,
        })
    }

    /// URL of the page describing `key`
    pub fn url_for(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.base_url, key)
    }

    /// Text of every `<p>` after the opening of the `main` block
    ///
    /// Falls back to the whole document when there is no `main` block.
    pub fn extract_paragraphs(&self, html: &str) -> Description {
        let body = html
            .find(r#"class="main""#)
            .map(|pos| &html[pos..])
            .unwrap_or(html);

        self.paragraph
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|inner| {
                let text = self.tag.replace_all(inner.as_str(), "");
                decode_entities(&text.split_whitespace().collect::<Vec<_>>().join(" "))
            })
            .filter(|text| !text.is_empty())
            .collect()
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<Description> {
        let url = self.url_for(key);
        debug!("Downloading description from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CacheError::fetch(key.as_str(), e))?;

        let html = response
            .text()
            .await
            .map_err(|e| CacheError::fetch(key.as_str(), e))?;

        Ok(self.extract_paragraphs(&html))
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_url_for_key() {
        let config = CacheConfig::builder().base_url("https://example.org/sports/").build();
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(
            fetcher.url_for(&CacheKey::from_name("Cycling Road")),
            "https://example.org/sports/cycling-road"
        );
    }

    #[test]
    fn test_extract_paragraphs_from_main_block() {
        let html = r#"
            <html><body>
              <p>Cookie banner</p>
              <div class="main">
                <p>Judo is a <b>martial art</b>.</p>
                <p class="lead">
                   It was   created in 1882.
                </p>
                <p>   </p>
                <p>Fish &amp; chips</p>
              </div>
            </body></html>
        "#;

        assert_eq!(
            fetcher().extract_paragraphs(html),
            vec![
                "Judo is a martial art.".to_string(),
                "It was created in 1882.".to_string(),
                "Fish & chips".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_without_main_block() {
        let html = "<p>One</p><pre>skip</pre><p>Two</p>";
        assert_eq!(fetcher().extract_paragraphs(html), vec!["One", "Two"]);
    }

    #[test]
    fn test_extract_ignores_similar_tags() {
        let html = "<param>x</param><p>Real</p>";
        assert_eq!(fetcher().extract_paragraphs(html), vec!["Real"]);
    }
}
