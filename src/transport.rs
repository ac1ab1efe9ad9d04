//! HTTP transport — form-driven page fetching with a response size guard.
//!
//! The records site exposes one search form; every page of a result set is
//! obtained by POSTing the same form data, either to the search endpoint
//! (first page) or to the URL discovered behind the next-page link
//! (subsequent pages). The fetcher is behind the [`PageFetcher`] trait so
//! walker tests can script responses without a network.

use std::collections::HashMap;

use url::Url;

use crate::config::{CrawlConfig, SiteConfig};
use crate::error::{Error, Result, TransportError};
use crate::types::{DateWindow, RawResponse};

/// Abstraction over result-page fetching, enabling testability.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page of results for `(category, window)`.
    ///
    /// `cursor` is `None` for the first page, or the opaque token discovered
    /// on the previous page.
    async fn fetch(
        &self,
        category: &str,
        window: DateWindow,
        cursor: Option<&str>,
    ) -> Result<RawResponse>;
}

/// Production [`PageFetcher`] that drives the site's search form over HTTP.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    search_url: Url,
    site: SiteConfig,
    max_response_bytes: u64,
}

impl HttpPageFetcher {
    /// Build a fetcher from the site and crawl configuration.
    pub fn new(site: &SiteConfig, crawl: &CrawlConfig) -> Result<Self> {
        let search_url = Url::parse(&site.search_url).map_err(|e| Error::Config {
            message: format!("search_url is not a valid URL: {e}"),
            key: Some("site.search_url".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(crawl.request_timeout)
            .user_agent(crawl.user_agent.clone())
            .build()
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;

        Ok(Self {
            client,
            search_url,
            site: site.clone(),
            max_response_bytes: crawl.max_response_bytes,
        })
    }

    /// Assemble the form fields for one `(category, window)` request.
    ///
    /// The same fields are re-submitted for every page of the result set;
    /// only the target URL changes as pagination proceeds.
    fn form_fields(&self, category: &str, window: DateWindow) -> HashMap<String, String> {
        let mut fields = self.site.static_fields.clone();
        fields.insert(self.site.category_field.clone(), category.to_string());
        fields.insert(
            self.site.from_field.clone(),
            window.from.format(&self.site.date_format).to_string(),
        );
        fields.insert(
            self.site.to_field.clone(),
            window
                .inclusive_to()
                .format(&self.site.date_format)
                .to_string(),
        );
        fields
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        category: &str,
        window: DateWindow,
        cursor: Option<&str>,
    ) -> Result<RawResponse> {
        let url = match cursor {
            Some(href) => Url::parse(href)
                .map_err(|e| Error::Transport(TransportError::InvalidCursor(e)))?,
            None => self.search_url.clone(),
        };

        let fields = self.form_fields(category, window);

        tracing::debug!(
            category = %category,
            window = %window,
            url = %url,
            "Fetching result page"
        );

        let response = self
            .client
            .post(url)
            .form(&fields)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(TransportError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            }));
        }

        // Reject oversized responses before buffering the body where the
        // server declares a length, and after reading otherwise.
        if let Some(len) = response.content_length()
            && len > self.max_response_bytes
        {
            return Err(Error::Transport(TransportError::ResponseTooLarge {
                actual: len,
                limit: self.max_response_bytes,
            }));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;

        if body.len() as u64 > self.max_response_bytes {
            return Err(Error::Transport(TransportError::ResponseTooLarge {
                actual: body.len() as u64,
                limit: self.max_response_bytes,
            }));
        }

        Ok(RawResponse {
            url: final_url,
            body,
        })
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
        )
    }

    #[test]
    fn form_fields_format_inclusive_dates() {
        let fetcher = HttpPageFetcher::new(&SiteConfig::default(), &CrawlConfig::default()).unwrap();
        let fields = fetcher.form_fields("CRM-M", window());

        assert_eq!(fields.get("ctype").map(String::as_str), Some("CRM-M"));
        assert_eq!(fields.get("dfrom").map(String::as_str), Some("01-01-2024"));
        // The half-open window [01, 11) covers the 1st through the 10th
        assert_eq!(fields.get("dto").map(String::as_str), Some("10-01-2024"));
        assert_eq!(fields.get("search_type").map(String::as_str), Some("J"));
    }

    #[test]
    fn bad_search_url_is_a_config_error() {
        let site = SiteConfig {
            search_url: "::not-a-url::".to_string(),
            ..SiteConfig::default()
        };
        let result = HttpPageFetcher::new(&site, &CrawlConfig::default());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn bad_cursor_is_an_invalid_cursor_error() {
        let fetcher = HttpPageFetcher::new(&SiteConfig::default(), &CrawlConfig::default()).unwrap();
        let result = fetcher
            .fetch("CRM-M", window(), Some("not a url at all"))
            .await;
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::InvalidCursor(_)))
        ));
    }
}
