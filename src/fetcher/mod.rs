mod browser;

use std::time::Duration;

pub use browser::BrowserFetcher;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Characters left as-is when the lookup key is placed in the URL path.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The browser could not be reached or refused to open a page.
    #[error("browser session failed: {0}")]
    Session(#[source] anyhow::Error),

    #[error("page load timed out after {0:?}")]
    Timeout(Duration),

    #[error("page load failed: {0}")]
    PageLoad(#[source] anyhow::Error),

    #[error("invalid lookup URL: {0}")]
    InvalidTarget(#[from] url::ParseError),

    /// The run is shutting down. Any page opened for the attempt was closed.
    #[error("fetch cancelled")]
    Cancelled,
}
impl FetchError {
    /// No further item can be fetched after this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Session(_) | Self::Cancelled)
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::PageLoad(_))
    }
}

/// Loads the lookup page for a key and returns the candidate link hrefs on
/// it, in document order.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_hrefs(&self, lookup_key: &str) -> Result<Vec<String>, FetchError>;
}

pub fn lookup_url(base: &Url, lookup_key: &str) -> Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    let key = utf8_percent_encode(lookup_key, KEY_SEGMENT);

    Url::parse(&format!("{base}/{key}"))
}
