use std::time::Duration;

use chromiumoxide::{error::CdpError, handler::HandlerConfig, Browser, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use tryhard::RetryPolicy;
use url::Url;

use super::{lookup_url, FetchError, PageFetcher};
use crate::{
    config::BrowserConfig,
    helpers::{page_guard::PageGuard, shutdown::Shutdown},
};

/// Anchors on the lookup page that point at streaming services.
const ANCHOR_SELECTOR: &str = "a.block";
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
/// CDP requests may outlive the page timeout by this much, so a slow page
/// is reported as a timeout rather than a failed request.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Fetches lookup pages through an already running browser, one page per
/// item.
pub struct BrowserFetcher {
    browser: Browser,
    handler_task: JoinHandle<()>,
    config: BrowserConfig,
    shutdown: Shutdown,
}

impl BrowserFetcher {
    #[tracing::instrument(skip_all, fields(url = config.control_url.as_str()))]
    pub async fn connect(config: BrowserConfig, shutdown: Shutdown) -> Result<Self, FetchError> {
        debug!("Connecting to browser");
        let (browser, mut handler) =
            Browser::connect_with_config(config.control_url.clone(), handler_config(&config))
                .await
                .map_err(|e| FetchError::Session(e.into()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(?e, "Browser connection error");
                }
            }
            debug!("Browser connection closed");
        });

        info!("Connected to browser");

        Ok(Self {
            browser,
            handler_task,
            config,
            shutdown,
        })
    }

    /// The page is closed before this returns, including when the run is
    /// cancelled mid-load.
    async fn load_hrefs(&self, target: &Url) -> Result<Vec<String>, FetchError> {
        if self.shutdown.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        trace!("Opening page");
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Session(e.into()))?;
        let page = PageGuard::new(page, target.as_str());

        let hrefs = tokio::select! {
            hrefs = read_anchor_hrefs(&page, target, self.config.page_timeout) => hrefs,
            () = self.shutdown.cancelled() => {
                debug!("Cancelled while loading page");
                Err(FetchError::Cancelled)
            }
        };

        page.close().await;

        hrefs
    }
}

#[async_trait::async_trait]
impl PageFetcher for BrowserFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch_hrefs(&self, lookup_key: &str) -> Result<Vec<String>, FetchError> {
        let target = lookup_url(&self.config.lookup_base, lookup_key)?;
        debug!(target = target.as_str(), "Fetching lookup page");

        let backoff = self.config.retry_backoff;
        let hrefs = tryhard::retry_fn(|| self.load_hrefs(&target))
            .retries(self.config.retries)
            .custom_backoff(move |attempt, err: &FetchError| retry_policy(attempt, err, backoff))
            .on_retry(|attempt, _next_delay, err| {
                let e = err.to_string();

                async move {
                    debug!(attempt, ?e, "Retrying page load");
                }
            })
            .await?;

        if hrefs.is_empty() {
            info!("No candidate links on lookup page");
        } else {
            debug!(count = hrefs.len(), "Collected candidate links");
        }

        Ok(hrefs)
    }
}

async fn read_anchor_hrefs(
    page: &Page,
    target: &Url,
    timeout: Duration,
) -> Result<Vec<String>, FetchError> {
    let loaded = tokio::time::timeout(timeout, async {
        page.goto(target.as_str()).await?.wait_for_navigation().await?;
        Ok::<_, CdpError>(())
    })
    .await;

    match loaded {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(FetchError::PageLoad(e.into())),
        Err(_) => return Err(FetchError::Timeout(timeout)),
    }
    trace!("Page loaded");

    let elements = page
        .find_elements(ANCHOR_SELECTOR)
        .await
        .map_err(|e| FetchError::PageLoad(e.into()))?;

    let mut reads = Vec::with_capacity(elements.len());
    for element in &elements {
        reads.push(element.property("href").await);
    }

    Ok(collect_hrefs(reads))
}

/// Keeps string hrefs in document order. Anchors whose property could not be
/// read, or is not a string, are skipped.
fn collect_hrefs<I>(reads: I) -> Vec<String>
where
    I: IntoIterator<Item = Result<Option<Value>, CdpError>>,
{
    reads
        .into_iter()
        .filter_map(|read| match read {
            Ok(Some(Value::String(href))) => Some(href),
            Ok(other) => {
                trace!(?other, "Skipping anchor without href");
                None
            }
            Err(e) => {
                debug!(?e, "Could not read anchor href");
                None
            }
        })
        .collect()
}

fn handler_config(config: &BrowserConfig) -> HandlerConfig {
    HandlerConfig {
        request_timeout: config.page_timeout + REQUEST_TIMEOUT_MARGIN,
        ..Default::default()
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// Exponential backoff for page-load failures. Anything else is returned to
/// the caller straight away.
fn retry_policy(attempt: u32, err: &FetchError, backoff: Duration) -> RetryPolicy {
    if !err.is_retryable() {
        return RetryPolicy::Break;
    }

    let exponent = attempt.saturating_sub(1).min(16);
    RetryPolicy::Delay(backoff.saturating_mul(1 << exponent).min(MAX_RETRY_DELAY))
}
