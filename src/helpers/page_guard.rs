use std::ops::Deref;

use chromiumoxide::Page;
use tracing::{debug, trace};

/// Closes the wrapped page when dropped.
///
/// `close` is the normal path. Dropping the guard without it, e.g. on an
/// early `?` return or when the task is aborted, closes the page from a
/// background task instead.
pub struct PageGuard {
    page: Option<Page>,
    url: String,
}
impl PageGuard {
    pub fn new<T: Into<String>>(page: Page, url: T) -> Self {
        Self {
            page: Some(page),
            url: url.into(),
        }
    }

    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            match page.close().await {
                Ok(()) => trace!(url = %self.url, "Page closed"),
                Err(e) => debug!(?e, url = %self.url, "Failed to close page"),
            }
        }
    }
}

impl Deref for PageGuard {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref().expect("Page should be open until the guard is consumed")
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let url = std::mem::take(&mut self.url);
        runtime.spawn(async move {
            if let Err(e) = page.close().await {
                debug!(?e, %url, "Failed to close dropped page");
            }
        });
    }
}
