use std::sync::Arc;

use deadqueue::unlimited::Queue;
use tracing::{debug, error, info, warn};

use super::{PipelineError, RunSummary};
use crate::{
    catalog::{CatalogItem, LinkPatch},
    fetcher::{FetchError, PageFetcher},
    helpers::shutdown::Shutdown,
    links::LinkSet,
    store::CatalogStore,
};

/// How processing of a single item ended, short of aborting the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Updated { rows: u64 },
    /// The page had no links for any registered service.
    NothingFound,
    SkippedEmptyKey,
    FetchFailed,
    WriteFailed,
}

pub(super) struct ItemWorker {
    pub(super) store: Arc<dyn CatalogStore>,
    pub(super) fetcher: Arc<dyn PageFetcher>,
    pub(super) continue_on_write_error: bool,
    pub(super) shutdown: Shutdown,
}

impl ItemWorker {
    /// Processes queued items until the queue is empty, the run is
    /// cancelled or a fatal error occurs.
    pub(super) async fn drain(&self, queue: &Queue<CatalogItem>) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        while !self.shutdown.is_cancelled() {
            let Some(item) = queue.try_pop() else {
                debug!(?summary, "Queue drained");
                return Ok(summary);
            };
            let outcome = self.process(&item).await?;
            summary.record(outcome);
        }
        debug!(?summary, "Stopped before the queue was drained");

        Ok(summary)
    }

    #[tracing::instrument(skip_all, fields(item = item.item_id, key = item.lookup_key.as_str()))]
    pub(super) async fn process(&self, item: &CatalogItem) -> Result<ItemOutcome, PipelineError> {
        if item.lookup_key.is_empty() {
            info!("Skip empty lookup key");
            return Ok(ItemOutcome::SkippedEmptyKey);
        }

        let hrefs = match self.fetcher.fetch_hrefs(&item.lookup_key).await {
            Ok(hrefs) => hrefs,
            Err(FetchError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) if e.is_fatal() => return Err(PipelineError::Fetch(e)),
            Err(e) => {
                warn!(?e, "Could not load lookup page");
                return Ok(ItemOutcome::FetchFailed);
            }
        };

        let links = LinkSet::from_hrefs(&hrefs);
        if links.is_empty() {
            info!(candidates = hrefs.len(), "No links found");
        } else {
            let services = links.iter().map(|(s, _)| s.to_string()).collect::<Vec<_>>();
            info!(found = links.len(), ?services, "Found links");
        }

        let patch = LinkPatch::from(&links);
        if patch.is_empty() {
            debug!("No links to store");
            return Ok(ItemOutcome::NothingFound);
        }

        match self.store.apply_links(item, &patch).await {
            Ok(rows) => {
                info!(rows, "Updated item");
                Ok(ItemOutcome::Updated { rows })
            }
            Err(e) if self.continue_on_write_error => {
                error!(?e, "Could not update item");
                Ok(ItemOutcome::WriteFailed)
            }
            Err(source) => Err(PipelineError::Persist {
                item_id: item.item_id,
                source,
            }),
        }
    }
}
