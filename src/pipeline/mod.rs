mod worker;

use std::sync::Arc;

use deadqueue::unlimited::Queue;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
pub use worker::ItemOutcome;
use worker::ItemWorker;

use crate::{
    config::PipelineSettings,
    fetcher::{FetchError, PageFetcher},
    helpers::shutdown::Shutdown,
    store::CatalogStore,
};

/// Errors that stop the whole run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not fetch lookup page: {0}")]
    Fetch(#[source] FetchError),

    #[error("could not update item {item_id}: {source}")]
    Persist {
        item_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker stopped unexpectedly: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("run cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub selected: usize,
    pub updated: usize,
    pub rows_affected: u64,
    pub nothing_found: usize,
    pub skipped: usize,
    pub failed: usize,
}
impl RunSummary {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Updated { rows } => {
                self.updated += 1;
                self.rows_affected += rows;
            }
            ItemOutcome::NothingFound => self.nothing_found += 1,
            ItemOutcome::SkippedEmptyKey => self.skipped += 1,
            ItemOutcome::FetchFailed | ItemOutcome::WriteFailed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: Self) {
        self.selected += other.selected;
        self.updated += other.updated;
        self.rows_affected += other.rows_affected;
        self.nothing_found += other.nothing_found;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Enriches every pending catalog item once.
pub struct Pipeline {
    store: Arc<dyn CatalogStore>,
    fetcher: Arc<dyn PageFetcher>,
    settings: PipelineSettings,
    shutdown: Shutdown,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        fetcher: Arc<dyn PageFetcher>,
        settings: PipelineSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            fetcher,
            settings,
            shutdown,
        }
    }

    /// Items are selected once up front. A failed selection is logged and
    /// treated as an empty run.
    ///
    /// Returns only after every worker has stopped. The first fatal error
    /// cancels the shared shutdown signal so the other workers finish their
    /// current page and stop.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let items = match self.store.pending_items().await {
            Ok(items) => items,
            Err(e) => {
                error!(?e, "Could not retrieve items");
                return Ok(RunSummary::default());
            }
        };

        let mut summary = RunSummary {
            selected: items.len(),
            ..Default::default()
        };
        info!(count = summary.selected, "Got pending items");
        if items.is_empty() {
            return Ok(summary);
        }

        let queue = Arc::new(Queue::new());
        for item in items {
            queue.push(item);
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.workers.clamp(1, summary.selected) {
            let worker = ItemWorker {
                store: Arc::clone(&self.store),
                fetcher: Arc::clone(&self.fetcher),
                continue_on_write_error: self.settings.continue_on_write_error,
                shutdown: self.shutdown.clone(),
            };
            let queue = Arc::clone(&queue);

            workers.spawn(
                async move { worker.drain(&queue).await }.instrument(info_span!("worker", id = worker_id)),
            );
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(PipelineError::from).and_then(|res| res) {
                Ok(partial) => summary.merge(partial),
                Err(PipelineError::Cancelled) => debug!("Worker cancelled"),
                Err(e) if failure.is_none() => {
                    self.shutdown.cancel();
                    failure = Some(e);
                }
                Err(e) => debug!(?e, "Worker failed after the run was stopped"),
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if self.shutdown.is_cancelled() {
            warn!(?summary, "Run cancelled");
            return Err(PipelineError::Cancelled);
        }

        info!(?summary, "Run finished");

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use super::*;
    use crate::catalog::{CatalogItem, LinkMetadata, LinkPatch, Service};

    const SPOTIFY: &str = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC";
    const DEEZER: &str = "https://www.deezer.com/track/3135556";
    const YOUTUBE: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10";

    enum Page {
        Hrefs(Vec<&'static str>),
        Timeout,
        SessionLost,
        /// Stops the run while the page is loading.
        Interrupted,
        /// Holds the page open until the run is cancelled.
        LoadsUntilCancelled,
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        pages: HashMap<String, Page>,
        calls: Mutex<Vec<String>>,
        shutdown: Shutdown,
        /// Pages given up after a cancel.
        released: AtomicUsize,
    }
    impl ScriptedFetcher {
        fn with(mut self, key: &str, page: Page) -> Self {
            self.pages.insert(key.to_string(), page);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_hrefs(&self, lookup_key: &str) -> Result<Vec<String>, FetchError> {
            self.calls.lock().expect("calls lock").push(lookup_key.to_string());

            match self.pages.get(lookup_key) {
                Some(Page::Hrefs(hrefs)) => Ok(hrefs.iter().map(ToString::to_string).collect()),
                Some(Page::Timeout) => Err(FetchError::Timeout(Duration::from_secs(60))),
                Some(Page::SessionLost) => {
                    Err(FetchError::Session(anyhow::anyhow!("connection refused")))
                }
                Some(Page::Interrupted) => {
                    self.shutdown.cancel();
                    Err(FetchError::Cancelled)
                }
                Some(Page::LoadsUntilCancelled) => {
                    self.shutdown.cancelled().await;
                    self.released.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Cancelled)
                }
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<CatalogItem>>,
        writes: Mutex<Vec<i64>>,
        fail_select: bool,
        fail_write: bool,
    }
    impl MemoryStore {
        fn with_rows(rows: Vec<CatalogItem>) -> Self {
            Self {
                rows: Mutex::new(rows),
                ..Default::default()
            }
        }

        fn row(&self, item_id: i64) -> CatalogItem {
            self.rows
                .lock()
                .expect("rows lock")
                .iter()
                .find(|r| r.item_id == item_id)
                .cloned()
                .expect("row should exist")
        }

        fn writes(&self) -> Vec<i64> {
            self.writes.lock().expect("writes lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl CatalogStore for MemoryStore {
        async fn pending_items(&self) -> anyhow::Result<Vec<CatalogItem>> {
            if self.fail_select {
                anyhow::bail!("relation \"items\" does not exist");
            }

            Ok(self
                .rows
                .lock()
                .expect("rows lock")
                .iter()
                .filter(|r| r.is_eligible())
                .cloned()
                .collect())
        }

        async fn apply_links(&self, item: &CatalogItem, patch: &LinkPatch) -> anyhow::Result<u64> {
            if self.fail_write {
                anyhow::bail!("connection reset");
            }
            self.writes.lock().expect("writes lock").push(item.item_id);

            let mut rows = self.rows.lock().expect("rows lock");
            let Some(row) = rows.iter_mut().find(|r| r.item_id == item.item_id) else {
                return Ok(0);
            };
            row.links.apply(patch);

            Ok(1)
        }
    }

    fn item(item_id: i64, lookup_key: &str) -> CatalogItem {
        CatalogItem {
            item_id,
            title: format!("Song {item_id}"),
            lookup_key: lookup_key.to_string(),
            ..Default::default()
        }
    }

    fn pipeline(
        store: &Arc<MemoryStore>,
        fetcher: &Arc<ScriptedFetcher>,
        settings: PipelineSettings,
    ) -> Pipeline {
        Pipeline::new(
            Arc::clone(store) as Arc<dyn CatalogStore>,
            Arc::clone(fetcher) as Arc<dyn PageFetcher>,
            settings,
            fetcher.shutdown.clone(),
        )
    }

    fn worker(store: &Arc<MemoryStore>, fetcher: &Arc<ScriptedFetcher>) -> ItemWorker {
        ItemWorker {
            store: Arc::clone(store) as Arc<dyn CatalogStore>,
            fetcher: Arc::clone(fetcher) as Arc<dyn PageFetcher>,
            continue_on_write_error: false,
            shutdown: fetcher.shutdown.clone(),
        }
    }

    #[tokio::test]
    async fn empty_lookup_key_is_skipped_without_fetch_or_write() {
        let store = Arc::new(MemoryStore::with_rows(vec![item(1, "")]));
        let fetcher = Arc::new(ScriptedFetcher::default());

        let outcome = worker(&store, &fetcher)
            .process(&item(1, ""))
            .await
            .expect("item should not abort the run");

        assert_eq!(outcome, ItemOutcome::SkippedEmptyKey);
        assert!(fetcher.calls().is_empty());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn enriches_pending_items_and_leaves_linked_ones_alone() {
        let mut linked = item(2, "linked");
        linked.links.youtube_url = "https://youtu.be/old".to_string();
        let store = Arc::new(MemoryStore::with_rows(vec![
            item(1, "abc123"),
            linked,
            item(3, ""),
        ]));
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("abc123", Page::Hrefs(vec![
                    "https://example.com/unrelated",
                    SPOTIFY,
                    DEEZER,
                    YOUTUBE,
                ]))
                .with("linked", Page::Hrefs(vec![SPOTIFY])),
        );

        let summary = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect("run should succeed");

        assert_eq!(
            summary,
            RunSummary {
                selected: 1,
                updated: 1,
                rows_affected: 1,
                ..Default::default()
            }
        );
        assert_eq!(fetcher.calls(), vec!["abc123".to_string()]);

        let links = store.row(1).links;
        assert_eq!(links.spotify_url, SPOTIFY);
        assert_eq!(links.spotify_id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(links.deezer_url, DEEZER);
        assert_eq!(links.deezer_id, "3135556");
        assert_eq!(links.youtube_url, YOUTUBE);
        assert_eq!(links.youtube_id, "dQw4w9WgXcQ");
        assert_eq!(links.id(Service::Tidal), "");

        assert_eq!(store.row(2).links.spotify_url, "");
    }

    #[tokio::test]
    async fn page_without_links_writes_nothing() {
        let store = Arc::new(MemoryStore::with_rows(vec![item(1, "abc123")]));
        let fetcher = Arc::new(ScriptedFetcher::default().with("abc123", Page::Hrefs(vec![])));

        let summary = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect("run should succeed");

        assert_eq!(summary.nothing_found, 1);
        assert_eq!(summary.rows_affected, 0);
        assert!(store.writes().is_empty());
        assert_eq!(store.row(1), item(1, "abc123"));
    }

    #[tokio::test]
    async fn stored_links_survive_a_partial_update() {
        let mut existing = item(1, "abc123");
        existing.links = LinkMetadata {
            deezer_url: DEEZER.to_string(),
            deezer_id: "3135556".to_string(),
            youtube_url: YOUTUBE.to_string(),
            youtube_id: "dQw4w9WgXcQ".to_string(),
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::with_rows(vec![existing.clone()]));
        let fetcher = Arc::new(ScriptedFetcher::default().with("abc123", Page::Hrefs(vec![SPOTIFY])));

        let outcome = worker(&store, &fetcher)
            .process(&existing)
            .await
            .expect("item should not abort the run");

        assert_eq!(outcome, ItemOutcome::Updated { rows: 1 });
        let links = store.row(1).links;
        assert_eq!(links.spotify_id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(links.deezer_url, DEEZER);
        assert_eq!(links.deezer_id, "3135556");
        assert_eq!(links.youtube_url, YOUTUBE);
        assert_eq!(links.youtube_id, "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn lost_browser_session_aborts_the_run() {
        let store = Arc::new(MemoryStore::with_rows(vec![
            item(1, "first"),
            item(2, "second"),
            item(3, "third"),
        ]));
        let fetcher = Arc::new(ScriptedFetcher::default().with("first", Page::SessionLost));

        let err = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect_err("run should abort");

        assert!(matches!(err, PipelineError::Fetch(FetchError::Session(_))));
        assert_eq!(fetcher.calls(), vec!["first".to_string()]);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn page_load_failure_only_fails_the_item() {
        let store = Arc::new(MemoryStore::with_rows(vec![item(1, "slow"), item(2, "fine")]));
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("slow", Page::Timeout)
                .with("fine", Page::Hrefs(vec![DEEZER])),
        );

        let summary = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect("run should succeed");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(store.writes(), vec![2]);
    }

    #[tokio::test]
    async fn write_failure_aborts_the_run_by_default() {
        let store = Arc::new(MemoryStore {
            fail_write: true,
            ..MemoryStore::with_rows(vec![item(1, "abc123"), item(2, "def456")])
        });
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("abc123", Page::Hrefs(vec![SPOTIFY]))
                .with("def456", Page::Hrefs(vec![SPOTIFY])),
        );

        let err = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect_err("run should abort");

        assert!(matches!(err, PipelineError::Persist { item_id: 1, .. }));
        assert_eq!(fetcher.calls(), vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn write_failure_can_be_skipped() {
        let store = Arc::new(MemoryStore {
            fail_write: true,
            ..MemoryStore::with_rows(vec![item(1, "abc123"), item(2, "def456")])
        });
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("abc123", Page::Hrefs(vec![SPOTIFY]))
                .with("def456", Page::Hrefs(vec![SPOTIFY])),
        );
        let settings = PipelineSettings {
            continue_on_write_error: true,
            ..Default::default()
        };

        let summary = pipeline(&store, &fetcher, settings)
            .run()
            .await
            .expect("run should succeed");

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.updated, 0);
    }

    #[tokio::test]
    async fn selection_failure_processes_nothing() {
        let store = Arc::new(MemoryStore {
            fail_select: true,
            ..MemoryStore::with_rows(vec![item(1, "abc123")])
        });
        let fetcher = Arc::new(ScriptedFetcher::default());

        let summary = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect("selection errors are not fatal");

        assert_eq!(summary, RunSummary::default());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_drain_every_item_once() {
        let rows = (1..=20).map(|i| item(i, &format!("key-{i}"))).collect();
        let store = Arc::new(MemoryStore::with_rows(rows));
        let fetcher = Arc::new((1..=20).fold(ScriptedFetcher::default(), |f, i| {
            f.with(&format!("key-{i}"), Page::Hrefs(vec![DEEZER]))
        }));
        let settings = PipelineSettings {
            workers: 4,
            ..Default::default()
        };

        let summary = pipeline(&store, &fetcher, settings)
            .run()
            .await
            .expect("run should succeed");

        assert_eq!(summary.selected, 20);
        assert_eq!(summary.updated, 20);

        let mut calls = fetcher.calls();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 20);
    }

    #[tokio::test]
    async fn interrupted_run_stops_taking_items() {
        let store = Arc::new(MemoryStore::with_rows(vec![
            item(1, "abc123"),
            item(2, "stop"),
            item(3, "def456"),
        ]));
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("abc123", Page::Hrefs(vec![SPOTIFY]))
                .with("stop", Page::Interrupted)
                .with("def456", Page::Hrefs(vec![DEEZER])),
        );

        let err = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect_err("run should be cancelled");

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(fetcher.calls(), vec!["abc123".to_string(), "stop".to_string()]);
        assert_eq!(store.writes(), vec![1]);
    }

    #[tokio::test]
    async fn cancel_before_start_fetches_nothing() {
        let store = Arc::new(MemoryStore::with_rows(vec![item(1, "abc123")]));
        let fetcher = Arc::new(ScriptedFetcher::default().with("abc123", Page::Hrefs(vec![SPOTIFY])));
        fetcher.shutdown.cancel();

        let err = pipeline(&store, &fetcher, PipelineSettings::default())
            .run()
            .await
            .expect_err("run should be cancelled");

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn fatal_error_stops_other_workers_and_waits_for_them() {
        let store = Arc::new(MemoryStore::with_rows(vec![
            item(1, "slow"),
            item(2, "broken"),
            item(3, "abc123"),
        ]));
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("slow", Page::LoadsUntilCancelled)
                .with("broken", Page::SessionLost)
                .with("abc123", Page::Hrefs(vec![SPOTIFY])),
        );
        let settings = PipelineSettings {
            workers: 2,
            ..Default::default()
        };

        let err = pipeline(&store, &fetcher, settings)
            .run()
            .await
            .expect_err("run should abort");

        assert!(matches!(err, PipelineError::Fetch(FetchError::Session(_))));
        assert_eq!(fetcher.released.load(Ordering::SeqCst), 1);
        let mut calls = fetcher.calls();
        calls.sort();
        assert_eq!(calls, vec!["broken".to_string(), "slow".to_string()]);
        assert!(store.writes().is_empty());
    }
}
