mod postgres;

pub use postgres::PgCatalogStore;

use crate::catalog::{CatalogItem, LinkPatch};

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Items that still need links, as of the moment of the call.
    async fn pending_items(&self) -> anyhow::Result<Vec<CatalogItem>>;

    /// Writes the fields present in `patch` to `item`'s row and returns the
    /// number of rows affected.
    async fn apply_links(&self, item: &CatalogItem, patch: &LinkPatch) -> anyhow::Result<u64>;
}
