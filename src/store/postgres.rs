use anyhow::Context;
use once_cell::sync::Lazy;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, Postgres, QueryBuilder,
};
use tracing::{debug, trace};

use super::CatalogStore;
use crate::{
    catalog::{CatalogItem, LinkPatch, Service},
    links::matchers::MATCHERS,
};

const ITEM_COLUMNS: [&str; 5] = ["title", "album", "artist", "url", "acr_id"];

/// Selects eligible rows. The "already linked" check only covers services
/// with a registered matcher.
static PENDING_QUERY: Lazy<String> = Lazy::new(|| {
    let columns = ITEM_COLUMNS
        .into_iter()
        .chain(Service::ALL.into_iter().flat_map(|s| [s.url_column(), s.id_column()]))
        .map(|c| format!("COALESCE({c}, '') AS {c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let linked = MATCHERS
        .iter()
        .map(|m| format!("length({}) > 0", m.service().url_column()))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        "SELECT item_id::bigint AS item_id, {columns} FROM items WHERE deleted_at IS NULL AND \
         length(acr_id) > 0 AND ({linked}) IS NOT TRUE ORDER BY item_id"
    )
});

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}
impl PgCatalogStore {
    /// Builds the pool without connecting. Connection problems surface as
    /// errors from the first query.
    pub fn connect_lazy(options: PgConnectOptions, max_connections: u32) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);

        Self { pool }
    }
}

#[async_trait::async_trait]
impl CatalogStore for PgCatalogStore {
    #[tracing::instrument(skip(self))]
    async fn pending_items(&self) -> anyhow::Result<Vec<CatalogItem>> {
        trace!(query = PENDING_QUERY.as_str(), "Selecting pending items");
        let items = sqlx::query_as::<_, CatalogItem>(PENDING_QUERY.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Could not retrieve items from database")?
            .into_iter()
            .filter(CatalogItem::is_eligible)
            .collect::<Vec<_>>();

        debug!(count = items.len(), "Got pending items");

        Ok(items)
    }

    #[tracing::instrument(skip_all, fields(item = item.item_id))]
    async fn apply_links(&self, item: &CatalogItem, patch: &LinkPatch) -> anyhow::Result<u64> {
        let Some(mut query) = update_query(item.item_id, patch) else {
            trace!("Nothing to write");
            return Ok(0);
        };

        trace!(query = query.sql(), "Updating item");
        let result = query
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("Could not update item {}", item.item_id))?;

        Ok(result.rows_affected())
    }
}

fn update_query(item_id: i64, patch: &LinkPatch) -> Option<QueryBuilder<'_, Postgres>> {
    if patch.is_empty() {
        return None;
    }

    let mut query = QueryBuilder::new("UPDATE items SET updated_at = now()");
    for (column, value) in patch.assignments() {
        query.push(", ").push(column).push(" = ").push_bind(value);
    }
    query
        .push(" WHERE item_id = ")
        .push_bind(item_id)
        .push(" AND deleted_at IS NULL");

    Some(query)
}
