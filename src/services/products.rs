//! Product registry: which CMS items exist and which of them are sellable.

use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::domain::aggregates::Item;
use crate::domain::events::{DomainEvent, EventSink, ProductEvent};
use crate::domain::value_objects::ItemId;
use crate::error::{Result, StorefrontError};

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    item_id: i64,
    title: String,
    is_product: bool,
}

impl TryFrom<ItemRow> for Item {
    type Error = StorefrontError;

    fn try_from(row: ItemRow) -> Result<Self> {
        Ok(Item { item_id: ItemId::try_from(row.item_id)?, title: row.title, is_product: row.is_product })
    }
}

#[derive(Clone, Debug)]
pub struct ProductRegistry {
    db: Database,
    events: EventSink,
}

impl ProductRegistry {
    pub fn new(db: Database, events: EventSink) -> Self { Self { db, events } }

    /// Records a CMS item, or retitles it. The product flag is left alone.
    #[instrument(skip(self))]
    pub async fn upsert_item(&self, item_id: ItemId, title: &str) -> Result<Item> {
        let row: ItemRow = sqlx::query_as(
            "INSERT INTO items (item_id, title) VALUES (?, ?)
             ON CONFLICT (item_id) DO UPDATE SET title = excluded.title
             RETURNING item_id, title, is_product",
        )
        .bind(item_id.get())
        .bind(title.trim())
        .fetch_one(self.db.pool())
        .await?;
        debug!(item = %item_id, "item synced");
        row.try_into()
    }

    pub async fn item(&self, item_id: ItemId) -> Result<Item> {
        let mut conn = self.db.pool().acquire().await?;
        item_in(&mut conn, item_id).await?.ok_or(StorefrontError::ItemNotFound(item_id))
    }

    pub async fn mark_product(&self, item_id: ItemId) -> Result<()> {
        self.set_flag(item_id, true).await
    }

    pub async fn unmark_product(&self, item_id: ItemId) -> Result<()> {
        self.set_flag(item_id, false).await
    }

    /// Unknown items are simply not products.
    pub async fn is_product(&self, item_id: ItemId) -> Result<bool> {
        let flag: Option<bool> = sqlx::query_scalar("SELECT is_product FROM items WHERE item_id = ?")
            .bind(item_id.get())
            .fetch_optional(self.db.pool())
            .await?;
        Ok(flag.unwrap_or(false))
    }

    pub async fn name_of(&self, item_id: ItemId) -> Result<String> {
        Ok(self.item(item_id).await?.title)
    }

    /// Every item flagged as a product, by id.
    pub async fn products(&self) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as("SELECT item_id, title, is_product FROM items WHERE is_product = 1 ORDER BY item_id")
            .fetch_all(self.db.pool())
            .await?;
        rows.into_iter().map(Item::try_from).collect()
    }

    async fn set_flag(&self, item_id: ItemId, on: bool) -> Result<()> {
        let result = sqlx::query("UPDATE items SET is_product = ?1 WHERE item_id = ?2 AND is_product != ?1")
            .bind(on)
            .bind(item_id.get())
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            // Either already in that state or not there at all.
            self.item(item_id).await?;
            return Ok(());
        }

        info!(item = %item_id, on, "product flag changed");
        let event = if on { ProductEvent::Marked { item_id } } else { ProductEvent::Unmarked { item_id } };
        self.events.emit(DomainEvent::Product(event));
        Ok(())
    }
}

pub(crate) async fn item_in(conn: &mut SqliteConnection, item_id: ItemId) -> Result<Option<Item>> {
    let row: Option<ItemRow> = sqlx::query_as("SELECT item_id, title, is_product FROM items WHERE item_id = ?")
        .bind(item_id.get())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Item::try_from).transpose()
}
