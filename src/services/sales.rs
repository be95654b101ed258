//! Sale finalization and the sales report.
//!
//! Finalizing turns every open line of an identity into a sale carrying a
//! frozen copy of the line's meta. It happens in one transaction: either
//! every line becomes a sale or the cart is left exactly as it was.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::domain::aggregates::{Sale, SaleMetaEntry};
use crate::domain::events::{DomainEvent, EventSink, SaleEvent};
use crate::domain::value_objects::{Identity, ItemId, Quantity, SaleId};
use crate::error::{Result, StorefrontError};
use crate::services::cart::{parse_identity, sweep_in};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    sale_id: i64,
    identity_id: String,
    product_id: i64,
    quantity: i64,
    sold_at: DateTime<Utc>,
}

impl TryFrom<SaleRow> for Sale {
    type Error = StorefrontError;

    fn try_from(row: SaleRow) -> Result<Self> {
        Ok(Sale {
            id: SaleId::new(row.sale_id),
            identity: parse_identity(&row.identity_id)?,
            product_id: ItemId::try_from(row.product_id)?,
            quantity: Quantity::from_stored(row.quantity),
            sold_at: row.sold_at,
            meta: Vec::new(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct SaleFinalizer {
    db: Database,
    events: EventSink,
}

impl SaleFinalizer {
    pub fn new(db: Database, events: EventSink) -> Self { Self { db, events } }

    /// Turns the open cart of `identity` into sales, oldest line first.
    /// Each sale takes the id of the line it came from.
    #[instrument(skip(self))]
    pub async fn finalize(&self, identity: &Identity) -> Result<Vec<Sale>> {
        let mut tx = self.db.begin_write().await?;
        let lines: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT line_id, product_id, quantity FROM carts
             WHERE identity_id = ? AND quantity > 0
             ORDER BY created_at, line_id",
        )
        .bind(identity.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let sold_at = Utc::now();
        let mut sales = Vec::with_capacity(lines.len());
        for (line_id, product_id, quantity) in lines {
            sqlx::query("INSERT INTO sales (sale_id, identity_id, product_id, quantity, sold_at) VALUES (?, ?, ?, ?, ?)")
                .bind(line_id)
                .bind(identity.to_string())
                .bind(product_id)
                .bind(quantity)
                .bind(sold_at)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO sale_meta (sale_id, field_name, field_value)
                 SELECT line_id, field_name, field_value FROM cart_meta WHERE line_id = ? ORDER BY meta_id",
            )
            .bind(line_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM cart_meta WHERE line_id = ?").bind(line_id).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM carts WHERE line_id = ?").bind(line_id).execute(&mut *tx).await?;

            let sale_id = SaleId::new(line_id);
            sales.push(Sale {
                id: sale_id,
                identity: identity.clone(),
                product_id: ItemId::try_from(product_id)?,
                quantity: Quantity::from_stored(quantity),
                sold_at,
                meta: sale_meta_in(&mut tx, sale_id).await?,
            });
        }
        let swept = sweep_in(&mut tx, Some(identity)).await?;
        tx.commit().await?;

        info!(%identity, sales = sales.len(), swept, "cart finalized");
        for sale in &sales {
            self.events.emit(DomainEvent::Sale(SaleEvent::Finalized {
                sale_id: sale.id,
                identity: sale.identity.clone(),
                product_id: sale.product_id,
                quantity: sale.quantity,
            }));
        }
        Ok(sales)
    }

    /// Every sale, or those of one identity, by id.
    pub async fn sales(&self, identity: Option<&Identity>) -> Result<Vec<Sale>> {
        let mut conn = self.db.pool().acquire().await?;
        let rows: Vec<SaleRow> = sqlx::query_as(
            "SELECT sale_id, identity_id, product_id, quantity, sold_at FROM sales
             WHERE ?1 IS NULL OR identity_id = ?1
             ORDER BY sale_id",
        )
        .bind(identity.map(Identity::to_string))
        .fetch_all(&mut *conn)
        .await?;

        let mut sales = Vec::with_capacity(rows.len());
        for row in rows {
            let mut sale = Sale::try_from(row)?;
            sale.meta = sale_meta_in(&mut conn, sale.id).await?;
            sales.push(sale);
        }
        debug!(sales = sales.len(), "sales read");
        Ok(sales)
    }

    pub async fn sale(&self, sale_id: SaleId) -> Result<Sale> {
        let mut conn = self.db.pool().acquire().await?;
        let row: Option<SaleRow> =
            sqlx::query_as("SELECT sale_id, identity_id, product_id, quantity, sold_at FROM sales WHERE sale_id = ?")
                .bind(sale_id.get())
                .fetch_optional(&mut *conn)
                .await?;
        let mut sale = Sale::try_from(row.ok_or(StorefrontError::SaleNotFound(sale_id))?)?;
        sale.meta = sale_meta_in(&mut conn, sale_id).await?;
        Ok(sale)
    }
}

async fn sale_meta_in(conn: &mut SqliteConnection, sale_id: SaleId) -> Result<Vec<SaleMetaEntry>> {
    let entries: Vec<(String, String)> =
        sqlx::query_as("SELECT field_name, field_value FROM sale_meta WHERE sale_id = ? ORDER BY meta_id")
            .bind(sale_id.get())
            .fetch_all(&mut *conn)
            .await?;
    Ok(entries.into_iter().map(|(field_name, field_value)| SaleMetaEntry { field_name, field_value }).collect())
}
