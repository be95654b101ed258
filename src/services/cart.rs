//! Cart ledger: open cart lines per identity.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::domain::aggregates::{Cart, CartLine, CartLineView, CartMetaEntry, CheckoutField, Field, Step};
use crate::domain::events::{CartEvent, DomainEvent, EventSink};
use crate::domain::value_objects::{AttributeKind, Identity, ItemId, LineId, Quantity};
use crate::error::{is_unique_violation, Result, StorefrontError};
use crate::services::attributes::{fields_with_in, AttributeRegistry};
use crate::services::products::item_in;
use crate::services::resolver::resolve_in;
use crate::services::schema::get_in;
use crate::services::snapshot::{CartMetaSnapshot, DirectValues};

const LINE_COLUMNS: &str = "c.line_id, c.identity_id, c.product_id, c.quantity, c.created_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LineRow {
    line_id: i64,
    identity_id: String,
    product_id: i64,
    quantity: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<LineRow> for CartLine {
    type Error = StorefrontError;

    fn try_from(row: LineRow) -> Result<Self> {
        Ok(CartLine {
            id: LineId::new(row.line_id),
            identity: parse_identity(&row.identity_id)?,
            product_id: ItemId::try_from(row.product_id)?,
            quantity: Quantity::from_stored(row.quantity),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ViewRow {
    #[sqlx(flatten)]
    line: LineRow,
    title: String,
}

/// Identities are stored in their `user:`/`guest:` text form.
pub(crate) fn parse_identity(raw: &str) -> Result<Identity> {
    raw.parse().map_err(|_| StorefrontError::Corrupt(format!("stored identity {raw:?} does not parse")))
}

#[derive(Clone, Debug)]
pub struct CartLedger {
    db: Database,
    snapshot: CartMetaSnapshot,
    attributes: AttributeRegistry,
    events: EventSink,
}

impl CartLedger {
    pub fn new(db: Database, attributes: AttributeRegistry, events: EventSink) -> Self {
        Self { db, snapshot: CartMetaSnapshot::new(attributes.clone()), attributes, events }
    }

    /// Opens a line with quantity one and freezes the product's field values
    /// onto it. A second add for the same identity and product is refused;
    /// callers increment the existing line instead.
    #[instrument(skip(self, direct))]
    pub async fn add(&self, identity: &Identity, product_id: ItemId, direct: &DirectValues) -> Result<CartLine> {
        let mut tx = self.db.begin_write().await?;
        let item = item_in(&mut tx, product_id).await?.ok_or(StorefrontError::ItemNotFound(product_id))?;
        if !item.is_product {
            return Err(StorefrontError::NotAProduct(product_id));
        }

        let created_at = Utc::now();
        let inserted = sqlx::query("INSERT INTO carts (identity_id, product_id, quantity, created_at) VALUES (?, ?, 1, ?)")
            .bind(identity.to_string())
            .bind(product_id.get())
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorefrontError::AlreadyInCart { identity: identity.clone(), product_id }
                } else {
                    e.into()
                }
            })?;
        let line_id = LineId::new(inserted.last_insert_rowid());
        self.snapshot.snapshot(&mut tx, line_id, product_id, direct).await?;
        tx.commit().await?;

        info!(line_id = %line_id, %identity, product = %product_id, "added {} to cart", item.title);
        self.events.emit(DomainEvent::Cart(CartEvent::LineAdded { line_id, identity: identity.clone(), product_id }));
        Ok(CartLine { id: line_id, identity: identity.clone(), product_id, quantity: Quantity::ONE, created_at })
    }

    /// Moves a line's quantity one step, never below zero. A line that
    /// reaches zero is swept in the same transaction.
    #[instrument(skip(self))]
    pub async fn increment(&self, line_id: LineId, step: Step) -> Result<Quantity> {
        let mut tx = self.db.begin_write().await?;
        let row: Option<(String, i64)> = sqlx::query_as(
            "UPDATE carts SET quantity = MAX(quantity + ?2, 0)
             WHERE line_id = ?1 AND quantity > 0
             RETURNING identity_id, quantity",
        )
        .bind(line_id.get())
        .bind(step.delta())
        .fetch_optional(&mut *tx)
        .await?;
        let (identity, quantity) = row.ok_or(StorefrontError::LineNotFound(line_id))?;
        let quantity = Quantity::from_stored(quantity);
        let swept = if quantity.is_zero() { sweep_in(&mut tx, Some(&parse_identity(&identity)?)).await? } else { 0 };
        tx.commit().await?;

        info!(line_id = %line_id, %quantity, "cart quantity changed");
        self.events.emit(DomainEvent::Cart(CartEvent::QuantityChanged { line_id, quantity }));
        if swept > 0 {
            self.events.emit(DomainEvent::Cart(CartEvent::Swept { lines: swept }));
        }
        Ok(quantity)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, line_id: LineId) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        let identity: Option<String> =
            sqlx::query_scalar("UPDATE carts SET quantity = 0 WHERE line_id = ? AND quantity > 0 RETURNING identity_id")
                .bind(line_id.get())
                .fetch_optional(&mut *tx)
                .await?;
        let identity = parse_identity(&identity.ok_or(StorefrontError::LineNotFound(line_id))?)?;
        let swept = sweep_in(&mut tx, Some(&identity)).await?;
        tx.commit().await?;

        info!(line_id = %line_id, %identity, "removed cart line");
        self.events.emit(DomainEvent::Cart(CartEvent::QuantityChanged { line_id, quantity: Quantity::default() }));
        self.events.emit(DomainEvent::Cart(CartEvent::Swept { lines: swept }));
        Ok(())
    }

    /// Deletes every line at quantity zero, with its meta, for one identity
    /// or for everyone. Returns the number of lines deleted.
    #[instrument(skip(self))]
    pub async fn sweep(&self, identity: Option<&Identity>) -> Result<u64> {
        let mut tx = self.db.begin_write().await?;
        let swept = sweep_in(&mut tx, identity).await?;
        tx.commit().await?;
        if swept > 0 {
            info!(lines = swept, "swept empty cart lines");
            self.events.emit(DomainEvent::Cart(CartEvent::Swept { lines: swept }));
        }
        Ok(swept)
    }

    /// The open cart of `identity`, oldest line first, with each line's
    /// "In Checkout" columns.
    pub async fn contents(&self, identity: &Identity) -> Result<Cart> {
        // One transaction so every line is read against the same state.
        let mut tx = self.db.pool().begin().await?;
        let sql = format!(
            "SELECT {LINE_COLUMNS}, i.title FROM carts c
             JOIN items i ON i.item_id = c.product_id
             WHERE c.identity_id = ? AND c.quantity > 0
             ORDER BY c.created_at, c.line_id"
        );
        let rows: Vec<ViewRow> = sqlx::query_as(&sql).bind(identity.to_string()).fetch_all(&mut *tx).await?;

        let columns = checkout_columns(&mut tx, &self.attributes).await?;
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let line = CartLine::try_from(row.line)?;
            let meta = line_meta_in(&mut tx, line.id).await?;
            let mut checkout_fields = Vec::new();
            for field in columns.iter().filter(|f| f.is_visible_to(line.product_id)) {
                let value = match meta.iter().find(|m| m.field_name == field.name) {
                    Some(entry) => entry.field_value.clone(),
                    None => resolve_in(&mut tx, &field.name, line.product_id).await?.to_string(),
                };
                checkout_fields.push(CheckoutField { name: field.name.clone(), value });
            }
            lines.push(CartLineView { line, product_name: row.title, checkout_fields });
        }
        tx.commit().await?;

        debug!(%identity, lines = lines.len(), "cart contents read");
        Ok(Cart::new(identity.clone(), lines))
    }

    /// Re-keys the open lines of `from` to `to`, typically when a guest
    /// logs in. A product both carts hold ends up as one line on `to` with
    /// the summed quantity and `to`'s frozen meta. Returns the number of
    /// lines moved or merged.
    #[instrument(skip(self))]
    pub async fn identity_migration(&self, from: &Identity, to: &Identity) -> Result<u64> {
        if from == to {
            return Ok(0);
        }
        let mut tx = self.db.begin_write().await?;
        let old_lines: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT line_id, product_id, quantity FROM carts WHERE identity_id = ? AND quantity > 0 ORDER BY line_id",
        )
        .bind(from.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let mut moved = 0;
        for (line_id, product_id, quantity) in old_lines {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT line_id FROM carts WHERE identity_id = ? AND product_id = ? AND quantity > 0")
                    .bind(to.to_string())
                    .bind(product_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            match existing {
                Some(target) => {
                    sqlx::query("UPDATE carts SET quantity = quantity + ? WHERE line_id = ?")
                        .bind(quantity)
                        .bind(target)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("UPDATE carts SET quantity = 0 WHERE line_id = ?").bind(line_id).execute(&mut *tx).await?;
                }
                None => {
                    sqlx::query("UPDATE carts SET identity_id = ? WHERE line_id = ?")
                        .bind(to.to_string())
                        .bind(line_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            moved += 1;
        }
        sweep_in(&mut tx, Some(from)).await?;
        tx.commit().await?;

        info!(%from, %to, lines = moved, "cart migrated to new identity");
        self.events.emit(DomainEvent::Cart(CartEvent::IdentityMigrated { from: from.clone(), to: to.clone(), lines: moved }));
        Ok(moved)
    }

    /// A single line, including one waiting to be swept.
    pub async fn line(&self, line_id: LineId) -> Result<CartLine> {
        let sql = format!("SELECT {LINE_COLUMNS} FROM carts c WHERE c.line_id = ?");
        let row: Option<LineRow> = sqlx::query_as(&sql).bind(line_id.get()).fetch_optional(self.db.pool()).await?;
        row.ok_or(StorefrontError::LineNotFound(line_id))?.try_into()
    }

    pub async fn line_meta(&self, line_id: LineId) -> Result<Vec<CartMetaEntry>> {
        self.line(line_id).await?;
        let mut conn = self.db.pool().acquire().await?;
        line_meta_in(&mut conn, line_id).await
    }
}

pub(crate) async fn line_meta_in(conn: &mut SqliteConnection, line_id: LineId) -> Result<Vec<CartMetaEntry>> {
    let entries: Vec<(String, String)> =
        sqlx::query_as("SELECT field_name, field_value FROM cart_meta WHERE line_id = ? ORDER BY meta_id")
            .bind(line_id.get())
            .fetch_all(&mut *conn)
            .await?;
    Ok(entries.into_iter().map(|(field_name, field_value)| CartMetaEntry { field_name, field_value }).collect())
}

pub(crate) async fn sweep_in(conn: &mut SqliteConnection, identity: Option<&Identity>) -> Result<u64> {
    let identity = identity.map(Identity::to_string);
    sqlx::query(
        "DELETE FROM cart_meta WHERE line_id IN
         (SELECT line_id FROM carts WHERE quantity = 0 AND (?1 IS NULL OR identity_id = ?1))",
    )
    .bind(identity.as_deref())
    .execute(&mut *conn)
    .await?;
    let deleted = sqlx::query("DELETE FROM carts WHERE quantity = 0 AND (?1 IS NULL OR identity_id = ?1)")
        .bind(identity.as_deref())
        .execute(&mut *conn)
        .await?;
    Ok(deleted.rows_affected())
}

/// Fields flagged "In Checkout", ascending by id.
async fn checkout_columns(conn: &mut SqliteConnection, attributes: &AttributeRegistry) -> Result<Vec<Field>> {
    if !attributes.is_registered(AttributeKind::InCheckout) {
        return Ok(Vec::new());
    }
    let mut fields = Vec::new();
    for id in fields_with_in(conn, AttributeKind::InCheckout).await? {
        fields.push(get_in(conn, id).await?);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{FieldAttribute, FieldScope};
    use crate::domain::value_objects::ValueKind;
    use crate::testing::{item, storefront};

    async fn meta_rows(shop: &crate::Storefront, line_id: LineId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM cart_meta WHERE line_id = ?")
            .bind(line_id.get())
            .fetch_one(shop.database().pool())
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_adds_conflict_as_already_in_cart() {
        let path = std::env::temp_dir().join(format!("storefront-{}.db", uuid::Uuid::new_v4().simple()));
        let db = Database::connect(&format!("sqlite://{}", path.display()), 4).await.unwrap();
        let shop = crate::Storefront::open_with(db, &crate::Config::default(), EventSink::default()).await.unwrap();
        let mug = item(&shop, 1, "Mug").await;
        let user = Identity::user(5);

        let adds = (0..4).map(|_| {
            let (shop, user) = (shop.clone(), user.clone());
            tokio::spawn(async move { shop.cart().add(&user, mug, &DirectValues::new()).await })
        });
        let mut results = Vec::new();
        for add in adds.collect::<Vec<_>>() {
            results.push(add.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(e, StorefrontError::AlreadyInCart { .. })));
        assert_eq!(shop.cart().contents(&user).await.unwrap().item_count(), 1);

        shop.database().pool().close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_second_add_is_rejected() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let user = Identity::user(7);
        shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();

        let err = shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap_err();
        assert!(matches!(err, StorefrontError::AlreadyInCart { .. }));
        let cart = shop.cart().contents(&user).await.unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total_quantity(), 1);

        // Another identity has its own cart.
        shop.cart().add(&Identity::user(8), mug, &DirectValues::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_requires_a_product() {
        let (shop, _events) = storefront().await;
        let page = ItemId::new(3).unwrap();
        shop.products().upsert_item(page, "About us").await.unwrap();
        let user = Identity::user(1);

        let err = shop.cart().add(&user, page, &DirectValues::new()).await.unwrap_err();
        assert!(matches!(err, StorefrontError::NotAProduct(_)));
        let err = shop.cart().add(&user, ItemId::new(404).unwrap(), &DirectValues::new()).await.unwrap_err();
        assert!(matches!(err, StorefrontError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_decrement_to_zero_sweeps_line_and_meta() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let user = Identity::user(1);
        let line = shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();
        assert_eq!(shop.cart().increment(line.id, Step::Up).await.unwrap(), Quantity::new(2));
        assert!(meta_rows(&shop, line.id).await > 0);

        assert_eq!(shop.cart().increment(line.id, Step::Down).await.unwrap(), Quantity::new(1));
        assert_eq!(shop.cart().increment(line.id, Step::Down).await.unwrap(), Quantity::default());

        assert!(matches!(shop.cart().line(line.id).await, Err(StorefrontError::LineNotFound(_))));
        assert_eq!(meta_rows(&shop, line.id).await, 0);
        assert!(matches!(shop.cart().increment(line.id, Step::Down).await, Err(StorefrontError::LineNotFound(_))));
        let sale_meta: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sale_meta").fetch_one(shop.database().pool()).await.unwrap();
        assert_eq!(sale_meta, 0);

        // The product can be added again afterwards.
        shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_then_sweep_is_idempotent() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let user = Identity::user(1);
        let line = shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();

        shop.cart().remove(line.id).await.unwrap();
        assert!(shop.cart().contents(&user).await.unwrap().is_empty());
        assert_eq!(meta_rows(&shop, line.id).await, 0);
        assert_eq!(shop.cart().sweep(None).await.unwrap(), 0);
        assert!(shop.cart().remove(line.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sweep_only_touches_pending_lines_of_identity() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let alice = Identity::user(1);
        let bob = Identity::user(2);
        let a = shop.cart().add(&alice, mug, &DirectValues::new()).await.unwrap();
        let b = shop.cart().add(&bob, mug, &DirectValues::new()).await.unwrap();
        // Park both lines at zero without going through the ledger.
        sqlx::query("UPDATE carts SET quantity = 0").execute(shop.database().pool()).await.unwrap();
        assert!(shop.cart().line(a.id).await.unwrap().is_pending_removal());

        assert_eq!(shop.cart().sweep(Some(&alice)).await.unwrap(), 1);
        assert!(shop.cart().line(a.id).await.is_err());
        assert!(shop.cart().line(b.id).await.is_ok());
        assert_eq!(shop.cart().sweep(None).await.unwrap(), 1);
        assert_eq!(shop.cart().sweep(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_contents_in_creation_order_with_checkout_columns() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let hat = item(&shop, 2, "Hat").await;
        let price = shop.schema().find_shared("Sale Price").await.unwrap().unwrap();
        shop.schema().update(price.id, FieldAttribute::Value, "4.50", Some(mug)).await.unwrap();
        let user = Identity::new_guest();
        shop.cart().add(&user, hat, &DirectValues::new()).await.unwrap();
        shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();

        // Later price changes do not reach lines already in the cart.
        shop.schema().update(price.id, FieldAttribute::Value, "6", Some(mug)).await.unwrap();

        let cart = shop.cart().contents(&user).await.unwrap();
        let names: Vec<&str> = cart.lines().iter().map(|l| l.product_name.as_str()).collect();
        assert_eq!(names, ["Hat", "Mug"]);
        assert_eq!(cart.line_for(mug).unwrap().checkout_value("Sale Price"), Some("4.5"));
        assert_eq!(cart.line_for(hat).unwrap().checkout_value("Sale Price"), Some(""));
    }

    #[tokio::test]
    async fn test_checkout_column_added_later_resolves_live() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let user = Identity::user(1);
        shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();

        let colour = shop.schema().declare("Colour", ValueKind::Text, FieldScope::Global, "Red").await.unwrap();
        shop.attributes().set(colour, AttributeKind::InCheckout, true).await.unwrap();

        let cart = shop.cart().contents(&user).await.unwrap();
        assert_eq!(cart.lines()[0].checkout_value("Colour"), Some("Red"));
    }

    #[tokio::test]
    async fn test_identity_migration_merges_quantities() {
        let (shop, mut events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let hat = item(&shop, 2, "Hat").await;
        let guest = Identity::new_guest();
        let user = Identity::user(9);

        let guest_mug = shop.cart().add(&guest, mug, &DirectValues::new()).await.unwrap();
        shop.cart().increment(guest_mug.id, Step::Up).await.unwrap();
        shop.cart().add(&guest, hat, &DirectValues::new()).await.unwrap();
        let user_mug = shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();

        assert_eq!(shop.cart().identity_migration(&guest, &user).await.unwrap(), 2);

        let cart = shop.cart().contents(&user).await.unwrap();
        assert_eq!(cart.item_count(), 2);
        let merged = cart.line_for(mug).unwrap();
        assert_eq!(merged.line.id, user_mug.id);
        assert_eq!(merged.line.quantity, Quantity::new(3));
        assert!(shop.cart().contents(&guest).await.unwrap().is_empty());
        assert_eq!(meta_rows(&shop, guest_mug.id).await, 0);

        let migrated = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, DomainEvent::Cart(CartEvent::IdentityMigrated { lines: 2, .. })));
        assert!(migrated);
    }
}
