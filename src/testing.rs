//! Fixtures shared by the unit tests.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;
use crate::db::Database;
use crate::domain::events::{DomainEvent, EventSink};
use crate::domain::value_objects::ItemId;
use crate::storefront::Storefront;

/// A fresh installed storefront on a private in-memory database, with the
/// receiving end of its event channel.
pub(crate) async fn storefront() -> (Storefront, UnboundedReceiver<DomainEvent>) {
    let db = Database::in_memory().await.expect("in-memory database");
    let (events, rx) = EventSink::channel();
    let shop = Storefront::open_with(db, &Config::default(), events).await.expect("storefront opens");
    (shop, rx)
}

/// Syncs an item and flags it as a product.
pub(crate) async fn item(shop: &Storefront, id: i64, title: &str) -> ItemId {
    let item_id = ItemId::new(id).expect("positive item id");
    shop.products().upsert_item(item_id, title).await.expect("item upserted");
    shop.products().mark_product(item_id).await.expect("item marked");
    item_id
}
