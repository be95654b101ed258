//! Sale Aggregate
//!
//! A sale is the frozen form of a cart line. Nothing updates a sale after
//! it is written.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::cart::CartMetaEntry;
use crate::domain::value_objects::{Identity, ItemId, Quantity, SaleId};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sale {
    pub id: SaleId,
    pub identity: Identity,
    pub product_id: ItemId,
    pub quantity: Quantity,
    pub sold_at: DateTime<Utc>,
    pub meta: Vec<SaleMetaEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SaleMetaEntry {
    pub field_name: String,
    pub field_value: String,
}

impl Sale {
    pub fn meta_value(&self, name: &str) -> Option<&str> {
        self.meta.iter().find(|m| m.field_name == name).map(|m| m.field_value.as_str())
    }
}

impl From<CartMetaEntry> for SaleMetaEntry {
    fn from(entry: CartMetaEntry) -> Self { Self { field_name: entry.field_name, field_value: entry.field_value } }
}

impl PartialEq<CartMetaEntry> for SaleMetaEntry {
    fn eq(&self, other: &CartMetaEntry) -> bool {
        self.field_name == other.field_name && self.field_value == other.field_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_meta_matches_cart_meta() {
        let cart_meta = CartMetaEntry { field_name: "Colour".into(), field_value: "Red".into() };
        let sale_meta = SaleMetaEntry::from(cart_meta.clone());
        assert_eq!(sale_meta, cart_meta);

        let sale = Sale {
            id: SaleId::new(1),
            identity: Identity::user(1),
            product_id: ItemId::new(2).unwrap(),
            quantity: Quantity::ONE,
            sold_at: Utc::now(),
            meta: vec![sale_meta],
        };
        assert_eq!(sale.meta_value("Colour"), Some("Red"));
        assert_eq!(sale.meta_value("Size"), None);
    }
}
