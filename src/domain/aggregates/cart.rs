//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{FieldValue, Identity, ItemId, LineId, Quantity};

/// One product on one identity's open cart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CartLine {
    pub id: LineId,
    pub identity: Identity,
    pub product_id: ItemId,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
}

impl CartLine {
    /// A line at quantity zero is waiting for the next sweep.
    pub fn is_pending_removal(&self) -> bool { self.quantity.is_zero() }
}

/// A field value frozen onto a cart line when it was added.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMetaEntry {
    pub field_name: String,
    pub field_value: String,
}

/// One "In Checkout" column of a cart line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutField {
    pub name: String,
    pub value: String,
}

/// A cart line as rendered to the shopper.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CartLineView {
    pub line: CartLine,
    pub product_name: String,
    pub checkout_fields: Vec<CheckoutField>,
}

impl CartLineView {
    pub fn checkout_value(&self, name: &str) -> Option<&str> {
        self.checkout_fields.iter().find(|f| f.name == name).map(|f| f.value.as_str())
    }
}

/// Direction of a quantity change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Up,
    Down,
}

impl Step {
    pub fn delta(self) -> i64 {
        match self { Self::Up => 1, Self::Down => -1 }
    }
}

/// The open cart of one identity.
#[derive(Clone, Debug, Serialize)]
pub struct Cart {
    identity: Identity,
    lines: Vec<CartLineView>,
}

impl Cart {
    pub fn new(identity: Identity, lines: Vec<CartLineView>) -> Self { Self { identity, lines } }

    pub fn identity(&self) -> &Identity { &self.identity }
    pub fn lines(&self) -> &[CartLineView] { &self.lines }
    pub fn item_count(&self) -> usize { self.lines.len() }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|l| l.line.quantity.value()).sum()
    }

    pub fn line_for(&self, product_id: ItemId) -> Option<&CartLineView> {
        self.lines.iter().find(|l| l.line.product_id == product_id)
    }
}

impl CartMetaEntry {
    pub fn new(field_name: impl Into<String>, value: &FieldValue) -> Self {
        Self { field_name: field_name.into(), field_value: value.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn view(line: i64, product: i64, quantity: u32) -> CartLineView {
        CartLineView {
            line: CartLine {
                id: LineId::new(line),
                identity: Identity::user(1),
                product_id: ItemId::new(product).unwrap(),
                quantity: Quantity::new(quantity),
                created_at: Utc::now(),
            },
            product_name: format!("Product {product}"),
            checkout_fields: vec![CheckoutField { name: "Sale Price".into(), value: "5".into() }],
        }
    }

    #[test]
    fn test_cart_totals() {
        let cart = Cart::new(Identity::user(1), vec![view(1, 10, 2), view(2, 11, 3)]);
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.total_quantity(), 5);
        assert_eq!(cart.line_for(ItemId::new(11).unwrap()).unwrap().line.id, LineId::new(2));
        assert!(cart.line_for(ItemId::new(12).unwrap()).is_none());
        assert_eq!(cart.lines()[0].checkout_value("Sale Price"), Some("5"));
    }

    #[test]
    fn test_meta_entry_freezes_rendered_value() {
        let entry = CartMetaEntry::new("Sale Price", &FieldValue::Number(Decimal::new(1250, 2)));
        assert_eq!(entry.field_value, "12.50");
        assert_eq!(CartMetaEntry::new("Note", &FieldValue::Empty).field_value, "");
    }

    #[test]
    fn test_step_delta() {
        assert_eq!(Step::Up.delta(), 1);
        assert_eq!(Step::Down.delta(), -1);
    }
}
