//! Checkout summary: the open cart priced from its frozen meta.

use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use tracing::warn;

use crate::db::Database;
use crate::domain::value_objects::{Identity, ItemId, LineId, Money, Quantity};
use crate::error::{Result, StorefrontError};
use crate::services::cart::{line_meta_in, CartLedger};
use crate::services::resolver::resolve_in;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutLine {
    pub line_id: LineId,
    pub product_id: ItemId,
    pub name: String,
    pub quantity: Quantity,
    pub unit_price: Option<Money>,
    pub line_total: Option<Money>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckoutSummary {
    pub identity: Identity,
    pub currency: String,
    pub lines: Vec<CheckoutLine>,
    /// Sum of the lines that have a price.
    pub subtotal: Money,
}

#[derive(Clone, Debug)]
pub struct Checkout {
    db: Database,
    cart: CartLedger,
    currency: String,
    price_field: String,
}

impl Checkout {
    pub fn new(db: Database, cart: CartLedger, currency: &str, price_field: &str) -> Self {
        Self { db, cart, currency: currency.to_string(), price_field: price_field.to_string() }
    }

    pub fn price_field(&self) -> &str { &self.price_field }

    /// Prices each open line from the price field captured when it was
    /// added, or from the product's live value when nothing was captured.
    /// Lines without a usable price, or whose total cannot be represented,
    /// stay listed but add nothing to the subtotal.
    pub async fn summary(&self, identity: &Identity) -> Result<CheckoutSummary> {
        let cart = self.cart.contents(identity).await?;
        let mut conn = self.db.pool().acquire().await?;

        let mut subtotal = Money::zero(&self.currency);
        let mut lines = Vec::with_capacity(cart.item_count());
        for view in cart.lines() {
            let meta = line_meta_in(&mut conn, view.line.id).await?;
            let raw = match meta.iter().find(|m| m.field_name == self.price_field) {
                Some(entry) => entry.field_value.trim().to_string(),
                None => resolve_in(&mut conn, &self.price_field, view.line.product_id).await?.to_string(),
            };
            let unit_price = if raw.is_empty() {
                warn!(line_id = %view.line.id, field = %self.price_field, "line has no price; left out of subtotal");
                None
            } else {
                match Decimal::from_str(&raw) {
                    Ok(amount) => Some(Money::new(amount, &self.currency)),
                    Err(_) => {
                        warn!(line_id = %view.line.id, price = %raw, "unparseable price; line left out of subtotal");
                        None
                    }
                }
            };
            let line_total = match &unit_price {
                Some(price) => self.accumulate(&mut subtotal, price, view.line.quantity, view.line.id)?,
                None => None,
            };
            lines.push(CheckoutLine {
                line_id: view.line.id,
                product_id: view.line.product_id,
                name: view.product_name.clone(),
                quantity: view.line.quantity,
                unit_price,
                line_total,
            });
        }
        Ok(CheckoutSummary { identity: identity.clone(), currency: self.currency.clone(), lines, subtotal })
    }

    fn accumulate(&self, subtotal: &mut Money, price: &Money, quantity: Quantity, line_id: LineId) -> Result<Option<Money>> {
        let total = match price.multiply(quantity).and_then(|total| subtotal.add(&total).map(|sum| (total, sum))) {
            Ok((total, sum)) => {
                *subtotal = sum;
                total
            }
            Err(StorefrontError::AmountOverflow) => {
                warn!(%line_id, price = %price.amount(), %quantity, "line total overflows; left out of subtotal");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(Some(total))
    }
}
