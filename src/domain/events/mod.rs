//! Domain events
//!
//! Services emit these on an optional channel. The binary forwards them to
//! NATS; tests read them straight off the receiver.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::value_objects::{FieldId, Identity, ItemId, LineId, Quantity, SaleId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Field(FieldEvent),
    Product(ProductEvent),
    Cart(CartEvent),
    Sale(SaleEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldEvent {
    Declared { field_id: FieldId, name: String },
    Updated { field_id: FieldId, item_id: Option<ItemId> },
    Deleted { field_id: FieldId, name: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Marked { item_id: ItemId },
    Unmarked { item_id: ItemId },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    LineAdded { line_id: LineId, identity: Identity, product_id: ItemId },
    QuantityChanged { line_id: LineId, quantity: Quantity },
    Swept { lines: u64 },
    IdentityMigrated { from: Identity, to: Identity, lines: u64 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaleEvent {
    Finalized { sale_id: SaleId, identity: Identity, product_id: ItemId, quantity: Quantity },
}

impl DomainEvent {
    /// NATS subject suffix, e.g. `sale.finalized`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Field(FieldEvent::Declared { .. }) => "field.declared",
            Self::Field(FieldEvent::Updated { .. }) => "field.updated",
            Self::Field(FieldEvent::Deleted { .. }) => "field.deleted",
            Self::Product(ProductEvent::Marked { .. }) => "product.marked",
            Self::Product(ProductEvent::Unmarked { .. }) => "product.unmarked",
            Self::Cart(CartEvent::LineAdded { .. }) => "cart.line_added",
            Self::Cart(CartEvent::QuantityChanged { .. }) => "cart.quantity_changed",
            Self::Cart(CartEvent::Swept { .. }) => "cart.swept",
            Self::Cart(CartEvent::IdentityMigrated { .. }) => "cart.identity_migrated",
            Self::Sale(SaleEvent::Finalized { .. }) => "sale.finalized",
        }
    }
}

/// Where services send events. Cloning is cheap; a sink without a channel
/// drops everything.
#[derive(Clone, Debug, Default)]
pub struct EventSink(Option<mpsc::UnboundedSender<DomainEvent>>);

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(Some(tx)), rx)
    }

    /// True while something can still receive what this sink emits.
    pub fn is_connected(&self) -> bool { self.0.as_ref().is_some_and(|tx| !tx.is_closed()) }

    pub fn emit(&self, event: DomainEvent) {
        if let Some(tx) = &self.0 {
            if tx.send(event).is_err() {
                tracing::debug!("event receiver dropped");
            }
        }
    }
}
