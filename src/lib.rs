//! OpenSASE Storefront
//!
//! Product field schema, cart ledger and sale records for a self-hosted
//! storefront sitting next to a CMS.
//!
//! ## Features
//! - Key, global and per-item fields with typed defaults and item overrides
//! - Capability flags ("Input", "In Checkout") on fields
//! - One open cart line per identity and product, with frozen field values
//! - Atomic finalization of carts into immutable sales
//! - Checkout totals and a sales report
//!
//! Every operation goes through a [`Storefront`], which wires the services
//! in [`services`] to one [`Database`].

pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod http;
pub mod services;
pub mod storefront;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use db::Database;
pub use domain::aggregates::{
    Cart, CartLine, CartLineView, CartMetaEntry, Field, FieldAttribute, FieldScope, Item, ProductSheet, ResolvedField, Sale,
    SaleMetaEntry, Step,
};
pub use domain::events::{DomainEvent, EventSink};
pub use domain::value_objects::{
    AttributeKind, FieldId, FieldValue, Identity, ItemId, LineId, Money, Quantity, SaleId, ValueKind,
};
pub use error::{Result, StorefrontError};
pub use services::{CheckoutSummary, DirectValues};
pub use storefront::Storefront;
