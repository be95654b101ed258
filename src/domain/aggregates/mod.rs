//! Aggregates module
pub mod field;
pub mod product;
pub mod cart;
pub mod sale;

pub use field::{Field, FieldAttribute, FieldScope, ResolvedField};
pub use product::{Item, ProductSheet};
pub use cart::{Cart, CartLine, CartLineView, CartMetaEntry, CheckoutField, Step};
pub use sale::{Sale, SaleMetaEntry};
