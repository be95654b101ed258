//! Services
//!
//! Each service owns a handle to the database and does one job. Helpers
//! ending in `_in` run on a caller's connection so several services can
//! share one transaction.

pub mod attributes;
pub mod cart;
pub mod checkout;
pub mod install;
pub mod products;
pub mod resolver;
pub mod sales;
pub mod schema;
pub mod snapshot;

pub use attributes::{AttributeRegistry, AttributeRegistryBuilder};
pub use cart::CartLedger;
pub use checkout::{Checkout, CheckoutLine, CheckoutSummary};
pub use install::Installer;
pub use products::ProductRegistry;
pub use resolver::ValueResolver;
pub use sales::SaleFinalizer;
pub use schema::FieldSchema;
pub use snapshot::{CartMetaSnapshot, DirectValues};
