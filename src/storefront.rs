//! The storefront: every service wired to one database.

use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::domain::aggregates::ProductSheet;
use crate::domain::events::EventSink;
use crate::domain::value_objects::{AttributeKind, Identity, ItemId};
use crate::error::Result;
use crate::services::{
    AttributeRegistry, CartLedger, Checkout, CheckoutSummary, FieldSchema, Installer, ProductRegistry, SaleFinalizer, ValueResolver,
};

#[derive(Clone, Debug)]
pub struct Storefront {
    db: Database,
    schema: FieldSchema,
    attributes: AttributeRegistry,
    resolver: ValueResolver,
    products: ProductRegistry,
    cart: CartLedger,
    sales: SaleFinalizer,
    checkout: Checkout,
    installer: Installer,
}

impl Storefront {
    /// Wires the services together. Nothing is written until
    /// [`Installer::install`] runs.
    pub fn new(db: Database, attributes: AttributeRegistry, config: &Config, events: EventSink) -> Self {
        let schema = FieldSchema::new(db.clone(), events.clone());
        let cart = CartLedger::new(db.clone(), attributes.clone(), events.clone());
        Self {
            resolver: ValueResolver::new(db.clone()),
            products: ProductRegistry::new(db.clone(), events.clone()),
            sales: SaleFinalizer::new(db.clone(), events),
            checkout: Checkout::new(db.clone(), cart.clone(), &config.currency, &config.price_field),
            installer: Installer::new(db.clone(), schema.clone(), attributes.clone()),
            cart,
            schema,
            attributes,
            db,
        }
    }

    /// Connects, migrates, registers the standard attributes and installs
    /// the key fields.
    pub async fn open(config: &Config, events: EventSink) -> Result<Self> {
        let db = Database::connect(&config.database_url, config.max_connections).await?;
        Self::open_with(db, config, events).await
    }

    pub async fn open_with(db: Database, config: &Config, events: EventSink) -> Result<Self> {
        let attributes = AttributeRegistry::standard(&db)?;
        let storefront = Self::new(db, attributes, config, events);
        let created = storefront.installer.install().await?;
        info!(created, currency = %config.currency, "storefront ready");
        Ok(storefront)
    }

    pub fn database(&self) -> &Database { &self.db }
    pub fn schema(&self) -> &FieldSchema { &self.schema }
    pub fn attributes(&self) -> &AttributeRegistry { &self.attributes }
    pub fn resolver(&self) -> &ValueResolver { &self.resolver }
    pub fn products(&self) -> &ProductRegistry { &self.products }
    pub fn cart(&self) -> &CartLedger { &self.cart }
    pub fn sales(&self) -> &SaleFinalizer { &self.sales }
    pub fn checkout(&self) -> &Checkout { &self.checkout }
    pub fn installer(&self) -> &Installer { &self.installer }

    pub async fn checkout_summary(&self, identity: &Identity) -> Result<CheckoutSummary> {
        self.checkout.summary(identity).await
    }

    /// A product page: the item's name and its visible fields, split into
    /// what the shopper sees and what the shopper fills in.
    pub async fn product_sheet(&self, item_id: ItemId) -> Result<ProductSheet> {
        let name = self.products.name_of(item_id).await?;
        let input_ids = if self.attributes.is_registered(AttributeKind::Input) {
            self.attributes.fields_with(AttributeKind::Input).await?
        } else {
            Vec::new()
        };
        let (inputs, outputs): (Vec<_>, Vec<_>) =
            self.resolver.resolve_visible(item_id).await?.into_iter().partition(|f| input_ids.contains(&f.field.id));
        Ok(ProductSheet { item_id, name, outputs, inputs })
    }
}
