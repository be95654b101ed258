//! Installs the fields every storefront starts with.

use tracing::{info, instrument, warn};

use crate::db::Database;
use crate::domain::aggregates::FieldScope;
use crate::domain::value_objects::{AttributeKind, ValueKind};
use crate::error::Result;
use crate::services::attributes::AttributeRegistry;
use crate::services::schema::FieldSchema;

struct KeyField {
    name: &'static str,
    kind: ValueKind,
    in_checkout: bool,
}

const KEY_FIELDS: [KeyField; 2] = [
    KeyField { name: "Regular Price", kind: ValueKind::Number, in_checkout: false },
    KeyField { name: "Sale Price", kind: ValueKind::Number, in_checkout: true },
];

#[derive(Clone, Debug)]
pub struct Installer {
    db: Database,
    schema: FieldSchema,
    attributes: AttributeRegistry,
}

impl Installer {
    pub fn new(db: Database, schema: FieldSchema, attributes: AttributeRegistry) -> Self {
        Self { db, schema, attributes }
    }

    /// Declares any missing key field. Safe to run on every start; returns
    /// how many fields were created.
    #[instrument(skip(self))]
    pub async fn install(&self) -> Result<usize> {
        let mut created = 0;
        for key in &KEY_FIELDS {
            let id = match self.schema.find_shared(key.name).await? {
                Some(field) => {
                    if field.scope != FieldScope::Key {
                        warn!(field_id = %field.id, "{} exists as a {} field", key.name, field.scope);
                    }
                    field.id
                }
                None => {
                    created += 1;
                    self.schema.declare(key.name, key.kind, FieldScope::Key, "").await?
                }
            };
            if key.in_checkout && self.attributes.is_registered(AttributeKind::InCheckout) {
                self.attributes.set(id, AttributeKind::InCheckout, true).await?;
            }
        }
        if created > 0 {
            info!(created, "key fields installed");
        }
        Ok(created)
    }

    /// Wipes every field, override, cart and sale, unflags all products and
    /// installs again. Item titles are kept.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        for table in ["sale_meta", "sales", "cart_meta", "carts", "item_overrides", "field_attributes", "fields"] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
        }
        sqlx::query("UPDATE items SET is_product = 0").execute(&mut *tx).await?;
        tx.commit().await?;
        warn!("storefront data reset");
        self.install().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{FieldValue, Identity};
    use crate::services::snapshot::DirectValues;
    use crate::testing::{item, storefront};

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let (shop, _events) = storefront().await;
        assert_eq!(shop.installer().install().await.unwrap(), 0);

        let keys = shop.schema().list(FieldScope::Key).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|f| f.kind == ValueKind::Number && f.default == FieldValue::Empty));
        let checkout = shop.attributes().fields_with(AttributeKind::InCheckout).await.unwrap();
        assert_eq!(checkout, [keys[1].id]);
    }

    #[tokio::test]
    async fn test_reset_clears_engine_data() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        shop.schema().declare("Colour", ValueKind::Text, FieldScope::Global, "Red").await.unwrap();
        let user = Identity::user(1);
        shop.cart().add(&user, mug, &DirectValues::new()).await.unwrap();
        shop.sales().finalize(&user).await.unwrap();

        shop.installer().reset().await.unwrap();

        assert!(shop.sales().sales(None).await.unwrap().is_empty());
        assert!(shop.schema().list(FieldScope::Global).await.unwrap().is_empty());
        assert_eq!(shop.schema().list(FieldScope::Key).await.unwrap().len(), 2);
        assert!(!shop.products().is_product(mug).await.unwrap());
        assert_eq!(shop.products().name_of(mug).await.unwrap(), "Mug");
    }
}
