//! Attribute registry: which capability flags exist, and which fields carry them.

use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::Database;
use crate::domain::value_objects::{AttributeKind, FieldId};
use crate::error::{Result, StorefrontError};

/// Collects attribute registrations at startup. Building it freezes the set.
#[derive(Debug, Default)]
pub struct AttributeRegistryBuilder {
    registered: BTreeSet<AttributeKind>,
}

impl AttributeRegistryBuilder {
    /// Registers `kind`. Registering twice is a configuration fault.
    pub fn register(mut self, kind: AttributeKind) -> Result<Self> {
        if !self.registered.insert(kind) {
            return Err(StorefrontError::AlreadyRegistered { name: kind.label().to_string() });
        }
        Ok(self)
    }

    pub fn build(self, db: &Database) -> AttributeRegistry {
        AttributeRegistry { registered: Arc::new(self.registered), db: db.clone() }
    }
}

#[derive(Clone, Debug)]
pub struct AttributeRegistry {
    registered: Arc<BTreeSet<AttributeKind>>,
    db: Database,
}

impl AttributeRegistry {
    pub fn builder() -> AttributeRegistryBuilder { AttributeRegistryBuilder::default() }

    /// The registry every storefront uses: product inputs and checkout columns.
    pub fn standard(db: &Database) -> Result<Self> {
        Ok(Self::builder().register(AttributeKind::Input)?.register(AttributeKind::InCheckout)?.build(db))
    }

    pub fn is_registered(&self, kind: AttributeKind) -> bool { self.registered.contains(&kind) }

    pub fn registered(&self) -> impl Iterator<Item = AttributeKind> + '_ { self.registered.iter().copied() }

    pub(crate) fn ensure_registered(&self, kind: AttributeKind) -> Result<()> {
        if self.is_registered(kind) {
            Ok(())
        } else {
            Err(StorefrontError::UnknownAttribute { name: kind.label().to_string() })
        }
    }

    /// Turns `kind` on or off for a field. Both directions are idempotent.
    #[instrument(skip(self))]
    pub async fn set(&self, field_id: FieldId, kind: AttributeKind, on: bool) -> Result<()> {
        self.ensure_registered(kind)?;
        let mut tx = self.db.begin_write().await?;
        crate::services::schema::get_in(&mut tx, field_id).await?;
        let changed = if on {
            sqlx::query("INSERT OR IGNORE INTO field_attributes (field_id, attribute_name) VALUES (?, ?)")
                .bind(field_id.get())
                .bind(kind.label())
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query("DELETE FROM field_attributes WHERE field_id = ? AND attribute_name = ?")
                .bind(field_id.get())
                .bind(kind.label())
                .execute(&mut *tx)
                .await?
        };
        tx.commit().await?;
        if changed.rows_affected() > 0 {
            info!(field_id = %field_id, attribute = kind.label(), on, "field attribute changed");
        }
        Ok(())
    }

    pub async fn is_set(&self, field_id: FieldId, kind: AttributeKind) -> Result<bool> {
        self.ensure_registered(kind)?;
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT assignment_id FROM field_attributes WHERE field_id = ? AND attribute_name = ?",
        )
        .bind(field_id.get())
        .bind(kind.label())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(found.is_some())
    }

    /// Ids of every field carrying `kind`, ascending.
    pub async fn fields_with(&self, kind: AttributeKind) -> Result<Vec<FieldId>> {
        self.ensure_registered(kind)?;
        let mut conn = self.db.pool().acquire().await?;
        fields_with_in(&mut conn, kind).await
    }

    /// Every registered attribute set on a field.
    pub async fn attributes_of(&self, field_id: FieldId) -> Result<Vec<AttributeKind>> {
        let labels: Vec<String> = sqlx::query_scalar("SELECT attribute_name FROM field_attributes WHERE field_id = ?")
            .bind(field_id.get())
            .fetch_all(self.db.pool())
            .await?;
        let mut kinds: Vec<AttributeKind> = labels
            .iter()
            .filter_map(|label| AttributeKind::from_label(label).ok())
            .filter(|kind| self.is_registered(*kind))
            .collect();
        kinds.sort();
        Ok(kinds)
    }
}

pub(crate) async fn fields_with_in(conn: &mut SqliteConnection, kind: AttributeKind) -> Result<Vec<FieldId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT field_id FROM field_attributes WHERE attribute_name = ? ORDER BY field_id",
    )
    .bind(kind.label())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(FieldId::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::FieldScope;
    use crate::domain::value_objects::ValueKind;
    use crate::testing::storefront;

    #[test]
    fn test_duplicate_registration_is_configuration_fault() {
        let err = AttributeRegistry::builder()
            .register(AttributeKind::Input)
            .and_then(|b| b.register(AttributeKind::Input))
            .unwrap_err();
        assert!(matches!(&err, StorefrontError::AlreadyRegistered { name } if name == "Input"));
        assert!(err.is_configuration_fault());
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let (shop, _events) = storefront().await;
        let id = shop.schema().declare("Gift Note", ValueKind::Text, FieldScope::Global, "").await.unwrap();
        let attrs = shop.attributes();

        attrs.set(id, AttributeKind::Input, true).await.unwrap();
        attrs.set(id, AttributeKind::Input, true).await.unwrap();
        assert!(attrs.is_set(id, AttributeKind::Input).await.unwrap());
        assert_eq!(attrs.attributes_of(id).await.unwrap(), [AttributeKind::Input]);

        attrs.set(id, AttributeKind::Input, false).await.unwrap();
        attrs.set(id, AttributeKind::Input, false).await.unwrap();
        assert!(!attrs.is_set(id, AttributeKind::Input).await.unwrap());
    }

    #[tokio::test]
    async fn test_unregistered_attribute_is_rejected() {
        let (shop, _events) = storefront().await;
        let only_input = AttributeRegistry::builder().register(AttributeKind::Input).unwrap().build(shop.database());
        let id = shop.schema().declare("Gift Note", ValueKind::Text, FieldScope::Global, "").await.unwrap();

        let err = only_input.set(id, AttributeKind::InCheckout, true).await.unwrap_err();
        assert!(matches!(err, StorefrontError::UnknownAttribute { .. }));
        assert!(only_input.fields_with(AttributeKind::InCheckout).await.is_err());
        assert!(!only_input.is_registered(AttributeKind::InCheckout));
    }

    #[tokio::test]
    async fn test_set_on_missing_field_is_not_found() {
        let (shop, _events) = storefront().await;
        let err = shop.attributes().set(FieldId::new(77), AttributeKind::Input, true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fields_with_is_ascending() {
        let (shop, _events) = storefront().await;
        let schema = shop.schema();
        let attrs = shop.attributes();
        let sale_price = schema.find_shared("Sale Price").await.unwrap().unwrap().id;
        let b = schema.declare("B", ValueKind::Text, FieldScope::Global, "").await.unwrap();
        let a = schema.declare("A", ValueKind::Text, FieldScope::Global, "").await.unwrap();
        attrs.set(a, AttributeKind::InCheckout, true).await.unwrap();
        attrs.set(b, AttributeKind::InCheckout, true).await.unwrap();

        assert_eq!(attrs.fields_with(AttributeKind::InCheckout).await.unwrap(), [sale_price, b, a]);
        assert!(attrs.fields_with(AttributeKind::Input).await.unwrap().is_empty());
    }
}
