//! Value resolution.
//!
//! A field name is resolved for an item by finding the one field of that
//! name the item can see, then taking the item's override if it has one and
//! the field's default otherwise. Names that match nothing resolve to
//! [`FieldValue::Empty`].

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::db::Database;
use crate::domain::aggregates::{Field, ResolvedField};
use crate::domain::value_objects::{FieldId, FieldValue, ItemId};
use crate::error::{Result, StorefrontError};
use crate::services::schema::{FieldRow, FIELD_COLUMNS};

#[derive(Debug, sqlx::FromRow)]
struct ResolvedRow {
    #[sqlx(flatten)]
    field: FieldRow,
    override_value: Option<String>,
}

impl ResolvedRow {
    fn into_resolved(self) -> Result<ResolvedField> {
        let field = Field::try_from(self.field)?;
        let over = self.override_value.and_then(|raw| match FieldValue::parse(field.kind, &raw) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(_) => {
                warn!(field_id = %field.id, "override does not parse as {}; using the default", field.kind);
                None
            }
        });
        Ok(match over {
            Some(value) => ResolvedField { field, value, overridden: true },
            None => ResolvedField { value: field.default.clone(), field, overridden: false },
        })
    }
}

#[derive(Clone, Debug)]
pub struct ValueResolver {
    db: Database,
}

impl ValueResolver {
    pub fn new(db: Database) -> Self { Self { db } }

    /// Effective value of `field_name` for `item`. Never fails for a missing
    /// field; only storage errors surface.
    pub async fn resolve(&self, field_name: &str, item: ItemId) -> Result<FieldValue> {
        let mut conn = self.db.pool().acquire().await?;
        resolve_in(&mut conn, field_name, item).await
    }

    /// Like [`resolve`](Self::resolve) but by id, so a field deleted since
    /// the caller looked it up is reported instead of read as blank.
    pub async fn resolve_field(&self, field_id: FieldId, item: ItemId) -> Result<ResolvedField> {
        let mut conn = self.db.pool().acquire().await?;
        resolve_field_in(&mut conn, field_id, item).await
    }

    /// Every field `item` can see with its effective value, key fields first.
    pub async fn resolve_visible(&self, item: ItemId) -> Result<Vec<ResolvedField>> {
        let sql = format!(
            "SELECT {FIELD_COLUMNS}, o.value AS override_value
             FROM fields f
             LEFT JOIN item_overrides o ON o.field_id = f.field_id AND o.item_id = ?1
             WHERE f.owner_item_id IS NULL OR f.owner_item_id = ?1
             ORDER BY CASE f.scope WHEN 'key' THEN 0 WHEN 'global' THEN 1 ELSE 2 END, f.field_id, f.order_index"
        );
        let rows: Vec<ResolvedRow> = sqlx::query_as(&sql).bind(item.get()).fetch_all(self.db.pool()).await?;
        rows.into_iter().map(ResolvedRow::into_resolved).collect()
    }
}

pub(crate) async fn resolve_in(conn: &mut SqliteConnection, field_name: &str, item: ItemId) -> Result<FieldValue> {
    // Field lookup and override read in one statement, so a concurrent
    // delete is seen entirely or not at all.
    let sql = format!(
        "SELECT {FIELD_COLUMNS}, o.value AS override_value
         FROM fields f
         LEFT JOIN item_overrides o ON o.field_id = f.field_id AND o.item_id = ?2
         WHERE f.name = ?1 AND (f.owner_item_id IS NULL OR f.owner_item_id = ?2)
         ORDER BY f.owner_item_id IS NULL, f.field_id
         LIMIT 1"
    );
    let row: Option<ResolvedRow> = sqlx::query_as(&sql).bind(field_name.trim()).bind(item.get()).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => Ok(row.into_resolved()?.value),
        None => {
            debug!(field_name, item = %item, "no such field; resolving to empty");
            Ok(FieldValue::Empty)
        }
    }
}

pub(crate) async fn resolve_field_in(conn: &mut SqliteConnection, field_id: FieldId, item: ItemId) -> Result<ResolvedField> {
    let sql = format!(
        "SELECT {FIELD_COLUMNS}, o.value AS override_value
         FROM fields f
         LEFT JOIN item_overrides o ON o.field_id = f.field_id AND o.item_id = ?2
         WHERE f.field_id = ?1"
    );
    let row: Option<ResolvedRow> = sqlx::query_as(&sql).bind(field_id.get()).bind(item.get()).fetch_optional(&mut *conn).await?;
    let resolved = row.ok_or(StorefrontError::FieldNotFound(field_id))?.into_resolved()?;
    if !resolved.field.is_visible_to(item) {
        return Err(StorefrontError::FieldNotVisible { field_id, item_id: item });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{FieldAttribute, FieldScope};
    use crate::domain::value_objects::ValueKind;
    use crate::testing::{item, storefront};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_override_wins_over_default() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let id = shop.schema().declare("Colour", ValueKind::Text, FieldScope::Global, "Red").await.unwrap();
        shop.schema().update(id, FieldAttribute::Value, "Teal", Some(mug)).await.unwrap();

        assert_eq!(shop.resolver().resolve("Colour", mug).await.unwrap(), FieldValue::Text("Teal".into()));
        // Changing the default does not disturb the override.
        shop.schema().update(id, FieldAttribute::Value, "Blue", None).await.unwrap();
        assert_eq!(shop.resolver().resolve("Colour", mug).await.unwrap(), FieldValue::Text("Teal".into()));
    }

    #[tokio::test]
    async fn test_default_when_not_overridden() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let hat = item(&shop, 2, "Hat").await;
        let id = shop.schema().declare("Colour", ValueKind::Text, FieldScope::Global, "Red").await.unwrap();
        shop.schema().update(id, FieldAttribute::Value, "Teal", Some(mug)).await.unwrap();
        assert_eq!(shop.resolver().resolve("Colour", hat).await.unwrap(), FieldValue::Text("Red".into()));
    }

    #[tokio::test]
    async fn test_post_field_default_and_override() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let hat = item(&shop, 2, "Hat").await;
        let id = shop.schema().declare("Capacity", ValueKind::Number, FieldScope::Post(mug), "300").await.unwrap();

        assert_eq!(shop.resolver().resolve("Capacity", mug).await.unwrap(), FieldValue::Number(Decimal::new(300, 0)));
        // Other items cannot see it.
        assert_eq!(shop.resolver().resolve("Capacity", hat).await.unwrap(), FieldValue::Empty);

        shop.schema().update(id, FieldAttribute::Value, "350", Some(mug)).await.unwrap();
        assert_eq!(shop.resolver().resolve("Capacity", mug).await.unwrap(), FieldValue::Number(Decimal::new(350, 0)));
    }

    #[tokio::test]
    async fn test_unknown_field_is_empty_not_error() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        assert_eq!(shop.resolver().resolve("No Such Field", mug).await.unwrap(), FieldValue::Empty);
        // Items the engine never heard of resolve the same way.
        assert_eq!(shop.resolver().resolve("Sale Price", ItemId::new(999).unwrap()).await.unwrap(), FieldValue::Empty);
    }

    #[tokio::test]
    async fn test_resolve_field_reports_deleted_fields() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let id = shop.schema().declare("Colour", ValueKind::Text, FieldScope::Global, "Red").await.unwrap();
        assert_eq!(shop.resolver().resolve_field(id, mug).await.unwrap().value, FieldValue::Text("Red".into()));

        shop.schema().delete(id).await.unwrap();
        let err = shop.resolver().resolve_field(id, mug).await.unwrap_err();
        assert!(matches!(err, StorefrontError::FieldNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_visible_marks_overrides() {
        let (shop, _events) = storefront().await;
        let mug = item(&shop, 1, "Mug").await;
        let price = shop.schema().find_shared("Sale Price").await.unwrap().unwrap();
        shop.schema().update(price.id, FieldAttribute::Value, "9.99", Some(mug)).await.unwrap();
        shop.schema().declare("Capacity", ValueKind::Number, FieldScope::Post(mug), "300").await.unwrap();

        let resolved = shop.resolver().resolve_visible(mug).await.unwrap();
        let summary: Vec<(&str, String, bool)> =
            resolved.iter().map(|r| (r.field.name.as_str(), r.value.to_string(), r.overridden)).collect();
        assert_eq!(
            summary,
            [
                ("Regular Price", String::new(), false),
                ("Sale Price", "9.99".to_string(), true),
                ("Capacity", "300".to_string(), false),
            ]
        );
    }
}
