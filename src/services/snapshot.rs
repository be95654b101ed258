//! Freezes a product's field values onto a new cart line.

use sqlx::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::domain::aggregates::CartMetaEntry;
use crate::domain::value_objects::{AttributeKind, FieldId, FieldValue, ItemId, LineId};
use crate::error::{Result, StorefrontError};
use crate::services::attributes::{fields_with_in, AttributeRegistry};
use crate::services::resolver::resolve_field_in;
use crate::services::schema::{get_in, visible_fields_in};

/// Values the shopper typed into a product's input fields, by field id.
pub type DirectValues = BTreeMap<FieldId, String>;

#[derive(Clone, Debug)]
pub struct CartMetaSnapshot {
    attributes: AttributeRegistry,
}

impl CartMetaSnapshot {
    pub fn new(attributes: AttributeRegistry) -> Self { Self { attributes } }

    /// Writes one meta entry per field visible to `product_id` and returns
    /// them in the order written.
    ///
    /// Runs on the caller's connection so the entries land in the same
    /// transaction as the line they belong to.
    pub async fn snapshot(
        &self,
        conn: &mut SqliteConnection,
        line_id: LineId,
        product_id: ItemId,
        direct: &DirectValues,
    ) -> Result<Vec<CartMetaEntry>> {
        let fields = visible_fields_in(conn, product_id).await?;
        let inputs: BTreeSet<FieldId> = if self.attributes.is_registered(AttributeKind::Input) {
            fields_with_in(conn, AttributeKind::Input).await?.into_iter().collect()
        } else {
            BTreeSet::new()
        };

        for field_id in direct.keys() {
            if !fields.iter().any(|f| f.id == *field_id) {
                // Distinguish a field that is gone from one on another item.
                get_in(conn, *field_id).await?;
                return Err(StorefrontError::FieldNotVisible { field_id: *field_id, item_id: product_id });
            }
            if !inputs.contains(field_id) {
                return Err(StorefrontError::NotAnInputField(*field_id));
            }
        }

        let mut entries = Vec::with_capacity(fields.len());
        for field in &fields {
            let typed = match direct.get(&field.id) {
                Some(raw) => FieldValue::parse(field.kind, raw)?,
                None => FieldValue::Empty,
            };
            let value = if typed.is_empty() { resolve_field_in(conn, field.id, product_id).await?.value } else { typed };
            entries.push(CartMetaEntry::new(field.name.clone(), &value));
        }

        for entry in &entries {
            sqlx::query("INSERT INTO cart_meta (line_id, field_name, field_value) VALUES (?, ?, ?)")
                .bind(line_id.get())
                .bind(&entry.field_name)
                .bind(&entry.field_value)
                .execute(&mut *conn)
                .await?;
        }
        debug!(line_id = %line_id, entries = entries.len(), "cart meta captured");
        Ok(entries)
    }
}
