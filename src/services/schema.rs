//! Field schema: declaration, lookup, update and cascading delete of fields.

use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::domain::aggregates::field::normalize_name;
use crate::domain::aggregates::{Field, FieldAttribute, FieldScope};
use crate::domain::events::{DomainEvent, EventSink, FieldEvent};
use crate::domain::value_objects::{FieldId, FieldValue, ItemId, ValueKind};
use crate::error::{is_unique_violation, Result, StorefrontError};

pub(crate) const FIELD_COLUMNS: &str =
    "f.field_id, f.scope, f.owner_item_id, f.name, f.type AS kind, f.default_value, f.order_index";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FieldRow {
    field_id: i64,
    scope: String,
    owner_item_id: Option<i64>,
    name: String,
    kind: String,
    default_value: String,
    order_index: i64,
}

impl TryFrom<FieldRow> for Field {
    type Error = StorefrontError;

    fn try_from(row: FieldRow) -> Result<Self> {
        let kind: ValueKind = row.kind.parse().map_err(|_| StorefrontError::Corrupt(format!("field {} has type {}", row.field_id, row.kind)))?;
        let default = FieldValue::parse(kind, &row.default_value)
            .map_err(|_| StorefrontError::Corrupt(format!("field {} default does not parse as {kind}", row.field_id)))?;
        Ok(Field {
            id: FieldId::new(row.field_id),
            name: row.name,
            kind,
            scope: FieldScope::from_columns(&row.scope, row.owner_item_id)?,
            default,
            order_index: row.order_index,
        })
    }
}

#[derive(Clone, Debug)]
pub struct FieldSchema {
    db: Database,
    events: EventSink,
}

impl FieldSchema {
    pub fn new(db: Database, events: EventSink) -> Self { Self { db, events } }

    /// Declares a new field and returns its id.
    #[instrument(skip(self, default))]
    pub async fn declare(&self, name: &str, kind: ValueKind, scope: FieldScope, default: &str) -> Result<FieldId> {
        let name = normalize_name(name)?;
        let default = FieldValue::parse(kind, default)?;

        let mut tx = self.db.begin_write().await?;
        if let Some(item) = scope.owner_item() {
            ensure_item_exists(&mut tx, item).await?;
        }
        ensure_name_free(&mut tx, &name, scope, None).await?;

        let order_index: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(order_index), -1) + 1 FROM fields")
            .fetch_one(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO fields (scope, owner_item_id, name, type, default_value, order_index) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(scope.as_str())
        .bind(scope.owner_item().map(ItemId::get))
        .bind(&name)
        .bind(kind.as_str())
        .bind(default.to_string())
        .bind(order_index)
        .execute(&mut *tx)
        .await
        .map_err(|e| if is_unique_violation(&e) { StorefrontError::DuplicateName { name: name.clone() } } else { e.into() })?;
        tx.commit().await?;

        let id = FieldId::new(inserted.last_insert_rowid());
        info!(field_id = %id, %name, %kind, "added {} field", scope.as_str());
        self.events.emit(DomainEvent::Field(FieldEvent::Declared { field_id: id, name }));
        Ok(id)
    }

    pub async fn get(&self, id: FieldId) -> Result<Field> {
        let mut conn = self.db.pool().acquire().await?;
        get_in(&mut conn, id).await
    }

    /// Fields of exactly one scope, by declaration order then order index.
    pub async fn list(&self, scope: FieldScope) -> Result<Vec<Field>> {
        let sql = format!(
            "SELECT {FIELD_COLUMNS} FROM fields f WHERE f.scope = ? AND f.owner_item_id IS ? ORDER BY f.field_id, f.order_index"
        );
        let rows: Vec<FieldRow> = sqlx::query_as(&sql)
            .bind(scope.as_str())
            .bind(scope.owner_item().map(ItemId::get))
            .fetch_all(self.db.pool())
            .await?;
        rows.into_iter().map(Field::try_from).collect()
    }

    /// Every field an item can see: key fields, global fields, then its own.
    pub async fn visible_fields(&self, item: ItemId) -> Result<Vec<Field>> {
        let mut conn = self.db.pool().acquire().await?;
        visible_fields_in(&mut conn, item).await
    }

    pub async fn find_visible(&self, name: &str, item: ItemId) -> Result<Option<Field>> {
        let mut conn = self.db.pool().acquire().await?;
        find_visible_in(&mut conn, name.trim(), item).await
    }

    /// Key or global field by name.
    pub async fn find_shared(&self, name: &str) -> Result<Option<Field>> {
        let sql = format!("SELECT {FIELD_COLUMNS} FROM fields f WHERE f.name = ? AND f.owner_item_id IS NULL");
        let row: Option<FieldRow> = sqlx::query_as(&sql).bind(name.trim()).fetch_optional(self.db.pool()).await?;
        row.map(Field::try_from).transpose()
    }

    /// Changes one attribute of a field.
    ///
    /// A value change with `item` set writes that item's override instead of
    /// the shared default; an empty value clears the override. Returns
    /// `false` when the new value equals what is already in effect.
    #[instrument(skip(self, new_value))]
    pub async fn update(&self, id: FieldId, attribute: FieldAttribute, new_value: &str, item: Option<ItemId>) -> Result<bool> {
        let mut tx = self.db.begin_write().await?;
        let field = get_in(&mut tx, id).await?;

        let changed = match (attribute, item) {
            (FieldAttribute::Value, Some(item)) => {
                if !field.is_visible_to(item) {
                    return Err(StorefrontError::FieldNotVisible { field_id: id, item_id: item });
                }
                ensure_item_exists(&mut tx, item).await?;
                let value = FieldValue::parse(field.kind, new_value)?;
                write_override(&mut tx, &field, item, &value).await?
            }
            (FieldAttribute::Value, None) => {
                let value = FieldValue::parse(field.kind, new_value)?;
                if value == field.default {
                    false
                } else {
                    sqlx::query("UPDATE fields SET default_value = ? WHERE field_id = ?")
                        .bind(value.to_string())
                        .bind(id.get())
                        .execute(&mut *tx)
                        .await?;
                    true
                }
            }
            (_, Some(_)) => {
                return Err(StorefrontError::InvalidRequest(format!("only values can be set per item, not {attribute:?}")));
            }
            (FieldAttribute::Name, None) => {
                let name = normalize_name(new_value)?;
                if name == field.name {
                    false
                } else {
                    ensure_name_free(&mut tx, &name, field.scope, Some(id)).await?;
                    sqlx::query("UPDATE fields SET name = ? WHERE field_id = ?")
                        .bind(&name)
                        .bind(id.get())
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| if is_unique_violation(&e) { StorefrontError::DuplicateName { name: name.clone() } } else { e.into() })?;
                    true
                }
            }
            (FieldAttribute::Kind, None) => {
                let kind: ValueKind = new_value.trim().parse()?;
                if kind == field.kind {
                    false
                } else {
                    change_kind(&mut tx, &field, kind).await?;
                    true
                }
            }
            (FieldAttribute::Order, None) => {
                let order: i64 = new_value
                    .trim()
                    .parse()
                    .map_err(|_| StorefrontError::InvalidValue { kind: ValueKind::Number, value: new_value.to_string() })?;
                if order == field.order_index {
                    false
                } else {
                    sqlx::query("UPDATE fields SET order_index = ? WHERE field_id = ?")
                        .bind(order)
                        .bind(id.get())
                        .execute(&mut *tx)
                        .await?;
                    true
                }
            }
        };
        tx.commit().await?;

        if changed {
            info!(field_id = %id, ?attribute, item = ?item.map(ItemId::get), "edited field {}", field.name);
            self.events.emit(DomainEvent::Field(FieldEvent::Updated { field_id: id, item_id: item }));
        } else {
            debug!(field_id = %id, ?attribute, "field unchanged");
        }
        Ok(changed)
    }

    /// Deletes a field with its attribute assignments and item overrides.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: FieldId) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        let field = get_in(&mut tx, id).await?;
        sqlx::query("DELETE FROM field_attributes WHERE field_id = ?").bind(id.get()).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM item_overrides WHERE field_id = ?").bind(id.get()).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM fields WHERE field_id = ?").bind(id.get()).execute(&mut *tx).await?;
        tx.commit().await?;

        info!(field_id = %id, "deleted field {}", field.name);
        self.events.emit(DomainEvent::Field(FieldEvent::Deleted { field_id: id, name: field.name }));
        Ok(())
    }
}

pub(crate) async fn get_in(conn: &mut SqliteConnection, id: FieldId) -> Result<Field> {
    let sql = format!("SELECT {FIELD_COLUMNS} FROM fields f WHERE f.field_id = ?");
    let row: Option<FieldRow> = sqlx::query_as(&sql).bind(id.get()).fetch_optional(&mut *conn).await?;
    row.ok_or(StorefrontError::FieldNotFound(id))?.try_into()
}

pub(crate) async fn visible_fields_in(conn: &mut SqliteConnection, item: ItemId) -> Result<Vec<Field>> {
    let sql = format!(
        "SELECT {FIELD_COLUMNS} FROM fields f
         WHERE f.owner_item_id IS NULL OR f.owner_item_id = ?
         ORDER BY CASE f.scope WHEN 'key' THEN 0 WHEN 'global' THEN 1 ELSE 2 END, f.field_id, f.order_index"
    );
    let rows: Vec<FieldRow> = sqlx::query_as(&sql).bind(item.get()).fetch_all(&mut *conn).await?;
    rows.into_iter().map(Field::try_from).collect()
}

/// The field named `name` that `item` sees. Its own post field wins.
pub(crate) async fn find_visible_in(conn: &mut SqliteConnection, name: &str, item: ItemId) -> Result<Option<Field>> {
    let sql = format!(
        "SELECT {FIELD_COLUMNS} FROM fields f
         WHERE f.name = ?1 AND (f.owner_item_id IS NULL OR f.owner_item_id = ?2)
         ORDER BY f.owner_item_id IS NULL, f.field_id
         LIMIT 1"
    );
    let row: Option<FieldRow> = sqlx::query_as(&sql).bind(name).bind(item.get()).fetch_optional(&mut *conn).await?;
    row.map(Field::try_from).transpose()
}

/// Rejects `name` if it would give some item two visible fields with the
/// same name. Shared fields are visible everywhere, so they must not clash
/// with any field at all.
async fn ensure_name_free(conn: &mut SqliteConnection, name: &str, scope: FieldScope, exclude: Option<FieldId>) -> Result<()> {
    let exclude = exclude.map(FieldId::get).unwrap_or(0);
    let clash: Option<i64> = match scope.owner_item() {
        None => {
            sqlx::query_scalar("SELECT field_id FROM fields WHERE name = ? AND field_id != ? LIMIT 1")
                .bind(name)
                .bind(exclude)
                .fetch_optional(&mut *conn)
                .await?
        }
        Some(item) => {
            sqlx::query_scalar(
                "SELECT field_id FROM fields
                 WHERE name = ? AND field_id != ? AND (owner_item_id IS NULL OR owner_item_id = ?)
                 LIMIT 1",
            )
            .bind(name)
            .bind(exclude)
            .bind(item.get())
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    match clash {
        Some(_) => Err(StorefrontError::DuplicateName { name: name.to_string() }),
        None => Ok(()),
    }
}

pub(crate) async fn ensure_item_exists(conn: &mut SqliteConnection, item: ItemId) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT item_id FROM items WHERE item_id = ?")
        .bind(item.get())
        .fetch_optional(&mut *conn)
        .await?;
    found.map(|_| ()).ok_or(StorefrontError::ItemNotFound(item))
}

async fn write_override(conn: &mut SqliteConnection, field: &Field, item: ItemId, value: &FieldValue) -> Result<bool> {
    let current: Option<String> = sqlx::query_scalar("SELECT value FROM item_overrides WHERE item_id = ? AND field_id = ?")
        .bind(item.get())
        .bind(field.id.get())
        .fetch_optional(&mut *conn)
        .await?;

    if value.is_empty() {
        if current.is_none() {
            return Ok(false);
        }
        sqlx::query("DELETE FROM item_overrides WHERE item_id = ? AND field_id = ?")
            .bind(item.get())
            .bind(field.id.get())
            .execute(&mut *conn)
            .await?;
        return Ok(true);
    }

    let effective = match &current {
        Some(raw) => FieldValue::parse(field.kind, raw).unwrap_or_default(),
        None => field.default.clone(),
    };
    if *value == effective {
        return Ok(false);
    }
    sqlx::query(
        "INSERT INTO item_overrides (item_id, field_id, value) VALUES (?, ?, ?)
         ON CONFLICT (item_id, field_id) DO UPDATE SET value = excluded.value",
    )
    .bind(item.get())
    .bind(field.id.get())
    .bind(value.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(true)
}

/// Switches a field's kind after checking its default and every override
/// still parse under the new kind.
async fn change_kind(conn: &mut SqliteConnection, field: &Field, kind: ValueKind) -> Result<()> {
    let default = FieldValue::parse(kind, &field.default.to_string())?;
    let overrides: Vec<(i64, String)> = sqlx::query_as("SELECT item_id, value FROM item_overrides WHERE field_id = ?")
        .bind(field.id.get())
        .fetch_all(&mut *conn)
        .await?;
    for (_, raw) in &overrides {
        FieldValue::parse(kind, raw)?;
    }
    for (item_id, raw) in overrides {
        sqlx::query("UPDATE item_overrides SET value = ? WHERE item_id = ? AND field_id = ?")
            .bind(FieldValue::parse(kind, &raw)?.to_string())
            .bind(item_id)
            .bind(field.id.get())
            .execute(&mut *conn)
            .await?;
    }
    sqlx::query("UPDATE fields SET type = ?, default_value = ? WHERE field_id = ?")
        .bind(kind.as_str())
        .bind(default.to_string())
        .bind(field.id.get())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
