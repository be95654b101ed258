//! Field Aggregate

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::value_objects::{FieldId, FieldValue, ItemId, ValueKind};
use crate::error::{Result, StorefrontError};

/// Longest name the `fields` table accepts.
pub const MAX_FIELD_NAME_LEN: usize = 255;

/// Who can see a field.
///
/// Key fields are fixed system fields, global fields are admin-defined and
/// shared, post fields belong to a single content item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "item_id", rename_all = "lowercase")]
pub enum FieldScope {
    Key,
    Global,
    Post(ItemId),
}

impl FieldScope {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Key => "key", Self::Global => "global", Self::Post(_) => "post" }
    }

    pub fn owner_item(&self) -> Option<ItemId> {
        match self { Self::Post(item) => Some(*item), _ => None }
    }

    /// Rebuilds a scope from its two stored columns.
    pub fn from_columns(scope: &str, owner_item_id: Option<i64>) -> Result<Self> {
        match (scope, owner_item_id) {
            ("key", None) => Ok(Self::Key),
            ("global", None) => Ok(Self::Global),
            ("post", Some(id)) => Ok(Self::Post(ItemId::new(id)?)),
            (scope, owner) => Err(StorefrontError::Corrupt(format!("field scope {scope} with owner {owner:?}"))),
        }
    }
}

impl fmt::Display for FieldScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post(item) => write!(f, "post({item})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A declared field with its shared default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    pub kind: ValueKind,
    pub scope: FieldScope,
    pub default: FieldValue,
    pub order_index: i64,
}

impl Field {
    pub fn is_visible_to(&self, item: ItemId) -> bool {
        match self.scope { FieldScope::Post(owner) => owner == item, _ => true }
    }
}

/// The column an update targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldAttribute {
    Name,
    Value,
    Kind,
    Order,
}

/// A field together with the value it resolves to for one item.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedField {
    pub field: Field,
    pub value: FieldValue,
    pub overridden: bool,
}

/// Trims a proposed name and checks it fits the schema.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StorefrontError::InvalidFieldName("name cannot be empty".into()));
    }
    if name.chars().count() > MAX_FIELD_NAME_LEN {
        return Err(StorefrontError::InvalidFieldName(format!("name longer than {MAX_FIELD_NAME_LEN} characters")));
    }
    if name.chars().any(char::is_control) {
        return Err(StorefrontError::InvalidFieldName("name contains control characters".into()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_columns_round_trip() {
        let item = ItemId::new(12).unwrap();
        for scope in [FieldScope::Key, FieldScope::Global, FieldScope::Post(item)] {
            let owner = scope.owner_item().map(ItemId::get);
            assert_eq!(FieldScope::from_columns(scope.as_str(), owner).unwrap(), scope);
        }
        assert!(FieldScope::from_columns("post", None).is_err());
        assert!(FieldScope::from_columns("key", Some(3)).is_err());
    }

    #[test]
    fn test_post_field_visibility() {
        let owner = ItemId::new(1).unwrap();
        let other = ItemId::new(2).unwrap();
        let field = Field {
            id: FieldId::new(1), name: "Engraving".into(), kind: ValueKind::Text,
            scope: FieldScope::Post(owner), default: FieldValue::Empty, order_index: 0,
        };
        assert!(field.is_visible_to(owner));
        assert!(!field.is_visible_to(other));
        assert!(Field { scope: FieldScope::Global, ..field }.is_visible_to(other));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Sale Price ").unwrap(), "Sale Price");
        assert!(normalize_name("   ").is_err());
        assert!(normalize_name(&"x".repeat(256)).is_err());
        assert!(normalize_name("tab\there").is_err());
    }
}
