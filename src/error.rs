//! Error types for the storefront engine

use thiserror::Error;

use crate::domain::value_objects::{FieldId, Identity, ItemId, LineId, SaleId, ValueKind};

pub type Result<T> = std::result::Result<T, StorefrontError>;

#[derive(Error, Debug)]
pub enum StorefrontError {
    // Configuration faults. These abort startup.
    #[error("attribute already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    // Validation
    #[error("there already exists a field visible to this item with the name '{name}'")]
    DuplicateName { name: String },

    #[error("attribute is not registered: {name}")]
    UnknownAttribute { name: String },

    #[error("product {product_id} is already in the cart of {identity}; use increment to add another")]
    AlreadyInCart { identity: Identity, product_id: ItemId },

    #[error("item {0} is not a product")]
    NotAProduct(ItemId),

    #[error("'{value}' is not a valid {kind} value")]
    InvalidValue { kind: ValueKind, value: String },

    #[error("unknown value kind: {0}")]
    UnknownValueKind(String),

    #[error("field {0} does not accept caller input")]
    NotAnInputField(FieldId),

    #[error("field {field_id} is not visible to item {item_id}")]
    FieldNotVisible { field_id: FieldId, item_id: ItemId },

    #[error("invalid field name: {0}")]
    InvalidFieldName(String),

    #[error("item ids must be positive, got {0}")]
    InvalidItemId(i64),

    #[error("invalid identity: '{0}'")]
    InvalidIdentity(String),

    #[error("currency mismatch: {left} and {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("amount is too large to represent")]
    AmountOverflow,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Not found
    #[error("field not found: {0}")]
    FieldNotFound(FieldId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("cart line not found: {0}")]
    LineNotFound(LineId),

    #[error("sale not found: {0}")]
    SaleNotFound(SaleId),

    // Storage
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StorefrontError {
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, Self::AlreadyRegistered { .. } | Self::Config(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FieldNotFound(_) | Self::ItemNotFound(_) | Self::LineNotFound(_) | Self::SaleNotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::UnknownAttribute { .. }
                | Self::AlreadyInCart { .. }
                | Self::NotAProduct(_)
                | Self::InvalidValue { .. }
                | Self::UnknownValueKind(_)
                | Self::NotAnInputField(_)
                | Self::FieldNotVisible { .. }
                | Self::InvalidFieldName(_)
                | Self::InvalidItemId(_)
                | Self::InvalidIdentity(_)
                | Self::CurrencyMismatch { .. }
                | Self::AmountOverflow
                | Self::InvalidRequest(_)
        )
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Migration(_) | Self::Corrupt(_))
    }
}

/// True when a sqlx error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
