//! Value Objects for the storefront engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, StorefrontError};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Self { Self(value) }
            pub fn get(self) -> i64 { self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    };
}

row_id!(
    /// Primary key of a row in `fields`.
    FieldId
);
row_id!(
    /// Primary key of an open cart line.
    LineId
);
row_id!(
    /// Primary key of a sale. Always equal to the line it was created from.
    SaleId
);

impl From<LineId> for SaleId {
    fn from(line: LineId) -> Self { Self(line.0) }
}

/// Identifier of a CMS content item. Always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ItemId(i64);

impl ItemId {
    pub fn new(value: i64) -> Result<Self> {
        if value <= 0 {
            return Err(StorefrontError::InvalidItemId(value));
        }
        Ok(Self(value))
    }
    pub fn get(self) -> i64 { self.0 }
}

impl TryFrom<i64> for ItemId {
    type Error = StorefrontError;
    fn try_from(value: i64) -> Result<Self> { Self::new(value) }
}

impl From<ItemId> for i64 {
    fn from(id: ItemId) -> Self { id.0 }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Owner of a cart: an authenticated user or an anonymous guest session.
///
/// Persisted as `user:<id>` or `guest:<token>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identity {
    User(i64),
    Guest(String),
}

impl Identity {
    pub fn user(id: i64) -> Self { Self::User(id) }

    /// Starts a new guest session with a random 32 character token.
    pub fn new_guest() -> Self { Self::Guest(Uuid::new_v4().simple().to_string()) }

    pub fn is_guest(&self) -> bool { matches!(self, Self::Guest(_)) }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Guest(token) => write!(f, "guest:{token}"),
        }
    }
}

impl FromStr for Identity {
    type Err = StorefrontError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || StorefrontError::InvalidIdentity(raw.to_string());
        let (kind, rest) = raw.split_once(':').ok_or_else(invalid)?;
        match kind {
            "user" => rest.parse::<i64>().ok().filter(|id| *id > 0).map(Self::User).ok_or_else(invalid),
            "guest" if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => {
                Ok(Self::Guest(rest.to_string()))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Identity {
    type Error = StorefrontError;
    fn try_from(raw: String) -> Result<Self> { raw.parse() }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self { identity.to_string() }
}

/// The closed set of value kinds a field may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Number,
    Boolean,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ValueKind {
    type Err = StorefrontError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            other => Err(StorefrontError::UnknownValueKind(other.to_string())),
        }
    }
}

/// Boolean capability flags a field can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// The shopper supplies the value when adding to the cart.
    Input,
    /// The value is shown as a column of the cart at checkout.
    InCheckout,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 2] = [Self::Input, Self::InCheckout];

    /// Name stored in `field_attributes.attribute_name`.
    pub fn label(self) -> &'static str {
        match self { Self::Input => "Input", Self::InCheckout => "In Checkout" }
    }

    /// Accepts the stored label or its form-friendly spelling (`in_checkout`).
    pub fn from_label(raw: &str) -> Result<Self> {
        let wanted = raw.trim().to_lowercase().replace(['_', '-'], " ");
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().to_lowercase() == wanted)
            .ok_or_else(|| StorefrontError::UnknownAttribute { name: raw.to_string() })
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

/// A field value after validation against its kind.
///
/// `Empty` is valid for every kind and is what resolution yields when no
/// value is defined anywhere.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Number(Decimal),
    Boolean(bool),
}

impl FieldValue {
    /// Parses raw input for a field of the given kind.
    pub fn parse(kind: ValueKind, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::Empty);
        }
        let invalid = || StorefrontError::InvalidValue { kind, value: raw.to_string() };
        match kind {
            ValueKind::Text => Ok(Self::Text(raw.to_string())),
            ValueKind::Number => Decimal::from_str(trimmed).map(|d| Self::Number(d.normalize())).map_err(|_| invalid()),
            ValueKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(Self::Boolean(true)),
                "false" | "off" | "no" | "0" => Ok(Self::Boolean(false)),
                _ => Err(invalid()),
            },
        }
    }

    pub fn is_empty(&self) -> bool { matches!(self, Self::Empty) }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self { Self::Number(d) => Some(*d), _ => None }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(s) => f.write_str(s),
            Self::Number(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn add(&self, other: &Money) -> Result<Money> {
        if self.currency != other.currency {
            return Err(StorefrontError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() });
        }
        let amount = self.amount.checked_add(other.amount).ok_or(StorefrontError::AmountOverflow)?;
        Ok(Money::new(amount, &self.currency))
    }
    pub fn multiply(&self, qty: Quantity) -> Result<Money> {
        let amount = self.amount.checked_mul(Decimal::from(qty.value())).ok_or(StorefrontError::AmountOverflow)?;
        Ok(Money::new(amount, &self.currency))
    }
}

/// Quantity of one product on a cart line or sale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn is_zero(&self) -> bool { self.0 == 0 }

    /// Converts a stored column value, clamping anything negative to zero.
    pub fn from_stored(raw: i64) -> Self { Self(raw.clamp(0, u32::MAX as i64) as u32) }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
