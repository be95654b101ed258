//! Product Aggregate

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::field::ResolvedField;
use crate::domain::value_objects::ItemId;

/// A CMS content item as the engine sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub title: String,
    pub is_product: bool,
}

/// Everything a product page needs: its name and every visible field,
/// split by whether the shopper fills it in.
#[derive(Clone, Debug, Serialize)]
pub struct ProductSheet {
    pub item_id: ItemId,
    pub name: String,
    pub outputs: Vec<ResolvedField>,
    pub inputs: Vec<ResolvedField>,
}

impl ProductSheet {
    pub fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.outputs.iter().chain(self.inputs.iter()).find(|f| f.field.name == name)
    }
}
