//! JSON API over a [`Storefront`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use crate::domain::aggregates::{Cart, CartLine, Field, FieldAttribute, FieldScope, Item, ProductSheet, Sale, Step};
use crate::domain::value_objects::{AttributeKind, FieldId, FieldValue, Identity, ItemId, LineId, Quantity, SaleId, ValueKind};
use crate::error::{Result, StorefrontError};
use crate::services::{CheckoutSummary, DirectValues};
use crate::storefront::Storefront;

#[derive(Clone)]
pub struct AppState {
    pub storefront: Arc<Storefront>,
}

impl IntoResponse for StorefrontError {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::AlreadyInCart { .. } | Self::DuplicateName { .. } => StatusCode::CONFLICT,
            e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(storefront: Arc<Storefront>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-storefront"})) }))
        .route("/api/v1/fields", get(list_fields).post(declare_field))
        .route("/api/v1/fields/:id", get(get_field).put(update_field).delete(delete_field))
        .route("/api/v1/fields/:id/attributes/:attribute", put(set_attribute).delete(clear_attribute))
        .route("/api/v1/items/:id", get(get_item).put(upsert_item))
        .route("/api/v1/items/:id/product", put(mark_product).delete(unmark_product))
        .route("/api/v1/items/:id/sheet", get(product_sheet))
        .route("/api/v1/items/:id/resolve", get(resolve))
        .route("/api/v1/products", get(list_products))
        .route("/api/v1/carts/:identity", get(cart_contents).post(add_to_cart))
        .route("/api/v1/carts/:identity/migrate", post(migrate_cart))
        .route("/api/v1/carts/:identity/checkout", get(checkout_summary).post(finalize))
        .route("/api/v1/lines/:id", get(get_line).delete(remove_line))
        .route("/api/v1/lines/:id/increment", post(increment_line))
        .route("/api/v1/sales", get(list_sales))
        .route("/api/v1/sales/:id", get(get_sale))
        .with_state(AppState { storefront })
}

fn checked<T: Validate>(request: T) -> Result<T> {
    request.validate().map_err(|e| StorefrontError::InvalidRequest(e.to_string()))?;
    Ok(request)
}

fn identity_from(raw: &str) -> Result<Identity> { raw.parse() }

fn scope(scope: &str, item_id: Option<i64>) -> Result<FieldScope> {
    match (scope, item_id) {
        ("global", None) => Ok(FieldScope::Global),
        ("key", None) => Ok(FieldScope::Key),
        ("post", Some(id)) => Ok(FieldScope::Post(ItemId::new(id)?)),
        ("post", None) => Err(StorefrontError::InvalidRequest("post fields need an item_id".into())),
        (other, _) => Err(StorefrontError::InvalidRequest(format!("unknown scope '{other}' for this item_id"))),
    }
}

// Fields

#[derive(Debug, Deserialize)]
pub struct ScopeParams {
    pub scope: String,
    pub item_id: Option<i64>,
}

async fn list_fields(State(s): State<AppState>, Query(p): Query<ScopeParams>) -> Result<Json<Vec<Field>>> {
    Ok(Json(s.storefront.schema().list(scope(&p.scope, p.item_id)?).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeclareFieldRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub kind: ValueKind,
    pub scope: String,
    pub item_id: Option<i64>,
    #[serde(default)]
    pub default: String,
}

async fn declare_field(State(s): State<AppState>, Json(r): Json<DeclareFieldRequest>) -> Result<(StatusCode, Json<Field>)> {
    let r = checked(r)?;
    let scope = scope(&r.scope, r.item_id)?;
    if scope == FieldScope::Key {
        return Err(StorefrontError::InvalidRequest("key fields are installed, not declared".into()));
    }
    let schema = s.storefront.schema();
    let id = schema.declare(&r.name, r.kind, scope, &r.default).await?;
    Ok((StatusCode::CREATED, Json(schema.get(id).await?)))
}

async fn get_field(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<Field>> {
    Ok(Json(s.storefront.schema().get(FieldId::new(id)).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateFieldRequest {
    pub attribute: FieldAttribute,
    pub value: String,
    pub item_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Changed {
    pub changed: bool,
}

async fn update_field(State(s): State<AppState>, Path(id): Path<i64>, Json(r): Json<UpdateFieldRequest>) -> Result<Json<Changed>> {
    let item = r.item_id.map(ItemId::new).transpose()?;
    let changed = s.storefront.schema().update(FieldId::new(id), r.attribute, &r.value, item).await?;
    Ok(Json(Changed { changed }))
}

async fn delete_field(State(s): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    s.storefront.schema().delete(FieldId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_attribute(State(s): State<AppState>, Path((id, attribute)): Path<(i64, String)>) -> Result<StatusCode> {
    let kind = AttributeKind::from_label(&attribute)?;
    s.storefront.attributes().set(FieldId::new(id), kind, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_attribute(State(s): State<AppState>, Path((id, attribute)): Path<(i64, String)>) -> Result<StatusCode> {
    let kind = AttributeKind::from_label(&attribute)?;
    s.storefront.attributes().set(FieldId::new(id), kind, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Items and products

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertItemRequest {
    #[validate(length(max = 200))]
    pub title: String,
}

async fn upsert_item(State(s): State<AppState>, Path(id): Path<i64>, Json(r): Json<UpsertItemRequest>) -> Result<Json<Item>> {
    let r = checked(r)?;
    Ok(Json(s.storefront.products().upsert_item(ItemId::new(id)?, &r.title).await?))
}

async fn get_item(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<Item>> {
    Ok(Json(s.storefront.products().item(ItemId::new(id)?).await?))
}

async fn mark_product(State(s): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    s.storefront.products().mark_product(ItemId::new(id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unmark_product(State(s): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    s.storefront.products().unmark_product(ItemId::new(id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_products(State(s): State<AppState>) -> Result<Json<Vec<Item>>> {
    Ok(Json(s.storefront.products().products().await?))
}

async fn product_sheet(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<ProductSheet>> {
    Ok(Json(s.storefront.product_sheet(ItemId::new(id)?).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub field: String,
}

#[derive(Debug, Serialize)]
pub struct Resolved {
    pub field: String,
    pub value: FieldValue,
}

async fn resolve(State(s): State<AppState>, Path(id): Path<i64>, Query(p): Query<ResolveParams>) -> Result<Json<Resolved>> {
    let value = s.storefront.resolver().resolve(&p.field, ItemId::new(id)?).await?;
    Ok(Json(Resolved { field: p.field, value }))
}

// Carts

async fn cart_contents(State(s): State<AppState>, Path(raw): Path<String>) -> Result<Json<Cart>> {
    Ok(Json(s.storefront.cart().contents(&identity_from(&raw)?).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    #[validate(range(min = 1))]
    pub product_id: i64,
    /// Shopper input keyed by field id.
    #[serde(default)]
    pub values: BTreeMap<i64, String>,
}

async fn add_to_cart(State(s): State<AppState>, Path(raw): Path<String>, Json(r): Json<AddToCartRequest>) -> Result<(StatusCode, Json<CartLine>)> {
    let r = checked(r)?;
    let direct: DirectValues = r.values.into_iter().map(|(id, value)| (FieldId::new(id), value)).collect();
    let line = s.storefront.cart().add(&identity_from(&raw)?, ItemId::new(r.product_id)?, &direct).await?;
    Ok((StatusCode::CREATED, Json(line)))
}

#[derive(Debug, Deserialize)]
pub struct MigrateCartRequest {
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct Migrated {
    pub lines: u64,
}

async fn migrate_cart(State(s): State<AppState>, Path(raw): Path<String>, Json(r): Json<MigrateCartRequest>) -> Result<Json<Migrated>> {
    let lines = s.storefront.cart().identity_migration(&identity_from(&raw)?, &identity_from(&r.to)?).await?;
    Ok(Json(Migrated { lines }))
}

async fn get_line(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<CartLine>> {
    Ok(Json(s.storefront.cart().line(LineId::new(id)).await?))
}

#[derive(Debug, Deserialize)]
pub struct IncrementRequest {
    pub step: Step,
}

#[derive(Debug, Serialize)]
pub struct LineQuantity {
    pub quantity: Quantity,
}

async fn increment_line(State(s): State<AppState>, Path(id): Path<i64>, Json(r): Json<IncrementRequest>) -> Result<Json<LineQuantity>> {
    let quantity = s.storefront.cart().increment(LineId::new(id), r.step).await?;
    Ok(Json(LineQuantity { quantity }))
}

async fn remove_line(State(s): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    s.storefront.cart().remove(LineId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Checkout and sales

async fn checkout_summary(State(s): State<AppState>, Path(raw): Path<String>) -> Result<Json<CheckoutSummary>> {
    Ok(Json(s.storefront.checkout_summary(&identity_from(&raw)?).await?))
}

async fn finalize(State(s): State<AppState>, Path(raw): Path<String>) -> Result<(StatusCode, Json<Vec<Sale>>)> {
    let sales = s.storefront.sales().finalize(&identity_from(&raw)?).await?;
    Ok((StatusCode::CREATED, Json(sales)))
}

#[derive(Debug, Deserialize)]
pub struct SalesParams {
    pub identity: Option<String>,
}

async fn list_sales(State(s): State<AppState>, Query(p): Query<SalesParams>) -> Result<Json<Vec<Sale>>> {
    let identity = p.identity.as_deref().map(identity_from).transpose()?;
    Ok(Json(s.storefront.sales().sales(identity.as_ref()).await?))
}

async fn get_sale(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<Sale>> {
    Ok(Json(s.storefront.sales().sale(SaleId::new(id)).await?))
}
