//! Drink HTTP handlers.
//!
//! Protected handlers take the whole request and run the guard before the
//! path or body is looked at, so an unauthorized caller never learns
//! whether their id or payload was valid.

use axum::extract::rejection::PathRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::Json;
use serde::Serialize;

use super::types::{Drink, DrinkPatch, DrinkSummary, NewDrink};
use crate::error::ApiError;
use crate::server::AppState;

pub const PERMISSION_GET_DETAIL: &str = "get:drinks-detail";
pub const PERMISSION_POST: &str = "post:drinks";
pub const PERMISSION_PATCH: &str = "patch:drinks";
pub const PERMISSION_DELETE: &str = "delete:drinks";

#[derive(Debug, Serialize)]
pub struct DrinksResponse<T> {
    pub success: bool,
    pub drinks: Vec<T>,
}

impl<T> DrinksResponse<T> {
    fn ok(drinks: Vec<T>) -> Json<Self> {
        Json(Self {
            success: true,
            drinks,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
    pub deleted: u64,
}

/// GET /drinks
pub async fn list_drinks(
    State(state): State<AppState>,
) -> Result<Json<DrinksResponse<DrinkSummary>>, ApiError> {
    let drinks = state.store.list()?;
    Ok(DrinksResponse::ok(drinks.iter().map(Drink::short).collect()))
}

/// GET /drinks-detail
pub async fn list_drinks_detail(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<DrinksResponse<Drink>>, ApiError> {
    state
        .guard
        .authorize_headers(request.headers(), PERMISSION_GET_DETAIL)
        .await?;

    Ok(DrinksResponse::ok(state.store.list()?))
}

/// POST /drinks
pub async fn create_drink(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<DrinksResponse<Drink>>, ApiError> {
    state
        .guard
        .authorize_headers(request.headers(), PERMISSION_POST)
        .await?;

    let Json(input) = Json::<NewDrink>::from_request(request, &state).await?;
    let (title, recipe) = input.validate().map_err(ApiError::Unprocessable)?;

    let drink = state.store.create(&title, recipe)?;
    Ok(DrinksResponse::ok(vec![drink]))
}

/// PATCH /drinks/{id}
pub async fn update_drink(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    request: Request,
) -> Result<Json<DrinksResponse<Drink>>, ApiError> {
    state
        .guard
        .authorize_headers(request.headers(), PERMISSION_PATCH)
        .await?;

    let Path(id) = id?;
    // unknown ids are reported before the body is judged
    state.store.get(id)?;

    let Json(patch) = Json::<DrinkPatch>::from_request(request, &state).await?;
    let changes = patch.validate().map_err(ApiError::Unprocessable)?;

    let drink = state.store.update(id, changes)?;
    Ok(DrinksResponse::ok(vec![drink]))
}

/// DELETE /drinks/{id}
pub async fn delete_drink(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    request: Request,
) -> Result<Json<DeletedResponse>, ApiError> {
    state
        .guard
        .authorize_headers(request.headers(), PERMISSION_DELETE)
        .await?;

    let Path(id) = id?;
    let drink = state.store.delete(id)?;
    Ok(Json(DeletedResponse {
        success: true,
        deleted: drink.id,
    }))
}
