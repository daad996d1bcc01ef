use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    CreateAvailabilityRequest, ProviderAvailabilityQuery, SearchCriteria, UpdateAvailabilityRequest,
};
use crate::router::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct DeleteQuery {
    pub delete_recurring: Option<bool>,
}

/// Bodies serde cannot even shape into a request still answer with the
/// `{"error", "details"}` validation payload.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(body)| body).map_err(|rejection| AppError::ValidationError {
        message: "Invalid request body".to_string(),
        details: vec![format!("body: {}", rejection.body_text())],
    })
}

fn ensure_can_manage(user: &User, provider_id: Uuid) -> Result<(), AppError> {
    if user.can_manage_provider(&provider_id.to_string()) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You can only manage your own availability".to_string(),
        ))
    }
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn search_availability(
    State(state): State<Arc<AppState>>,
    Query(criteria): Query<SearchCriteria>,
) -> Result<Json<Value>, AppError> {
    let results = state.service.search_availability(&criteria).await?;
    Ok(Json(json!(results)))
}

#[axum::debug_handler]
pub async fn get_provider_availability(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<Uuid>,
    Query(query): Query<ProviderAvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let availability = state
        .service
        .get_availability_by_provider(provider_id, &query)
        .await?;
    Ok(Json(json!(availability)))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let availability = state.service.get_availability(id).await?;
    Ok(Json(json!(availability)))
}

#[axum::debug_handler]
pub async fn check_slot_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let check = state.service.check_slot_availability(id).await?;
    Ok(Json(json!(check)))
}

#[axum::debug_handler]
pub async fn get_time_slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let preview = state.service.get_time_slots(id).await?;
    Ok(Json(json!({
        "total_slots": preview.slots.len(),
        "preview": preview,
    })))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    payload: Result<Json<CreateAvailabilityRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let mut request = json_body(payload)?;

    // Providers creating their own schedule may omit provider_id.
    let provider_id = request.provider_id.get_or_insert_with(|| user.id.clone());
    // A malformed id is left for validation to report.
    if let Ok(provider_id) = Uuid::parse_str(provider_id.as_str()) {
        ensure_can_manage(&user, provider_id)?;
    }

    let outcome = state.service.create_availability(request).await?;
    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn update_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateAvailabilityRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let request = json_body(payload)?;
    let existing = state.service.get_availability(id).await?;
    ensure_can_manage(&user, existing.record.provider_id)?;

    let updated = state.service.update_availability(id, request).await?;
    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn delete_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<Value>, AppError> {
    let existing = state.service.get_availability(id).await?;
    ensure_can_manage(&user, existing.record.provider_id)?;

    let outcome = state
        .service
        .delete_availability(id, query.delete_recurring.unwrap_or(false))
        .await?;
    Ok(Json(json!(outcome)))
}

#[axum::debug_handler]
pub async fn book_slot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    info!("User {} booking slot {}", user.id, id);
    let availability = state.service.book_slot(id).await?;
    Ok(Json(json!(availability)))
}

#[axum::debug_handler]
pub async fn cancel_slot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    info!("User {} releasing slot {}", user.id, id);
    let availability = state.service.cancel_slot(id).await?;
    Ok(Json(json!(availability)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::TestUser;

    #[test]
    fn providers_manage_only_their_own_windows() {
        let provider = TestUser::provider("doc@example.com");
        let own_id = Uuid::parse_str(&provider.id).unwrap();

        assert!(ensure_can_manage(&provider.to_user(), own_id).is_ok());
        assert_matches!(
            ensure_can_manage(&provider.to_user(), Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        );
        assert!(ensure_can_manage(&TestUser::admin("admin@example.com").to_user(), own_id).is_ok());
    }
}
