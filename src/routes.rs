//! REST surface for the contribution review service.
//!
//! All routes here sit behind [`crate::auth::require_principal`], which
//! verifies the bearer token and runs the rate guard before a handler
//! sees the request.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Extension, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{authorize, require_principal, Capability, Principal};
use crate::error::AppError;
use crate::receipt::MAX_RECEIPT_BYTES;
use crate::review::state::{ContributionId, NewContribution};
use crate::AppState;

/// Multipart body ceiling: the receipt limit plus headroom for the text
/// fields.
const UPLOAD_BODY_LIMIT: usize = MAX_RECEIPT_BYTES + 64 * 1024;

pub fn api_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/contributions/upload", post(upload_contribution))
        .route("/contributions/mine", get(my_contributions))
        .route("/contributions/pending", get(pending_contributions))
        .route("/contributions/{id}", get(get_contribution))
        .route("/contributions/{id}/approve", put(approve_contribution))
        .route("/contributions/{id}/reject", put(reject_contribution))
        .route(
            "/contributions/{id}/under-review",
            put(put_contribution_under_review),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            require_principal,
        ))
}

/// The submission floor is enforced at this boundary, before the record
/// store is invoked.
fn enforce_submission_floor(amount: f64, minimum: f64) -> Result<(), AppError> {
    if amount < minimum {
        return Err(AppError::Validation(format!(
            "amount {:.2} is below the minimum contribution of {:.2}",
            amount, minimum
        )));
    }
    Ok(())
}

struct UploadForm {
    amount: f64,
    currency: String,
    wallet_address: String,
    transaction_hash: Option<String>,
    user_notes: Option<String>,
    receipt_name: String,
    receipt_mime: String,
    receipt_bytes: Vec<u8>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut amount = None;
    let mut currency = None;
    let mut wallet_address = None;
    let mut transaction_hash = None;
    let mut user_notes = None;
    let mut receipt: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "amount" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("unreadable amount field: {}", e)))?;
                let parsed = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| AppError::Validation("amount must be a number".to_string()))?;
                amount = Some(parsed);
            }
            "currency" => {
                currency = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("unreadable currency field: {}", e))
                })?);
            }
            "walletAddress" => {
                wallet_address = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("unreadable wallet field: {}", e))
                })?);
            }
            "transactionHash" => {
                transaction_hash = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("unreadable transaction hash field: {}", e))
                })?);
            }
            "userNotes" => {
                user_notes = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("unreadable notes field: {}", e))
                })?);
            }
            "receipt" => {
                let original_name = field
                    .file_name()
                    .unwrap_or("receipt")
                    .to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("unreadable receipt upload: {}", e))
                })?;
                receipt = Some((original_name, mime_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (receipt_name, receipt_mime, receipt_bytes) =
        receipt.ok_or_else(|| AppError::Validation("receipt file is required".to_string()))?;

    Ok(UploadForm {
        amount: amount.ok_or_else(|| AppError::Validation("amount is required".to_string()))?,
        currency: currency
            .ok_or_else(|| AppError::Validation("currency is required".to_string()))?,
        wallet_address: wallet_address
            .ok_or_else(|| AppError::Validation("walletAddress is required".to_string()))?,
        transaction_hash,
        user_notes,
        receipt_name,
        receipt_mime,
        receipt_bytes,
    })
}

async fn upload_contribution(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    authorize(&principal, Capability::SubmitContributions)?;

    let form = read_upload_form(multipart).await?;
    enforce_submission_floor(form.amount, state.min_contribution_amount)?;

    let coin = state.coin_registry.resolve(&form.currency).await?;
    let receipt = state
        .receipt_store
        .store(&form.receipt_name, &form.receipt_mime, &form.receipt_bytes)
        .await?;

    let record = state
        .review_store
        .submit(NewContribution {
            submitter_id: principal.id,
            coin_symbol: coin.symbol,
            amount: form.amount,
            wallet_address: form.wallet_address,
            receipt,
            transaction_hash: form.transaction_hash,
            conversion_rate: coin.conversion_rate,
            user_notes: form.user_notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(record)))
}

async fn my_contributions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let records = state.review_store.list_by_submitter(&principal.id).await?;
    Ok(Json(records))
}

async fn pending_contributions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&principal, Capability::ReviewContributions)?;
    let records = state.review_store.list_pending().await?;
    Ok(Json(records))
}

async fn get_contribution(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.review_store.get(&ContributionId(id)).await?;
    // Owners see their own records; anyone else needs review access.
    if record.submitter_id != principal.id {
        authorize(&principal, Capability::ReviewContributions)?;
    }
    Ok(Json(record))
}

#[derive(Debug, Default, Deserialize)]
struct ReviewNotes {
    notes: Option<String>,
}

async fn approve_contribution(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewNotes>>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&principal, Capability::ReviewContributions)?;
    let notes = body.and_then(|Json(b)| b.notes);
    let record = state
        .review_store
        .approve(&ContributionId(id), principal.id, notes)
        .await?;
    Ok(Json(record))
}

async fn reject_contribution(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewNotes>>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&principal, Capability::ReviewContributions)?;
    let notes = body.and_then(|Json(b)| b.notes);
    let record = state
        .review_store
        .reject(&ContributionId(id), principal.id, notes)
        .await?;
    Ok(Json(record))
}

async fn put_contribution_under_review(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewNotes>>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&principal, Capability::ReviewContributions)?;
    let notes = body.and_then(|Json(b)| b.notes);
    let record = state
        .review_store
        .put_under_review(&ContributionId(id), principal.id, notes)
        .await?;
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_floor_boundary() {
        // the floor itself is accepted, a cent below is not
        assert!(enforce_submission_floor(50.00, 50.0).is_ok());
        assert!(enforce_submission_floor(50.01, 50.0).is_ok());

        let err = enforce_submission_floor(49.99, 50.0).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
