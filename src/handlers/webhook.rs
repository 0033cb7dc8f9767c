use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;

use crate::error::AppResult;
use crate::services::payment::{self, WebhookOutcome};
use crate::webhook::stripe;
use crate::AppState;

/// Payment provider webhook. Signature failures answer 401 so the provider
/// retries; replays of an applied event are acknowledged without effect.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookOutcome>> {
    let now = Utc::now();
    let signature = headers
        .get(stripe::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let event = stripe::construct_event(
        signature,
        &body,
        &state.config.stripe_webhook_secret,
        now,
    )?;

    let outcome = payment::apply_webhook(state.db.as_ref(), event, now).await?;
    Ok(Json(outcome))
}
