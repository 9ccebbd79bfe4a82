use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SERVICE_ID_HEADER: &str = "x-service-id";

/// The calling service, as named by its `x-service-id` header.
#[derive(Clone, Debug)]
pub struct CallingService {
    pub id: String,
}

/// Service-to-service auth for every `/api/v1` route.
///
/// Requires `x-api-key` matching the configured key (compared in constant
/// time) and a non-empty `x-service-id`. Rejected requests never reach the
/// orchestrator.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .map(|h| h.as_bytes())
        .unwrap_or_default();
    if !bool::from(presented.ct_eq(state.api_key.as_bytes())) {
        warn!(path = %req.uri().path(), "rejected request with invalid API key");
        return Err(ApiError::Unauthorized("Invalid API key".to_string()));
    }

    let service = req
        .headers()
        .get(SERVICE_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("Missing service ID".to_string()))?;

    req.extensions_mut().insert(CallingService { id: service });

    Ok(next.run(req).await)
}
