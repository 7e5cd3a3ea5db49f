//! Manual trigger endpoints. Both return as soon as the work is queued.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::flywheel::{MinuteOfDay, PoolError};
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};

#[derive(Debug, Default, Deserialize)]
pub struct MinutePassParams {
    /// Minute of the UTC day to run; defaults to the current minute.
    pub minute: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutePassResponse {
    pub minute: u32,
    pub time: String,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForcedRefreshResponse {
    pub user_id: Uuid,
    pub accepted: bool,
}

/// `POST /flywheel/internal`
pub(super) async fn trigger_minute_pass(
    State(state): State<AppState>,
    Query(params): Query<MinutePassParams>,
) -> Result<(StatusCode, Json<MinutePassResponse>), ApiError> {
    let minute = match params.minute {
        Some(m) => MinuteOfDay::new(m)
            .map_err(|e| ApiError::new(ApiErrorCode::InvalidMinute, e.to_string()))?,
        None => MinuteOfDay::now(),
    };

    let accepted = match state.trigger.trigger_minute_pass(minute) {
        Ok(()) => {
            info!(%minute, "Minute pass triggered");
            true
        }
        Err(e @ PoolError::Saturated { .. }) => {
            warn!(%minute, error = %e, "Minute pass skipped, pass workers busy");
            false
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(MinutePassResponse {
            minute: minute.get(),
            time: minute.to_string(),
            accepted,
        }),
    ))
}

/// `POST /flywheel/internal/users/{userId}`
pub(super) async fn trigger_forced_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<ForcedRefreshResponse>), ApiError> {
    let user_id = Uuid::parse_str(&user_id).map_err(|_| {
        ApiError::new(
            ApiErrorCode::InvalidUserId,
            format!("invalid user id: {user_id:?}"),
        )
    })?;

    let accepted = match state.trigger.trigger_forced_user(user_id) {
        Ok(()) => {
            info!(%user_id, "Forced refresh triggered");
            true
        }
        Err(e @ PoolError::Saturated { .. }) => {
            warn!(%user_id, error = %e, "Forced refresh dropped, forced pool saturated");
            false
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(ForcedRefreshResponse { user_id, accepted }),
    ))
}
