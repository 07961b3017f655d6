use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::info;

use crate::openrtb::request::BidRequest;
use crate::openrtb::response::BidResponse;
use crate::AppState;

/// 请求没带 tmax 时的竞价时间预算（毫秒）
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// **处理 OpenRTB 竞价请求**
pub async fn handle_openrtb2_auction(
    State(state): State<Arc<AppState>>,
    Json(bid_request): Json<BidRequest>,
) -> Result<Json<BidResponse>, (StatusCode, String)> {
    let timeout_ms = match bid_request.tmax {
        Some(tmax) if tmax > 0 => tmax,
        _ => DEFAULT_TIMEOUT_MS,
    };
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    match state.exchange.hold_auction(&bid_request, deadline).await {
        Ok(response) => {
            info!(
                request_id = %response.id,
                seats = response.seatbid.len(),
                "auction complete"
            );
            Ok(Json(response))
        }
        Err(e) => {
            info!(request_id = %bid_request.id, "auction rejected: {}", e);
            Err((StatusCode::BAD_REQUEST, format!("Invalid request: {}", e)))
        }
    }
}

/// **下发发布方证书**，需求方验签时拉取
pub async fn handle_ads_cert(
    State(state): State<Arc<AppState>>,
) -> Result<String, StatusCode> {
    match &state.signer {
        Some(signer) => Ok(signer.public_certificate().to_string()),
        None => Err(StatusCode::NOT_FOUND),
    }
}
