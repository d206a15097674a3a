//! Router construction: a single `POST /` endpoint, as the wire protocol has
//! no resource paths of its own — every operation travels through `X-Amz-Target`.

use std::sync::Arc;

use axum::routing::post;
use axum::Router;

use super::handlers::handle;
use super::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", post(handle)).with_state(state)
}
