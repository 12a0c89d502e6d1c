//! Event push WebSocket endpoint.
//!
//! The token is verified before the upgrade completes and the verdict is
//! delivered inside the socket: a rejected caller is upgraded, then closed
//! with 1008 before any acknowledgment.
use crate::app::AppState;
use crate::auth::{authenticate, request_token};
use crate::push::run_session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
}

pub(crate) async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let token = request_token(&headers, query.token.as_deref());
    let auth = authenticate(state.verifier.as_ref(), token, "events");
    let ctx = state.session_context();
    upgrade.on_upgrade(move |socket| async move {
        run_session(socket, auth, ctx).await;
    })
}
