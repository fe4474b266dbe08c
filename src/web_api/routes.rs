//! API Routes

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION,
        },
        HeaderMap, Method, StatusCode,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

use crate::error::Error;
use crate::realtime_hub::Handshake;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::service_status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET]),
        );

    Router::new()
        // Event stream; CORS is answered by the handlers themselves
        .route("/sse", get(sse_handler).options(sse_preflight))
        .merge(api)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    access_token: Option<String>,
}

/// Open an event stream after checking the bearer credential.
///
/// `?access_token=` is accepted for clients that cannot set headers
/// (browser `EventSource`); the header wins when both are present.
async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let mut handshake = Handshake::from_authorization(authorization);
    if handshake.credential.is_none() {
        handshake.credential = query.access_token.filter(|t| !t.is_empty());
    }
    if let Some(ConnectInfo(addr)) = peer {
        handshake = handshake.with_peer(addr.to_string());
    }

    let subscription = match state.realtime.subscribe(handshake).await {
        Ok(subscription) => subscription,
        Err(rejected) => {
            let error: Error = rejected.into();
            return ([(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], error).into_response();
        }
    };

    tracing::debug!(connection_id = %subscription.id(), "Event stream opened");

    let stream = subscription.map(|json| Ok::<_, Infallible>(Event::default().data(json)));
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.keep_alive));

    ([(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], sse).into_response()
}

/// CORS preflight for `/sse`
async fn sse_preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Authorization"),
        ],
    )
}
