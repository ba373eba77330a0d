use axum::{
    extract::{ConnectInfo, Request, State},
    response::Response,
};
use std::net::SocketAddr;

use crate::AppState;

/// Fallback for every path the gateway does not own.
pub async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    // Absent when the router is driven without a socket, e.g. in tests.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    state.gateway.handle(request, peer).await
}
