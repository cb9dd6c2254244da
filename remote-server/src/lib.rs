//! Wire-protocol server exposing a `vfs_core::FileSystemProvider` over HTTP
//! + WebSocket (spec §6), grounded on the teacher's `server` crate — same
//! `axum` + `tower_http::trace` shape, generalized from one hardcoded
//! `std::fs`-backed route set to any registered provider.

pub mod config;
pub mod handlers;
pub mod state;
pub mod ws;

use axum::routing::{get, post, put};
use axum::Router;

use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/capabilities", get(handlers::get_capabilities))
        .route("/stat", post(handlers::stat))
        .route("/open", post(handlers::open))
        .route("/close", post(handlers::close))
        .route("/read", post(handlers::read))
        .route("/write", post(handlers::write))
        .route("/file/*path", get(handlers::read_file).put(handlers::write_file))
        .route("/delete", post(handlers::delete))
        .route("/mkdir", post(handlers::mkdir))
        .route("/readdir/*path", get(handlers::readdir))
        .route("/rename", post(handlers::rename))
        .route("/copy", post(handlers::copy))
        .route("/watch", get(ws::watch))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
