mod dto;
mod extract;
mod handlers;

use axum::routing::get;
use axum::Router;

use handlers::AppState;

/// Builds the control-plane REST router described in the external
/// interfaces section: translates JSON requests into [`crate::supervisor::Supervisor`]
/// calls and serializes the responses.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/servers", get(handlers::get_servers))
        .route("/server", get(handlers::get_server))
        .route("/proxies", get(handlers::get_proxies))
        .route(
            "/proxy",
            get(handlers::get_proxy).post(handlers::create_proxy),
        )
        .route(
            "/proxy/route",
            get(handlers::get_proxy_route).post(handlers::create_proxy_route),
        )
        .route("/hoppers", get(handlers::get_hoppers))
        .route(
            "/hopper",
            get(handlers::get_hopper).post(handlers::create_hopper),
        )
        .route("/hopper/hop", get(handlers::get_hopper_hop))
        .route(
            "/hopper/hop/in",
            get(handlers::get_hopper_hop_in).post(handlers::create_hopper_hop_in),
        )
        .route(
            "/hopper/hop/out",
            get(handlers::get_hopper_hop_out).post(handlers::create_hopper_hop_out),
        )
        .with_state(state)
}
