use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use url::Url;

use crate::error::{MiniHyperProxyError, Result};
use crate::supervisor::Supervisor;

use super::dto::{
    CreateHopperResponse, CreateProxyResponse, CreateServerRequest, HopsResponse, NameRequest,
    ProxyMapResponse, RouteRequest, ServersInfoResponse,
};
use super::extract::ApiJson;

pub type AppState = Arc<Supervisor>;

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|_| MiniHyperProxyError::UrlParsing)
}

/// `Route`/`Target` are required on every route/hop request; a body that
/// decodes cleanly but leaves either blank is well-formed JSON with an
/// invalid structure, not a missing `Name` (`EmptyField`) or a parse
/// failure (`RequestUnmarshall`/`BodyUnmarshall`).
fn require_route_and_target(req: &RouteRequest) -> Result<()> {
    if req.route.is_empty() || req.target.is_empty() {
        return Err(MiniHyperProxyError::InvalidBody);
    }
    Ok(())
}

pub async fn get_servers(State(sup): State<AppState>) -> Json<ServersInfoResponse> {
    Json(ServersInfoResponse {
        info: sup.get_servers_info().await,
    })
}

pub async fn get_server(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<ServersInfoResponse>> {
    let info = sup.get_server_info(&req.name).await?;
    Ok(Json(ServersInfoResponse { info: vec![info] }))
}

pub async fn get_proxies(State(sup): State<AppState>) -> Json<ServersInfoResponse> {
    Json(ServersInfoResponse {
        info: sup.get_proxies_info().await,
    })
}

pub async fn get_proxy(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<ServersInfoResponse>> {
    let info = sup.get_proxy_info(&req.name).await?;
    Ok(Json(ServersInfoResponse { info: vec![info] }))
}

pub async fn create_proxy(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<CreateServerRequest>,
) -> Result<Json<CreateProxyResponse>> {
    if req.name.is_empty() {
        return Err(MiniHyperProxyError::EmptyField);
    }
    let hostname = if req.hostname.is_empty() {
        "localhost".to_string()
    } else {
        req.hostname.clone()
    };
    let port = sup.start_proxy_server(&req.name, &req.hostname).await?;
    Ok(Json(CreateProxyResponse {
        name: req.name,
        hostname,
        port: port.to_string(),
    }))
}

pub async fn get_proxy_route(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<ProxyMapResponse>> {
    let proxy_map = sup.get_proxy_map(&req.name).await?;
    Ok(Json(ProxyMapResponse { proxy_map }))
}

pub async fn create_proxy_route(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<RouteRequest>,
) -> Result<Json<RouteRequest>> {
    require_route_and_target(&req)?;
    let target = parse_url(&req.target)?;
    sup.add_proxy_redirect(&req.name, &req.route, target).await?;
    Ok(Json(req))
}

pub async fn get_hoppers(State(sup): State<AppState>) -> Json<ServersInfoResponse> {
    Json(ServersInfoResponse {
        info: sup.get_hoppers_info().await,
    })
}

pub async fn get_hopper(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<ServersInfoResponse>> {
    let info = sup.get_hopper_info(&req.name).await?;
    Ok(Json(ServersInfoResponse { info: vec![info] }))
}

pub async fn create_hopper(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<CreateServerRequest>,
) -> Result<Json<CreateHopperResponse>> {
    if req.name.is_empty() {
        return Err(MiniHyperProxyError::EmptyField);
    }
    let hostname = if req.hostname.is_empty() {
        "localhost".to_string()
    } else {
        req.hostname.clone()
    };
    let (incoming, outgoing) = sup.start_hopper_server(&req.name, &req.hostname).await?;
    Ok(Json(CreateHopperResponse {
        name: req.name,
        hostname,
        incoming_port: incoming.to_string(),
        outgoing_port: outgoing.to_string(),
    }))
}

pub async fn get_hopper_hop(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<HopsResponse>> {
    let incoming = sup.get_incoming_hops(&req.name).await?;
    let outgoing = sup.get_outgoing_hops(&req.name).await?;
    Ok(Json(HopsResponse {
        incoming_hops: Some(incoming),
        outgoing_hops: Some(outgoing),
    }))
}

pub async fn get_hopper_hop_in(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<HopsResponse>> {
    let incoming = sup.get_incoming_hops(&req.name).await?;
    Ok(Json(HopsResponse {
        incoming_hops: Some(incoming),
        outgoing_hops: None,
    }))
}

pub async fn get_hopper_hop_out(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<NameRequest>,
) -> Result<Json<HopsResponse>> {
    let outgoing = sup.get_outgoing_hops(&req.name).await?;
    Ok(Json(HopsResponse {
        incoming_hops: None,
        outgoing_hops: Some(outgoing),
    }))
}

pub async fn create_hopper_hop_in(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<RouteRequest>,
) -> Result<Json<RouteRequest>> {
    require_route_and_target(&req)?;
    let target = parse_url(&req.route)?;
    let hop = parse_url(&req.target)?;
    sup.receive_hop(&req.name, target, hop).await?;
    Ok(Json(req))
}

pub async fn create_hopper_hop_out(
    State(sup): State<AppState>,
    ApiJson(req): ApiJson<RouteRequest>,
) -> Result<Json<RouteRequest>> {
    require_route_and_target(&req)?;
    let target = parse_url(&req.route)?;
    let hop = parse_url(&req.target)?;
    sup.add_hop(&req.name, target, hop).await?;
    Ok(Json(req))
}
