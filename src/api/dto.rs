use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::ServerInfo;

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ServersInfoResponse {
    #[serde(rename = "Info")]
    pub info: Vec<ServerInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Hostname", default)]
    pub hostname: String,
}

#[derive(Debug, Serialize)]
pub struct CreateProxyResponse {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Port")]
    pub port: String,
}

#[derive(Debug, Serialize)]
pub struct CreateHopperResponse {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "IncomingPort")]
    pub incoming_port: String,
    #[serde(rename = "OutgoingPort")]
    pub outgoing_port: String,
}

#[derive(Debug, Serialize)]
pub struct ProxyMapResponse {
    #[serde(rename = "ProxyMap")]
    pub proxy_map: BTreeMap<String, String>,
}

/// Shared by the three hop-listing GETs: `/hopper/hop`, `/hopper/hop/in`,
/// `/hopper/hop/out`. Absent maps are omitted from the JSON body.
#[derive(Debug, Serialize, Default)]
pub struct HopsResponse {
    #[serde(rename = "IncomingHops", skip_serializing_if = "Option::is_none")]
    pub incoming_hops: Option<BTreeMap<String, String>>,
    #[serde(rename = "OutgoingHops", skip_serializing_if = "Option::is_none")]
    pub outgoing_hops: Option<BTreeMap<String, String>>,
}

/// `{Name, Route, Target}`, used for both `/proxy/route` and
/// `/hopper/hop/{in,out}`. POST handlers echo this struct back verbatim.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Route")]
    pub route: String,
    #[serde(rename = "Target")]
    pub target: String,
}
