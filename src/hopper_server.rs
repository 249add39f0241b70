use std::collections::BTreeMap;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use hyper::header::{HeaderValue, HOST, USER_AGENT};
use hyper::{Body, Request, Response, StatusCode, Uri};
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

use crate::listener::ManagedListener;
use crate::model::{ServerInfo, ServerKind, Status};
use crate::reverse_proxy::{Cancelled, ReverseProxyEngine};
use crate::rewriter::reduce_target_hop;

const X_MHP_TARGET_HOST: &str = "x-mhp-target-host";
const X_MHP_TARGET_SCHEME: &str = "x-mhp-target-scheme";
const X_MHP_TARGET_PATH: &str = "x-mhp-target-path";
const X_MHP_TARGET_QUERY: &str = "x-mhp-target-query";
const X_MHP_FORWARDED_HOST: &str = "x-mhp-forwarded-host";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

type HopTable = Arc<RwLock<HashMap<String, Url>>>;

/// A named pair of listeners implementing the MHP tunnel: an outgoing
/// side that wraps a request addressed to `/<host>/<path>` into
/// `X-MHP-*` headers and forwards it to a next-hop peer, and an incoming
/// side that unwraps those headers and re-emits the request toward the
/// real target. The two hop maps are owned directly here (not reached
/// through an inner `ProxyServer`'s route table) so the loopback
/// self-healing rule between them can be applied atomically.
pub struct HopperServer {
    name: String,
    hostname: String,
    incoming_port: u16,
    outgoing_port: u16,
    incoming_hops: HopTable,
    outgoing_hops: HopTable,
    incoming_listener: ManagedListener,
    outgoing_listener: ManagedListener,
    engine: ReverseProxyEngine,
}

impl HopperServer {
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        incoming_port: u16,
        outgoing_port: u16,
    ) -> Self {
        let name = name.into();
        Self {
            incoming_listener: ManagedListener::new(format!("{name}-incoming")),
            outgoing_listener: ManagedListener::new(format!("{name}-outgoing")),
            name,
            hostname: hostname.into(),
            incoming_port,
            outgoing_port,
            incoming_hops: Arc::new(RwLock::new(HashMap::new())),
            outgoing_hops: Arc::new(RwLock::new(HashMap::new())),
            engine: ReverseProxyEngine::new(),
        }
    }

    pub fn incoming_port(&self) -> u16 {
        self.incoming_port
    }

    pub fn outgoing_port(&self) -> u16 {
        self.outgoing_port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn status(&self) -> Status {
        // Up only once both sub-listeners are accepting.
        match (
            self.incoming_listener.status().await,
            self.outgoing_listener.status().await,
        ) {
            (Status::Up, Status::Up) => Status::Up,
            _ => Status::Down,
        }
    }

    /// `OutgoingHopsReference[target.hostname] = hop`, with loopback
    /// self-healing: if `IncomingHopsReference[target.hostname]` already
    /// points at `target.hostname` itself, it is redirected to `hop` too.
    pub async fn build_new_outgoing_hop(&self, target: Url, hop: Url) {
        let (target, hop) = reduce_target_hop(&target, &hop);
        let host = target.host_str().unwrap_or_default().to_string();
        info!(server = %self.name, host = %host, hop = %hop, "registering outgoing hop");
        self.outgoing_hops
            .write()
            .await
            .insert(host.clone(), hop.clone());

        let mut incoming = self.incoming_hops.write().await;
        if let Some(existing) = incoming.get(&host) {
            if existing.host_str() == Some(host.as_str()) {
                incoming.insert(host, hop);
            }
        }
    }

    pub async fn delete_outgoing_hop(&self, target: &Url) {
        let host = target.host_str().unwrap_or_default();
        self.outgoing_hops.write().await.remove(host);
    }

    /// `IncomingHopsReference[target.hostname] = hop`, unless
    /// `target.hostname` already has an outgoing hop, in which case the
    /// incoming entry is pointed at this Hopper's own outgoing listener
    /// (`localhost:<OutgoingPort>`) so receive-then-forward is automatic.
    pub async fn build_new_incoming_hop(&self, target: Url, hop: Url) {
        let (target, hop) = reduce_target_hop(&target, &hop);
        let host = target.host_str().unwrap_or_default().to_string();

        let has_outgoing = self.outgoing_hops.read().await.contains_key(&host);
        let entry = if has_outgoing {
            loopback_url(self.outgoing_port)
        } else {
            hop
        };
        info!(server = %self.name, host = %host, entry = %entry, "registering incoming hop");
        self.incoming_hops.write().await.insert(host, entry);
    }

    pub async fn delete_incoming_hop(&self, target: &Url) {
        let host = target.host_str().unwrap_or_default();
        self.incoming_hops.write().await.remove(host);
    }

    pub async fn outgoing_hops_snapshot(&self) -> BTreeMap<String, String> {
        self.outgoing_hops
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    pub async fn incoming_hops_snapshot(&self) -> BTreeMap<String, String> {
        self.incoming_hops
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    pub async fn serve(&self) -> std::io::Result<(SocketAddr, SocketAddr)> {
        let outgoing_hops = self.outgoing_hops.clone();
        let engine = self.engine.clone();
        let outgoing_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.outgoing_port);
        let out = self
            .outgoing_listener
            .serve(outgoing_addr, move |req| {
                let outgoing_hops = outgoing_hops.clone();
                let engine = engine.clone();
                async move { Ok::<_, Infallible>(dispatch_outgoing(req, outgoing_hops, engine).await) }
            })
            .await?;

        let incoming_hops = self.incoming_hops.clone();
        let engine = self.engine.clone();
        let incoming_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.incoming_port);
        let inc = self
            .incoming_listener
            .serve(incoming_addr, move |req| {
                let incoming_hops = incoming_hops.clone();
                let engine = engine.clone();
                async move { Ok::<_, Infallible>(dispatch_incoming(req, incoming_hops, engine).await) }
            })
            .await?;

        Ok((inc, out))
    }

    /// Stops each sub-listener that is currently `Up`.
    pub async fn stop(&self) {
        if self.incoming_listener.status().await == Status::Up {
            self.incoming_listener.stop().await;
        }
        if self.outgoing_listener.status().await == Status::Up {
            self.outgoing_listener.stop().await;
        }
    }

    pub async fn info(&self) -> ServerInfo {
        let mut ports = BTreeMap::new();
        ports.insert("IncomingPort".to_string(), self.incoming_port.to_string());
        ports.insert("OutgoingPort".to_string(), self.outgoing_port.to_string());
        ServerInfo {
            name: self.name.clone(),
            kind: ServerKind::Hopper.as_str(),
            status: self.status().await.as_str(),
            ports,
        }
    }
}

fn loopback_url(outgoing_port: u16) -> Url {
    Url::parse(&format!("http://localhost:{outgoing_port}")).expect("always a valid URL")
}

async fn dispatch_outgoing(
    req: Request<Body>,
    outgoing_hops: HopTable,
    engine: ReverseProxyEngine,
) -> Response<Body> {
    let (target_host, target_path) = split_target_path(req.uri().path());
    let hop = outgoing_hops.read().await.get(&target_host).cloned();

    let director = move |req: &mut Request<Body>| -> Result<(), Cancelled> {
        let Some(hop) = hop.clone() else {
            return Err(Cancelled(format!("Hop not registered for {target_host}")));
        };
        apply_outgoing_rewrite(req, &target_host, &target_path, &hop);
        Ok(())
    };
    engine.serve(req, &director).await
}

/// Splits `/<host>/<rest>` into (`host`, `/<rest>`). The host is lowercased
/// to match the hop tables, which are keyed by `Url::host_str()` — `url`
/// already lowercases domain hosts per IDNA, so an un-normalized path
/// segment would otherwise never find a hop registered for it.
fn split_target_path(path: &str) -> (String, String) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((host, rest)) => (host.to_ascii_lowercase(), format!("/{rest}")),
        None => (trimmed.to_ascii_lowercase(), "/".to_string()),
    }
}

fn apply_outgoing_rewrite(req: &mut Request<Body>, target_host: &str, target_path: &str, hop: &Url) {
    let client_host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    let raw_query = req.uri().query().unwrap_or("").to_string();

    set_header_if_absent(req, X_MHP_TARGET_HOST, target_host);
    set_header_if_absent(req, X_MHP_TARGET_SCHEME, "http");
    set_header_if_absent(req, X_MHP_TARGET_PATH, target_path);
    set_header_if_absent(req, X_MHP_TARGET_QUERY, &raw_query);
    set_header_if_absent(req, X_MHP_FORWARDED_HOST, &client_host);

    if let Some(forwarded) = req
        .headers()
        .get(X_MHP_FORWARDED_HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            req.headers_mut().insert(X_FORWARDED_HOST, value);
        }
    }

    let hop_authority = authority_of(hop);
    if let Ok(uri) = Uri::builder()
        .scheme(hop.scheme())
        .authority(hop_authority.clone())
        .path_and_query("/")
        .build()
    {
        *req.uri_mut() = uri;
    }
    if let Ok(host_value) = HeaderValue::from_str(&hop_authority) {
        req.headers_mut().insert(HOST, host_value);
    }
    if req.headers().get(USER_AGENT).is_none() {
        req.headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(""));
    }
}

async fn dispatch_incoming(
    req: Request<Body>,
    incoming_hops: HopTable,
    engine: ReverseProxyEngine,
) -> Response<Body> {
    let target_host = req
        .headers()
        .get(X_MHP_TARGET_HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if target_host.is_empty() {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("missing X-MHP-Target-Host"))
            .expect("status and body are always valid");
    }

    let destination = incoming_hops.read().await.get(&target_host).cloned();

    let director = move |req: &mut Request<Body>| -> Result<(), Cancelled> {
        let Some(destination) = destination.clone() else {
            return Err(Cancelled(format!("Hop not registered for {target_host}")));
        };
        apply_incoming_rewrite(req, &destination);
        Ok(())
    };
    engine.serve(req, &director).await
}

fn apply_incoming_rewrite(req: &mut Request<Body>, destination: &Url) {
    let scheme = header_str(req, X_MHP_TARGET_SCHEME)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "http".to_string());
    let path = header_str(req, X_MHP_TARGET_PATH).unwrap_or_else(|| "/".to_string());
    let query = header_str(req, X_MHP_TARGET_QUERY).unwrap_or_default();
    let forwarded_host = header_str(req, X_MHP_FORWARDED_HOST).unwrap_or_default();

    let authority = authority_of(destination);
    let mut path_and_query = if path.is_empty() {
        "/".to_string()
    } else {
        path
    };
    if !query.is_empty() {
        path_and_query.push('?');
        path_and_query.push_str(&query);
    }

    if let Ok(uri) = Uri::builder()
        .scheme(scheme.as_str())
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
    {
        *req.uri_mut() = uri;
    }
    if let Ok(host_value) = HeaderValue::from_str(&authority) {
        req.headers_mut().insert(HOST, host_value);
    }

    for header in [
        X_MHP_TARGET_HOST,
        X_MHP_TARGET_SCHEME,
        X_MHP_TARGET_PATH,
        X_MHP_TARGET_QUERY,
        X_MHP_FORWARDED_HOST,
    ] {
        req.headers_mut().remove(header);
    }
    if let Ok(value) = HeaderValue::from_str(&forwarded_host) {
        req.headers_mut().insert(X_FORWARDED_HOST, value);
    }
}

fn header_str(req: &Request<Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn set_header_if_absent(req: &mut Request<Body>, name: &str, value: &str) {
    if req.headers().contains_key(name) {
        return;
    }
    if let (Ok(name), Ok(value)) = (
        hyper::header::HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        req.headers_mut().insert(name, value);
    }
}

fn authority_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_path() {
        assert_eq!(
            split_target_path("/H/index"),
            ("h".to_string(), "/index".to_string())
        );
        assert_eq!(split_target_path("/H"), ("h".to_string(), "/".to_string()));
    }

    #[tokio::test]
    async fn outgoing_then_incoming_loopback_self_heals() {
        let hopper = HopperServer::new("h", "localhost", 1, 2);
        let target = Url::parse("http://h-target.example/").unwrap();
        // Incoming first registers a loopback pointing at itself.
        hopper
            .build_new_incoming_hop(target.clone(), target.clone())
            .await;
        // Now an outgoing hop for the same host should redirect the
        // incoming entry too.
        let hop = Url::parse("http://peer.example:9000/").unwrap();
        hopper.build_new_outgoing_hop(target.clone(), hop.clone()).await;

        let incoming = hopper.incoming_hops_snapshot().await;
        assert_eq!(
            incoming.get("h-target.example").map(String::as_str),
            Some("http://peer.example:9000/")
        );
    }

    #[tokio::test]
    async fn incoming_after_outgoing_gets_loopback() {
        let hopper = HopperServer::new("h", "localhost", 1, 2);
        let target = Url::parse("http://h-target.example/").unwrap();
        let hop = Url::parse("http://peer.example:9000/").unwrap();
        hopper.build_new_outgoing_hop(target.clone(), hop).await;
        hopper
            .build_new_incoming_hop(target.clone(), target.clone())
            .await;

        let incoming = hopper.incoming_hops_snapshot().await;
        assert_eq!(
            incoming.get("h-target.example").map(String::as_str),
            Some("http://localhost:2/")
        );
    }
}
