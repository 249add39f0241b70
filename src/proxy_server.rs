use std::collections::BTreeMap;
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

const X_FORWARDED_HOST: &str = "x-forwarded-host";

#[derive(Clone)]
struct RouteEntry {
    target: Url,
    descriptor: String,
}

type RouteTable = Arc<RwLock<BTreeMap<String, RouteEntry>>>;

/// A named HTTP listener owning a mutable path → target rewrite table.
/// Dispatch is a single catch-all handler performing a read-locked
/// lookup into the current table, so `NewProxy`/`DeleteProxy` are pure
/// map mutations with no handler-registration gap.
pub struct ProxyServer {
    name: String,
    hostname: String,
    port: u16,
    routes: RouteTable,
    engine: ReverseProxyEngine,
    listener: ManagedListener,
}

impl ProxyServer {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        Self {
            listener: ManagedListener::new(name.clone()),
            name,
            hostname: hostname.into(),
            port,
            routes: Arc::new(RwLock::new(BTreeMap::new())),
            engine: ReverseProxyEngine::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn status(&self) -> Status {
        self.listener.status().await
    }

    /// Registers (or overwrites) the handler at `route_path`.
    pub async fn new_proxy(&self, route_path: &str, target: Url) {
        let path = normalize_path(route_path);
        let descriptor = format!(
            "{}{}",
            target.host_str().unwrap_or_default(),
            target.path()
        );
        info!(server = %self.name, route = %path, target = %target, "registering proxy route");
        self.routes.write().await.insert(
            path.to_string(),
            RouteEntry {
                target,
                descriptor,
            },
        );
    }

    /// Removes the route. Subsequent requests to that path fall through
    /// to the default 404 dispatch.
    pub async fn delete_proxy(&self, route_path: &str) {
        let path = normalize_path(route_path);
        info!(server = %self.name, route = %path, "removing proxy route");
        self.routes.write().await.remove(path);
    }

    /// Snapshot of `path -> "host/path"` descriptors.
    pub async fn proxy_map(&self) -> BTreeMap<String, String> {
        self.routes
            .read()
            .await
            .iter()
            .map(|(path, entry)| (path.clone(), entry.descriptor.clone()))
            .collect()
    }

    pub async fn serve(&self) -> std::io::Result<SocketAddr> {
        let routes = self.routes.clone();
        let engine = self.engine.clone();
        let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.port);
        self.listener
            .serve(addr, move |req| {
                let routes = routes.clone();
                let engine = engine.clone();
                async move { Ok::<_, Infallible>(dispatch(req, routes, engine).await) }
            })
            .await
    }

    pub async fn stop(&self) {
        self.listener.stop().await;
    }

    pub async fn info(&self) -> ServerInfo {
        let mut ports = BTreeMap::new();
        ports.insert("Port".to_string(), self.port.to_string());
        ServerInfo {
            name: self.name.clone(),
            kind: ServerKind::Proxy.as_str(),
            status: self.status().await.as_str(),
            ports,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

async fn dispatch(
    req: Request<Body>,
    routes: RouteTable,
    engine: ReverseProxyEngine,
) -> Response<Body> {
    let path = normalize_path(req.uri().path()).to_string();
    let entry = routes.read().await.get(&path).cloned();
    let Some(entry) = entry else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("no route registered for this path"))
            .expect("status and body are always valid");
    };

    let director = move |req: &mut Request<Body>| -> Result<(), Cancelled> {
        rewrite_for_route(req, &entry.target);
        Ok(())
    };
    engine.serve(req, &director).await
}

/// The per-route director: rewrites scheme/host/path onto `target`,
/// merges query strings, and suppresses the client's default
/// `User-Agent` if the inbound request didn't set one.
fn rewrite_for_route(req: &mut Request<Body>, target: &Url) {
    let original_host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();

    let target_query = target.query().unwrap_or("");
    let req_query = req.uri().query().unwrap_or("");
    let merged_query = merge_query(target_query, req_query);

    let mut path_and_query = target.path().to_string();
    if !merged_query.is_empty() {
        path_and_query.push('?');
        path_and_query.push_str(&merged_query);
    }

    let authority = authority_of(target);
    if let Ok(uri) = Uri::builder()
        .scheme(target.scheme())
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
    {
        *req.uri_mut() = uri;
    }

    if req.headers().get(USER_AGENT).is_none() {
        req.headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(""));
    }

    if let Ok(host_value) = HeaderValue::from_str(&authority) {
        req.headers_mut().insert(HOST, host_value);
    }
    if let Ok(forwarded) = HeaderValue::from_str(&original_host) {
        req.headers_mut()
            .insert(X_FORWARDED_HOST, forwarded);
    }
}

fn authority_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_string(),
    }
}

/// If either query is empty, concatenate (equivalent to taking whichever
/// side is non-empty); otherwise join with `&`.
fn merge_query(target_query: &str, req_query: &str) -> String {
    if target_query.is_empty() || req_query.is_empty() {
        format!("{target_query}{req_query}")
    } else {
        format!("{target_query}&{req_query}")
    }
}

/// Treats `/a` and `/a/` as the same route.
pub fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash() {
        assert_eq!(normalize_path("/a/"), "/a");
        assert_eq!(normalize_path("/a"), "/a");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn merges_query_when_one_side_empty() {
        assert_eq!(merge_query("", "a=1"), "a=1");
        assert_eq!(merge_query("a=1", ""), "a=1");
        assert_eq!(merge_query("", ""), "");
    }

    #[test]
    fn joins_query_with_ampersand_when_both_present() {
        assert_eq!(merge_query("a=1", "b=2"), "a=1&b=2");
    }

    #[tokio::test]
    async fn new_proxy_then_delete_removes_route() {
        let server = ProxyServer::new("p", "localhost", 0);
        let target = Url::parse("https://example.org/x").unwrap();
        server.new_proxy("/g", target).await;
        assert_eq!(server.proxy_map().await.len(), 1);
        server.delete_proxy("/g").await;
        assert_eq!(server.proxy_map().await.len(), 0);
    }

    #[tokio::test]
    async fn repeated_new_proxy_is_idempotent() {
        let server = ProxyServer::new("p", "localhost", 0);
        let target = Url::parse("https://example.org/x").unwrap();
        server.new_proxy("/g", target.clone()).await;
        server.new_proxy("/g", target).await;
        assert_eq!(server.proxy_map().await.len(), 1);
    }
}
